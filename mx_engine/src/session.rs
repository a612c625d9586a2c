use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;
use glam::DVec3;
use mx_script::config::Uniform;
use mx_script::{Action, Config, EvalError, Expr, Statement, Value};
use serde::Serialize;

use crate::device::{Device, DeviceError};
use crate::executor::{Directive, ExecutionContext};
use crate::mesh::{serialize_dvec3, Mesh};
use crate::output::OutputDir;
use crate::solver;

/// Entries kept in the in-memory event log.
const EVENT_LOG_LIMIT: usize = 256;

/// Largest grid `set_mesh` accepts.
pub const MAX_CELLS: usize = 1 << 24;

/// Simulation state scripts operate on.
///
/// Owns the device, so it lives on the thread that opened the device for as
/// long as the run lasts.
#[derive(Debug)]
pub struct Session {
    device: Device,
    mesh: Mesh,
    config: Config,
    m: Vec<DVec3>,
    pub alpha: f64,
    pub b_ext: DVec3,
    pub dt: f64,
    time: f64,
    steps: u64,
    output: Option<OutputDir>,
    events: VecDeque<String>,
    directive: Option<Directive>,
}

#[derive(Serialize)]
struct SessionSummary<'a> {
    time: f64,
    step: u64,
    mesh: &'a Mesh,
    #[serde(serialize_with = "serialize_dvec3")]
    m_avg: DVec3,
    device_launches: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    events: &'a VecDeque<String>,
}

impl Session {
    pub fn new(device: Device) -> Result<Self, DeviceError> {
        let mut session = Self {
            device,
            mesh: Mesh::default(),
            config: Config::new(Uniform::new(1.0, 0.0, 0.0)),
            m: Vec::new(),
            alpha: 0.02,
            b_ext: DVec3::ZERO,
            dt: 1e-13,
            time: 0.0,
            steps: 0,
            output: None,
            events: VecDeque::new(),
            directive: None,
        };
        session.reload()?;
        Ok(session)
    }

    pub fn with_output(mut self, path: &Path, force: bool) -> Result<Self> {
        self.output = Some(OutputDir::create(path, force)?);
        Ok(self)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn magnetization(&self) -> &[DVec3] {
        &self.m
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn output(&self) -> Option<&OutputDir> {
        self.output.as_ref()
    }

    pub fn events(&self) -> &VecDeque<String> {
        &self.events
    }

    pub fn average_m(&self) -> DVec3 {
        solver::average(&self.m)
    }

    /// Resizes the mesh; the current configuration is sampled onto it again.
    pub fn set_mesh(&mut self, mesh: Mesh) -> Result<(), EvalError> {
        match mesh.cells() {
            Some(0) => {
                return Err(EvalError::invalid(format!("grid size {:?} has no cells", mesh.size)))
            }
            Some(cells) if cells <= MAX_CELLS => {}
            _ => {
                return Err(EvalError::invalid(format!(
                    "grid size {:?} exceeds {MAX_CELLS} cells",
                    mesh.size
                )))
            }
        }
        if mesh.cell.is_nan() || mesh.cell.min_element() <= 0.0 {
            return Err(EvalError::invalid(format!(
                "cell size {:?} must be positive",
                mesh.cell.to_array()
            )));
        }
        self.mesh = mesh;
        self.reload().map_err(device_failure)?;
        self.record(format!(
            "mesh {}x{}x{} cells",
            mesh.size[0], mesh.size[1], mesh.size[2]
        ));
        Ok(())
    }

    /// Samples `config` at every cell centre and makes it the magnetisation.
    pub fn load_config(&mut self, config: Config) -> Result<(), EvalError> {
        self.config = config;
        self.reload().map_err(device_failure)?;
        self.record(format!("m set, <m> = {}", format_vec(self.average_m())));
        Ok(())
    }

    fn reload(&mut self) -> Result<(), DeviceError> {
        let mesh = self.mesh;
        // Meshes only get here through `set_mesh` or the default, both bounded.
        let cells = mesh.cells().unwrap_or(0);
        let config = &self.config;
        self.m = self.device.launch("sample_config", || {
            (0..cells)
                .map(|index| config.eval(mesh.cell_center(index)).normalize_or_zero())
                .collect()
        })?;
        Ok(())
    }

    /// Advances the solver by `duration` seconds.
    pub fn run(&mut self, duration: f64) -> Result<(), EvalError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(EvalError::invalid(format!("run duration {duration} is not a valid time")));
        }
        // Rounding slack so 1e-12 / 1e-13 counts as 10 steps, not 11.
        let count = (duration / self.dt - 1e-6).ceil().max(0.0) as u64;
        self.advance(count)
    }

    pub fn take_steps(&mut self, count: i64) -> Result<(), EvalError> {
        let count = u64::try_from(count)
            .map_err(|_| EvalError::invalid(format!("step count {count} is negative")))?;
        self.advance(count)
    }

    fn advance(&mut self, count: u64) -> Result<(), EvalError> {
        if self.dt.is_nan() || self.dt <= 0.0 {
            return Err(EvalError::invalid(format!("time step {} must be positive", self.dt)));
        }
        let (b, alpha, dt) = (self.b_ext, self.alpha, self.dt);
        let m = &mut self.m;
        for _ in 0..count {
            self.device
                .launch("llg_heun", || solver::heun_step(m, b, alpha, dt))
                .map_err(device_failure)?;
        }
        self.time += count as f64 * dt;
        self.steps += count;
        self.record(format!(
            "{count} step(s), t = {:e} s, <m> = {}",
            self.time,
            format_vec(self.average_m())
        ));
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), EvalError> {
        let out = self
            .output
            .as_mut()
            .ok_or_else(|| EvalError::failed("no output directory"))?;
        let path = out
            .save_field(&self.mesh, &self.m, self.time, self.steps)
            .map_err(|err| EvalError::failed(format!("{err:#}")))?;
        let message = format!("saved {}", path.display());
        self.record(message);
        Ok(())
    }

    pub fn table_save(&mut self) -> Result<(), EvalError> {
        let avg = self.average_m();
        let out = self
            .output
            .as_mut()
            .ok_or_else(|| EvalError::failed("no output directory"))?;
        out.append_table(self.time, avg)
            .map_err(|err| EvalError::failed(format!("{err:#}")))
    }

    pub fn request_interactive(&mut self) {
        self.directive = Some(Directive::Interactive);
    }

    pub fn record(&mut self, event: String) {
        log::info!("{event}");
        if self.events.len() == EVENT_LOG_LIMIT {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

impl ExecutionContext for Session {
    fn take_directive(&mut self) -> Option<Directive> {
        self.directive.take()
    }

    /// A configuration built by a bare statement becomes the magnetisation;
    /// queries and other values are printed.
    fn on_result(&mut self, statement: &Statement<Self>, value: Value) -> Result<(), EvalError> {
        let query = matches!(statement.action(), Action::Eval(Expr::Read(_)));
        match value {
            Value::Void => Ok(()),
            Value::Config(config) if !query => self.load_config(config),
            other => {
                println!("{}: {other}", statement.source());
                Ok(())
            }
        }
    }

    fn summary(&self) -> serde_json::Value {
        let summary = SessionSummary {
            time: self.time,
            step: self.steps,
            mesh: &self.mesh,
            m_avg: self.average_m(),
            device_launches: self.device.launches(),
            output: self.output.as_ref().map(|out| out.path().display().to_string()),
            events: &self.events,
        };
        serde_json::to_value(summary).unwrap_or(serde_json::Value::Null)
    }
}

fn device_failure(err: DeviceError) -> EvalError {
    EvalError::failed(err.to_string())
}

fn format_vec(v: DVec3) -> String {
    format!("({:.4}, {:.4}, {:.4})", v.x, v.y, v.z)
}
