//! Built-in identifiers visible to scripts.

use glam::DVec3;
use mx_script::config::{TwoDomain, Uniform, Vortex, VortexWall};
use mx_script::{Config, EvalError, Registry, RegistryError, Type, Value};

use crate::mesh::Mesh;
use crate::session::Session;

pub type World = Registry<Session>;

/// Builds the registry every run shares. Called once at startup.
pub fn build() -> Result<World, RegistryError> {
    let mut world = Registry::new();
    declare_configs(&mut world)?;
    declare_solver(&mut world)?;
    declare_misc(&mut world)?;
    Ok(world)
}

fn declare_configs(world: &mut World) -> Result<(), RegistryError> {
    use Type::{Config as Cfg, Float, Int};

    world.register_fn(
        "uniform",
        &[Float, Float, Float],
        Cfg,
        "Uniform magnetization (mx, my, mz)",
        |_, args| {
            let (x, y, z) = vec3_args(args, 0)?;
            Ok(config(Uniform::new(x, y, z)))
        },
    )?;
    world.register_fn(
        "vortex",
        &[Int, Int],
        Cfg,
        "Vortex magnetization with given circulation and core polarization",
        |session: &mut Session, args| {
            let (circ, pol) = (args[0].as_int()?, args[1].as_int()?);
            unit_sign("circulation", circ)?;
            unit_sign("polarization", pol)?;
            Ok(config(Vortex::new(circ, pol, session.mesh().cell.x)))
        },
    )?;
    world.register_fn(
        "twoDomain",
        &[Float, Float, Float, Float, Float, Float, Float, Float, Float],
        Cfg,
        "Two domains (left, wall, right magnetization) separated by a wall at x = 0",
        |session: &mut Session, args| {
            let left = vector_at(args, 0)?;
            let wall = vector_at(args, 3)?;
            let right = vector_at(args, 6)?;
            Ok(config(TwoDomain::new(left, wall, right, session.mesh().cell.x)))
        },
    )?;
    world.register_fn(
        "vortexWall",
        &[Float, Float, Int, Int],
        Cfg,
        "Vortex wall between mx = mleft and mx = mright domains",
        |session: &mut Session, args| {
            let (circ, pol) = (args[2].as_int()?, args[3].as_int()?);
            unit_sign("circulation", circ)?;
            unit_sign("polarization", pol)?;
            let mesh = session.mesh();
            Ok(config(VortexWall::new(
                args[0].as_float()?,
                args[1].as_float()?,
                circ,
                pol,
                mesh.cell.x,
                mesh.world_size().y,
            )))
        },
    )?;
    world.register_fn(
        "translate",
        &[Cfg, Float, Float, Float],
        Cfg,
        "Configuration shifted by (dx, dy, dz)",
        |_, args| {
            let offset = vector_at(args, 1)?;
            Ok(Value::Config(args[0].as_config()?.translate(offset)))
        },
    )?;
    world.register_fn(
        "scale",
        &[Cfg, Float, Float, Float],
        Cfg,
        "Configuration stretched by (sx, sy, sz)",
        |_, args| {
            let factors = vector_at(args, 1)?;
            if factors.cmpeq(DVec3::ZERO).any() {
                return Err(EvalError::invalid("scale factors must be non-zero"));
            }
            Ok(Value::Config(args[0].as_config()?.scale(factors)))
        },
    )?;
    world.register_fn(
        "rotZ",
        &[Cfg, Float],
        Cfg,
        "Configuration rotated by theta radians around the z-axis",
        |_, args| Ok(Value::Config(args[0].as_config()?.rotate_z(args[1].as_float()?))),
    )?;
    world.register_fn(
        "addNoise",
        &[Cfg, Float],
        Cfg,
        "Configuration with random noise of the given amplitude added",
        |_, args| {
            let amplitude = args[1].as_float()?;
            if amplitude < 0.0 {
                return Err(EvalError::invalid("noise amplitude must not be negative"));
            }
            Ok(Value::Config(args[0].as_config()?.add_noise(amplitude)))
        },
    )?;
    world.register_var(
        "m",
        Cfg,
        "Reduced magnetization; assigning a configuration samples it onto the mesh",
        |session: &Session| Value::Config(session.config().clone()),
        |session: &mut Session, value| session.load_config(value.as_config()?.clone()),
    )?;
    Ok(())
}

fn declare_solver(world: &mut World) -> Result<(), RegistryError> {
    use Type::{Float, Int, Vector, Void};

    world.register_fn(
        "setGridSize",
        &[Int, Int, Int],
        Void,
        "Number of cells in x, y, z",
        |session: &mut Session, args| {
            let mut size = [0usize; 3];
            for (slot, arg) in size.iter_mut().zip(args) {
                let n = arg.as_int()?;
                *slot = usize::try_from(n)
                    .map_err(|_| EvalError::invalid(format!("grid size {n} is negative")))?;
            }
            let cell = session.mesh().cell;
            session.set_mesh(Mesh::new(size, cell))?;
            Ok(Value::Void)
        },
    )?;
    world.register_fn(
        "setCellSize",
        &[Float, Float, Float],
        Void,
        "Cell size in x, y, z (m)",
        |session: &mut Session, args| {
            let size = session.mesh().size;
            session.set_mesh(Mesh::new(size, vector_at(args, 0)?))?;
            Ok(Value::Void)
        },
    )?;
    world.register_fn(
        "run",
        &[Float],
        Void,
        "Run the simulation for a time in seconds",
        |session: &mut Session, args| {
            session.run(args[0].as_float()?)?;
            Ok(Value::Void)
        },
    )?;
    world.register_fn(
        "steps",
        &[Int],
        Void,
        "Run the simulation for a number of time steps",
        |session: &mut Session, args| {
            session.take_steps(args[0].as_int()?)?;
            Ok(Value::Void)
        },
    )?;
    world.register_var(
        "alpha",
        Float,
        "Landau-Lifshitz damping constant",
        |session: &Session| Value::Float(session.alpha),
        |session: &mut Session, value| {
            let alpha = value.as_float()?;
            if !alpha.is_finite() || alpha < 0.0 {
                return Err(EvalError::invalid(format!("alpha {alpha} must be >= 0")));
            }
            session.alpha = alpha;
            Ok(())
        },
    )?;
    world.register_var(
        "B_ext",
        Vector,
        "Externally applied field (T)",
        |session: &Session| Value::Vector(session.b_ext),
        |session: &mut Session, value| {
            session.b_ext = value.as_vector()?;
            Ok(())
        },
    )?;
    world.register_var(
        "dt",
        Float,
        "Time step (s)",
        |session: &Session| Value::Float(session.dt),
        |session: &mut Session, value| {
            let dt = value.as_float()?;
            if !dt.is_finite() || dt <= 0.0 {
                return Err(EvalError::invalid(format!("time step {dt} must be positive")));
            }
            session.dt = dt;
            Ok(())
        },
    )?;
    world.register_value("t", Float, "Total simulated time (s)", |session: &Session| {
        Value::Float(session.time())
    })?;
    world.register_value("step", Int, "Total number of time steps taken", |session: &Session| {
        Value::Int(i64::try_from(session.steps()).unwrap_or(i64::MAX))
    })?;
    Ok(())
}

fn declare_misc(world: &mut World) -> Result<(), RegistryError> {
    use Type::{Any, Float, Vector, Void};

    world.register_fn(
        "vector",
        &[Float, Float, Float],
        Vector,
        "Constructs a vector with given components",
        |_, args| Ok(Value::Vector(vector_at(args, 0)?)),
    )?;
    world.register_fn(
        "save",
        &[],
        Void,
        "Save the magnetization to the output directory",
        |session: &mut Session, _| {
            session.save()?;
            Ok(Value::Void)
        },
    )?;
    world.register_fn(
        "tableSave",
        &[],
        Void,
        "Append time and average magnetization to table.txt",
        |session: &mut Session, _| {
            session.table_save()?;
            Ok(Value::Void)
        },
    )?;
    world.register_fn("print", &[Any], Void, "Print a value to standard output", |_, args| {
        println!("{}", args[0]);
        Ok(Value::Void)
    })?;
    world.register_fn(
        "interactive",
        &[],
        Void,
        "Wait for interaction from the control channel",
        |session: &mut Session, _| {
            session.request_interactive();
            Ok(Value::Void)
        },
    )?;
    world.register_const(
        "pi",
        Value::Float(std::f64::consts::PI),
        "Ratio of a circle's circumference to its diameter",
    )?;
    Ok(())
}

fn config(config: impl mx_script::FieldConfig + 'static) -> Value {
    Value::Config(Config::new(config))
}

fn vector_at(args: &[Value], start: usize) -> Result<DVec3, EvalError> {
    let (x, y, z) = vec3_args(args, start)?;
    Ok(DVec3::new(x, y, z))
}

fn vec3_args(args: &[Value], start: usize) -> Result<(f64, f64, f64), EvalError> {
    match args.get(start..start + 3) {
        Some([x, y, z]) => Ok((x.as_float()?, y.as_float()?, z.as_float()?)),
        _ => Err(EvalError::invalid("expected three components")),
    }
}

fn unit_sign(what: &str, value: i64) -> Result<(), EvalError> {
    if value == 1 || value == -1 {
        Ok(())
    } else {
        Err(EvalError::invalid(format!("{what} must be 1 or -1, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceOptions};
    use std::sync::Arc;

    use crate::executor::{ExecutionContext, Executor};
    use mx_script::{compile, CompileErrorKind, EntryKind};

    fn session() -> Session {
        Session::new(Device::open(DeviceOptions::default()).unwrap()).unwrap()
    }

    fn execute(world: &World, session: &mut Session, source: &str) -> Result<(), EvalError> {
        let sequence = compile(source, world).expect("script compiles");
        for statement in sequence.iter() {
            let value = statement.execute(session)?;
            session.on_result(statement, value)?;
        }
        Ok(())
    }

    #[test]
    fn world_lists_every_builtin_once() -> Result<(), RegistryError> {
        let world = build()?;
        let entries = world.entries();
        for name in ["uniform", "vortex", "twodomain", "rotz", "interactive", "m", "pi"] {
            assert!(world.contains(name), "{name} missing");
        }
        let m = entries.iter().find(|e| e.name == "m").expect("m listed");
        assert_eq!(m.kind, EntryKind::Value);
        assert!(m.writable);
        assert!(!world.resolve("t")?.is_writable());
        Ok(())
    }

    #[test]
    fn vortex_arity_is_checked_at_compile_time() -> Result<(), RegistryError> {
        let world = build()?;
        assert!(compile("vortex 1 1", &world).is_ok());
        let err = compile("Vortex 1", &world).unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::Arity { index: 2, .. }));
        Ok(())
    }

    #[test]
    fn bare_configs_and_assignments_set_the_magnetisation() -> Result<(), EvalError> {
        let world = build().unwrap();
        let mut session = session();
        execute(&world, &mut session, "uniform 0 1 0")?;
        assert!((session.average_m() - DVec3::Y).length() < 1e-12);

        execute(&world, &mut session, "m = uniform(0, 0, -2)")?;
        assert!((session.average_m() + DVec3::Z).length() < 1e-12);

        execute(&world, &mut session, "uniform(1, 0, 0).rotz(pi)")?;
        assert!((session.average_m() + DVec3::X).length() < 1e-12);
        Ok(())
    }

    #[test]
    fn chained_combinators_compose() -> Result<(), EvalError> {
        let world = build().unwrap();
        let mut session = session();
        execute(
            &world,
            &mut session,
            "setgridsize 64 32 1\nm = vortex(1, -1).translate(32e-9, 0, 0).rotz(0)",
        )?;
        assert_eq!(session.magnetization().len(), 64 * 32);
        let core = session
            .magnetization()
            .iter()
            .map(|m| m.z)
            .fold(f64::INFINITY, f64::min);
        assert!(core < -0.5, "core polarization should point down, got {core}");
        Ok(())
    }

    #[test]
    fn invalid_arguments_fail_at_run_time() {
        let world = build().unwrap();
        let mut session = session();
        assert!(matches!(
            execute(&world, &mut session, "vortex 2 1"),
            Err(EvalError::InvalidArgument(_))
        ));
        assert!(execute(&world, &mut session, "dt = -1").is_err());
        assert!(execute(&world, &mut session, "setgridsize 0 1 1").is_err());
    }

    #[test]
    fn oversized_grids_fail_the_statement_not_the_worker() -> Result<(), RegistryError> {
        let world = Arc::new(build()?);
        let sequence = compile(
            "uniform 0 1 0\nsetgridsize 4294967296 4294967296 2\nsteps 1",
            &world,
        )
        .expect("script compiles");
        let (mut executor, _handle) = Executor::new(session(), sequence, world, 4);
        let err = executor.run().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.cause, EvalError::InvalidArgument(_)), "{err}");
        let session = executor.context();
        assert_eq!(session.steps(), 0);
        assert!((session.average_m() - DVec3::Y).length() < 1e-12);
        Ok(())
    }

    #[test]
    fn solver_values_round_trip_through_scripts() -> Result<(), EvalError> {
        let world = build().unwrap();
        let mut session = session();
        execute(&world, &mut session, "alpha = 1\nB_ext = vector(0, 0, 0.1)\nsteps 5")?;
        assert_eq!(session.alpha, 1.0);
        assert_eq!(session.b_ext, DVec3::new(0.0, 0.0, 0.1));
        assert_eq!(session.steps(), 5);
        Ok(())
    }
}
