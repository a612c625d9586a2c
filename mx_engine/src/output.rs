use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::DVec3;
use serde::Serialize;

use crate::mesh::Mesh;

pub const TABLE_FILE: &str = "table.txt";

/// Output directory of a run: field snapshots and the data table.
#[derive(Debug)]
pub struct OutputDir {
    path: PathBuf,
    saves: usize,
    table: Option<File>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    time: f64,
    step: u64,
    mesh: &'a Mesh,
    m: Vec<[f64; 3]>,
}

impl OutputDir {
    /// Creates `path`; with `force` an existing directory is wiped first.
    pub fn create(path: &Path, force: bool) -> Result<Self> {
        if force && path.exists() {
            fs::remove_dir_all(path)
                .with_context(|| format!("cleaning output directory {}", path.display()))?;
        }
        fs::create_dir_all(path)
            .with_context(|| format!("creating output directory {}", path.display()))?;
        log::info!("output directory: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            saves: 0,
            table: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Writes `m` as the next numbered JSON snapshot (`m000000.json`, ...).
    pub fn save_field(
        &mut self,
        mesh: &Mesh,
        m: &[DVec3],
        time: f64,
        step: u64,
    ) -> Result<PathBuf> {
        let path = self.path.join(format!("m{:06}.json", self.saves));
        let snapshot = Snapshot {
            time,
            step,
            mesh,
            m: m.iter().map(|v| v.to_array()).collect(),
        };
        let json = serde_json::to_string(&snapshot).context("serializing magnetisation snapshot")?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        self.saves += 1;
        Ok(path)
    }

    /// Appends one `t mx my mz` row, writing the header on first use.
    pub fn append_table(&mut self, time: f64, m: DVec3) -> Result<()> {
        if self.table.is_none() {
            let path = self.path.join(TABLE_FILE);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            writeln!(file, "# t (s)\tmx ()\tmy ()\tmz ()")
                .with_context(|| format!("writing {}", path.display()))?;
            self.table = Some(file);
        }
        if let Some(file) = self.table.as_mut() {
            writeln!(file, "{time:e}\t{:e}\t{:e}\t{:e}", m.x, m.y, m.z)
                .context("writing table row")?;
        }
        Ok(())
    }
}
