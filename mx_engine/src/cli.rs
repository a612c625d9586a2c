use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;

use crate::control::DEFAULT_CONTROL_ADDR;
use crate::executor::DEFAULT_QUEUE_CAPACITY;

#[derive(Parser, Debug)]
#[command(
    about = "Runs micromagnetic scripts with a remote control channel",
    version
)]
pub struct Args {
    /// Script files; several are run one after another
    pub files: Vec<PathBuf>,

    /// Check input files for errors, but don't run them
    #[arg(long)]
    pub vet: bool,

    /// Print the registered identifiers as JSON and exit
    #[arg(long)]
    pub list_api: bool,

    /// Override output directory (default: <script>.out)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Force start, clean existing output directory
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Address of the control server; empty to disable it
    #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
    pub control: String,

    /// Device ordinal to run on
    #[arg(long, default_value_t = 0)]
    pub gpu: usize,

    /// Synchronise after every device launch (debug)
    #[arg(long)]
    pub sync: bool,

    /// Keep accepting injected statements after the script ends
    #[arg(long)]
    pub keep_open: bool,

    /// Capacity of the control request queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Don't generate any log info
    #[arg(short = 's', long)]
    pub silent: bool,
}

#[derive(Debug)]
pub struct Cli {
    pub command: Command,
    pub silent: bool,
}

#[derive(Debug)]
pub enum Command {
    Run(RunArgs),
    /// Several scripts run in turn, unattended.
    Batch(Vec<RunArgs>),
    Vet(Vec<PathBuf>),
    ListApi,
}

#[derive(Debug)]
pub struct RunArgs {
    pub script: PathBuf,
    pub output: Option<PathBuf>,
    pub force: bool,
    pub control: Option<String>,
    pub gpu: usize,
    pub sync: bool,
    pub keep_open: bool,
    pub queue_capacity: usize,
}

pub fn parse() -> Result<Cli> {
    Args::parse().into_cli()
}

impl Args {
    pub fn into_cli(self) -> Result<Cli> {
        let silent = self.silent;
        let command = self.into_command()?;
        Ok(Cli { command, silent })
    }

    fn into_command(self) -> Result<Command> {
        if self.list_api {
            if self.vet || !self.files.is_empty() {
                bail!("--list-api takes no script files");
            }
            return Ok(Command::ListApi);
        }
        if self.vet {
            if self.files.is_empty() {
                bail!("--vet needs at least one script file");
            }
            return Ok(Command::Vet(self.files));
        }
        if self.queue_capacity == 0 {
            bail!("--queue-capacity must be at least 1");
        }
        match self.files.len() {
            0 => bail!("no script file given"),
            1 => {
                let control = Some(self.control.clone()).filter(|addr| !addr.trim().is_empty());
                let output = self.output.clone();
                Ok(Command::Run(self.run_args(&self.files[0], output, control)))
            }
            _ => {
                if self.output.is_some() {
                    bail!("-o/--output needs a single script; batch runs write <script>.out");
                }
                if self.keep_open {
                    bail!("--keep-open needs a single script");
                }
                // Batch runs are unattended: no control server, default output.
                let runs = self
                    .files
                    .iter()
                    .map(|script| self.run_args(script, None, None))
                    .collect();
                Ok(Command::Batch(runs))
            }
        }
    }

    fn run_args(
        &self,
        script: &Path,
        output: Option<PathBuf>,
        control: Option<String>,
    ) -> RunArgs {
        RunArgs {
            script: script.to_path_buf(),
            output,
            force: self.force,
            control,
            gpu: self.gpu,
            sync: self.sync,
            keep_open: self.keep_open,
            queue_capacity: self.queue_capacity,
        }
    }
}
