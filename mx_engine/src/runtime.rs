use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use mx_script::{compile, CompileError, StatementSequence};

use crate::cli::RunArgs;
use crate::control::ControlServer;
use crate::device::{Device, DeviceOptions};
use crate::executor::{Executor, RunOutcome};
use crate::session::Session;
use crate::world::{self, World};

/// Compiles and runs one script on the calling thread, which becomes the
/// device thread for the rest of the run.
pub fn execute(args: RunArgs) -> Result<RunOutcome> {
    let RunArgs {
        script,
        output,
        force,
        control,
        gpu,
        sync,
        keep_open,
        queue_capacity,
    } = args;

    let world = Arc::new(world::build().context("declaring built-in identifiers")?);
    let sequence = compile_file(&script, &world)?;
    log::info!(
        "compiled {} statement(s) from {}",
        sequence.len(),
        script.display()
    );

    let output = output.unwrap_or_else(|| default_output_dir(&script));
    let device = Device::open(DeviceOptions { ordinal: gpu, sync })?;
    let session = Session::new(device)?.with_output(&output, force)?;

    let (mut executor, handle) = Executor::new(session, sequence, world, queue_capacity);
    executor.set_keep_open(keep_open);
    let _server = match control.as_deref() {
        Some(addr) => Some(
            ControlServer::bind(addr, handle, Some(env!("CARGO_PKG_VERSION").to_string()))
                .with_context(|| format!("starting control server on {addr}"))?,
        ),
        None => {
            drop(handle);
            if keep_open {
                log::warn!("--keep-open without a control server; nothing can inject statements");
            }
            None
        }
    };

    let outcome = executor.run();
    let session = executor.context();
    log::info!(
        "t = {:e} s after {} step(s), {} device launch(es)",
        session.time(),
        session.steps(),
        session.device().launches()
    );
    outcome.map_err(|err| anyhow!(err).context(format!("running {}", script.display())))
}

/// Runs each script in turn with its own output directory. A failing script
/// does not keep the rest from running; the batch fails if any script did.
pub fn batch(runs: Vec<RunArgs>) -> Result<()> {
    let total = runs.len();
    let mut failed = 0;
    for run in runs {
        let script = run.script.clone();
        log::info!("batch: {}", script.display());
        match execute(run) {
            Ok(_) => println!("{}: OK", script.display()),
            Err(err) => {
                failed += 1;
                println!("{}: FAILED: {err:#}", script.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {total} script(s) failed");
    }
    Ok(())
}

/// Compiles every file without running anything. Fails when any file does.
pub fn vet(files: &[PathBuf]) -> Result<()> {
    let world = world::build().context("declaring built-in identifiers")?;
    let mut failed = 0;
    for file in files {
        match compile_file(file, &world) {
            Ok(sequence) => println!("{}: OK ({} statement(s))", file.display(), sequence.len()),
            Err(err) => {
                failed += 1;
                println!("{err:#}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} file(s) failed to compile", files.len());
    }
    Ok(())
}

pub fn list_api() -> Result<()> {
    let world = world::build().context("declaring built-in identifiers")?;
    let json =
        serde_json::to_string_pretty(&world.entries()).context("serializing registry entries")?;
    println!("{json}");
    Ok(())
}

pub fn compile_file(path: &Path, world: &World) -> Result<StatementSequence<Session>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    compile(&source, world).map_err(|err| anyhow!(describe_compile_error(path, &err)))
}

/// `file:line:column: message` followed by the offending line.
pub fn describe_compile_error(path: &Path, err: &CompileError) -> String {
    format!(
        "{}:{}:{}: {}\n    {}",
        path.display(),
        err.location.line,
        err.location.column,
        err.kind,
        err.line_text.trim_end()
    )
}

/// `relax.mx3` -> `relax.out`, next to the script.
pub fn default_output_dir(script: &Path) -> PathBuf {
    script.with_extension("out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_replaces_the_extension() {
        assert_eq!(
            default_output_dir(Path::new("runs/relax.mx3")),
            PathBuf::from("runs/relax.out")
        );
        assert_eq!(
            default_output_dir(Path::new("plain")),
            PathBuf::from("plain.out")
        );
    }

    #[test]
    fn compile_errors_name_file_line_and_column() -> Result<()> {
        let world = world::build()?;
        let err = compile("uniform 1 0 0\nvortex 1", &world).unwrap_err();
        let text = describe_compile_error(Path::new("bad.mx3"), &err);
        assert!(text.starts_with("bad.mx3:2:"), "{text}");
        assert!(text.ends_with("vortex 1"), "{text}");
        Ok(())
    }
}
