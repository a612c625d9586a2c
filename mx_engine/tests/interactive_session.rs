use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::DVec3;
use mx_engine::device::{Device, DeviceOptions};
use mx_engine::executor::{Executor, ExecutorHandle, RunOutcome};
use mx_engine::session::Session;
use mx_engine::world;
use mx_script::compile;
use mx_stream::{ModeLabel, StateSnapshot};

/// Builds session and executor on a fresh worker thread, the way `main` does
/// on the process main thread, and hands the executor handle back.
fn spawn_worker(
    script: &'static str,
) -> Result<(
    ExecutorHandle<Session>,
    thread::JoinHandle<Result<(RunOutcome, DVec3)>>,
)> {
    let world = Arc::new(world::build()?);
    let sequence = compile(script, &world)?;
    let (handle_tx, handle_rx) = mpsc::channel();
    let worker = thread::spawn(move || -> Result<(RunOutcome, DVec3)> {
        let device = Device::open(DeviceOptions::default())?;
        let session = Session::new(device)?;
        let (mut executor, handle) = Executor::new(session, sequence, world, 16);
        handle_tx.send(handle).context("handing out executor handle")?;
        let outcome = executor.run()?;
        Ok((outcome, executor.context().average_m()))
    });
    let handle = handle_rx
        .recv_timeout(Duration::from_secs(10))
        .context("worker never started")?;
    Ok((handle, worker))
}

fn wait_for(
    handle: &ExecutorHandle<Session>,
    done: impl Fn(&StateSnapshot) -> bool,
) -> Result<StateSnapshot> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let state = handle.query(Duration::from_secs(5))?;
        if done(&state) {
            return Ok(state);
        }
        anyhow::ensure!(Instant::now() < deadline, "state never reached: {state:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn m_avg(state: &StateSnapshot) -> Option<DVec3> {
    let values = state.context["m_avg"].as_array()?;
    match values.as_slice() {
        [x, y, z] => Some(DVec3::new(x.as_f64()?, y.as_f64()?, z.as_f64()?)),
        _ => None,
    }
}

#[test]
fn interactive_waits_with_first_configuration_loaded() -> Result<()> {
    let (handle, worker) = spawn_worker("uniform 1 0 0\ninteractive\nuniform 0 1 0")?;

    let state = wait_for(&handle, |s| s.mode == ModeLabel::AwaitingInteraction)?;
    assert_eq!(state.position, 2);
    let avg = m_avg(&state).context("m_avg in snapshot")?;
    assert!((avg - DVec3::X).length() < 1e-9, "{avg:?}");

    handle.resume()?;
    let (outcome, avg) = worker.join().expect("worker thread")?;
    assert_eq!(outcome, RunOutcome::Completed);
    assert!((avg - DVec3::Y).length() < 1e-9, "{avg:?}");
    Ok(())
}

#[test]
fn statements_injected_during_interaction_run_before_the_rest_is_released() -> Result<()> {
    let (handle, worker) = spawn_worker("interactive")?;
    wait_for(&handle, |s| s.mode == ModeLabel::AwaitingInteraction)?;

    handle.keep_open(true)?;
    handle.run_statement("m = uniform(0, 0, 1)")?;
    let err = handle.run_statement("m = 3").unwrap_err();
    assert!(err.to_string().contains("expected config"), "{err}");
    handle.resume()?;

    let state = wait_for(&handle, |s| s.position == s.length)?;
    assert_eq!(state.length, 2);
    assert_eq!(state.mode, ModeLabel::Running);
    handle.stop()?;

    let (outcome, avg) = worker.join().expect("worker thread")?;
    assert_eq!(outcome, RunOutcome::Stopped);
    assert!((avg - DVec3::Z).length() < 1e-9, "{avg:?}");
    Ok(())
}
