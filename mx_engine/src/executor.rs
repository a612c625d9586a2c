//! Interactive executor.
//!
//! The executor owns the execution context and runs a [`StatementSequence`]
//! on the thread that created the context. Other threads talk to it only
//! through an [`ExecutorHandle`], whose requests are queued on a bounded
//! channel and applied by the worker between statements. Injected statements
//! are appended to the tail of the sequence in the order they reach the queue.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use mx_script::{
    compile, CompileError, EvalError, Location, Registry, Statement, StatementSequence, Value,
};
use mx_stream::{ModeLabel, StateSnapshot};
use thiserror::Error;

/// Default capacity of the request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Requests a context can raise while a statement runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Suspend until an operator resumes.
    Interactive,
}

/// State the executor drives statements against.
pub trait ExecutionContext: Sized {
    /// Takes the directive raised by the last statement, if any.
    fn take_directive(&mut self) -> Option<Directive> {
        None
    }

    /// Called with the value of every statement that completed.
    fn on_result(&mut self, _statement: &Statement<Self>, _value: Value) -> Result<(), EvalError> {
        Ok(())
    }

    /// Context view included in state snapshots.
    fn summary(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Running,
    Paused,
    AwaitingInteraction,
    Finished,
    Failed,
}

impl ExecutionMode {
    pub fn label(self) -> ModeLabel {
        match self {
            ExecutionMode::Running => ModeLabel::Running,
            ExecutionMode::Paused => ModeLabel::Paused,
            ExecutionMode::AwaitingInteraction => ModeLabel::AwaitingInteraction,
            ExecutionMode::Finished => ModeLabel::Finished,
            ExecutionMode::Failed => ModeLabel::Failed,
        }
    }
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Error)]
#[error("statement {index} at {location} ({statement:?}) failed: {cause}")]
pub struct RuntimeStatementError {
    pub index: usize,
    pub location: Location,
    pub statement: String,
    #[source]
    pub cause: EvalError,
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("request queue is full")]
    QueueFull,
    #[error("executor is no longer running")]
    Disconnected,
    #[error("executor did not answer within {0:?}")]
    Timeout(Duration),
}

pub enum ControlMessage<C> {
    Inject(StatementSequence<C>),
    Pause,
    Resume,
    Stop,
    KeepOpen(bool),
    Query(mpsc::Sender<StateSnapshot>),
}

pub struct Executor<C> {
    context: C,
    sequence: StatementSequence<C>,
    position: usize,
    mode: ExecutionMode,
    keep_open: bool,
    stop_requested: bool,
    failure: Option<RuntimeStatementError>,
    requests: Receiver<ControlMessage<C>>,
}

impl<C: ExecutionContext> Executor<C> {
    pub fn new(
        context: C,
        sequence: StatementSequence<C>,
        registry: Arc<Registry<C>>,
        queue_capacity: usize,
    ) -> (Self, ExecutorHandle<C>) {
        let (sender, requests) = mpsc::sync_channel(queue_capacity.max(1));
        let executor = Self {
            context,
            sequence,
            position: 0,
            mode: ExecutionMode::Running,
            keep_open: false,
            stop_requested: false,
            failure: None,
            requests,
        };
        (executor, ExecutorHandle { sender, registry })
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }

    /// `Failed` whenever a statement has failed, whatever the operator asked
    /// for afterwards.
    pub fn mode(&self) -> ExecutionMode {
        if self.failure.is_some() {
            ExecutionMode::Failed
        } else {
            self.mode
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn sequence(&self) -> &StatementSequence<C> {
        &self.sequence
    }

    pub fn set_keep_open(&mut self, keep_open: bool) {
        self.keep_open = keep_open;
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mode: self.mode().label(),
            position: self.position,
            length: self.sequence.len(),
            keep_open: self.keep_open,
            stopped: self.stop_requested,
            last_error: self.failure.as_ref().map(ToString::to_string),
            context: self.context.summary(),
        }
    }

    /// Runs until the sequence is exhausted, an operator stops the run or a
    /// statement fails. On failure the context keeps every effect of the
    /// statements that ran before; with keep-open set the executor keeps
    /// answering queries until it is stopped or released, then returns the
    /// failure.
    pub fn run(&mut self) -> Result<RunOutcome, RuntimeStatementError> {
        loop {
            self.drain();
            if self.failure.is_some() && self.keep_open && !self.stop_requested {
                self.wait();
                continue;
            }
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            if self.stop_requested {
                log::info!("stopped by operator at statement {}", self.position);
                self.mode = ExecutionMode::Finished;
                return Ok(RunOutcome::Stopped);
            }
            match self.mode {
                // `failure` carries the failed state and is handled above.
                ExecutionMode::Running | ExecutionMode::Failed => {}
                ExecutionMode::Paused | ExecutionMode::AwaitingInteraction => {
                    self.wait();
                    continue;
                }
                ExecutionMode::Finished => return Ok(RunOutcome::Completed),
            }
            if self.position < self.sequence.len() {
                self.step();
                continue;
            }
            if self.keep_open {
                self.wait();
                continue;
            }
            self.mode = ExecutionMode::Finished;
            log::info!("finished {} statement(s)", self.position);
            return Ok(RunOutcome::Completed);
        }
    }

    fn step(&mut self) {
        let index = self.position;
        let Some(statement) = self.sequence.get(index) else {
            return;
        };
        log::debug!("[{}] {}", statement.location(), statement.source());
        let result = statement
            .execute(&mut self.context)
            .and_then(|value| self.context.on_result(statement, value));
        match result {
            Ok(()) => {
                self.position += 1;
                if let Some(Directive::Interactive) = self.context.take_directive() {
                    log::info!("waiting for interaction after statement {index}");
                    self.mode = ExecutionMode::AwaitingInteraction;
                }
            }
            Err(cause) => {
                let err = RuntimeStatementError {
                    index,
                    location: statement.location(),
                    statement: statement.source().to_string(),
                    cause,
                };
                log::warn!("{err}");
                if self.keep_open {
                    log::info!("run failed; kept open for inspection");
                }
                self.failure = Some(err);
            }
        }
    }

    fn drain(&mut self) {
        while let Ok(message) = self.requests.try_recv() {
            self.apply(message);
        }
    }

    /// Blocks for the next request without giving up the context.
    fn wait(&mut self) {
        match self.requests.recv() {
            Ok(message) => self.apply(message),
            Err(_) => {
                log::warn!("control channel closed while suspended; stopping");
                self.stop_requested = true;
            }
        }
    }

    fn apply(&mut self, message: ControlMessage<C>) {
        match message {
            ControlMessage::Inject(statements) if self.failure.is_some() => {
                log::warn!(
                    "dropping {} injected statement(s); the run has failed",
                    statements.len()
                );
            }
            ControlMessage::Inject(statements) => {
                log::debug!(
                    "injected {} statement(s) at {}",
                    statements.len(),
                    self.sequence.len()
                );
                self.sequence.append(statements);
            }
            ControlMessage::Pause => {
                if self.mode() == ExecutionMode::Running {
                    log::info!("paused at statement {}", self.position);
                    self.mode = ExecutionMode::Paused;
                }
            }
            ControlMessage::Resume => {
                if matches!(
                    self.mode(),
                    ExecutionMode::Paused | ExecutionMode::AwaitingInteraction
                ) {
                    log::info!("resumed at statement {}", self.position);
                    self.mode = ExecutionMode::Running;
                }
            }
            ControlMessage::Stop => self.stop_requested = true,
            ControlMessage::KeepOpen(enabled) => self.keep_open = enabled,
            ControlMessage::Query(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }
}

/// Cloneable, thread-safe way to reach a running [`Executor`].
pub struct ExecutorHandle<C> {
    sender: SyncSender<ControlMessage<C>>,
    registry: Arc<Registry<C>>,
}

impl<C> Clone for ExecutorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<C> ExecutorHandle<C> {
    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    /// Compiles `source` on the calling thread and queues the result.
    /// Compile errors are returned here and never reach the executor.
    pub fn run_statement(&self, source: &str) -> Result<usize, InjectError> {
        let statements = compile(source, &self.registry)?;
        let count = statements.len();
        if count > 0 {
            self.send(ControlMessage::Inject(statements))?;
        }
        Ok(count)
    }

    pub fn pause(&self) -> Result<(), InjectError> {
        self.send(ControlMessage::Pause)
    }

    pub fn resume(&self) -> Result<(), InjectError> {
        self.send(ControlMessage::Resume)
    }

    pub fn stop(&self) -> Result<(), InjectError> {
        self.send(ControlMessage::Stop)
    }

    pub fn keep_open(&self, enabled: bool) -> Result<(), InjectError> {
        self.send(ControlMessage::KeepOpen(enabled))
    }

    /// Asks the worker for a snapshot; answered at the next statement
    /// boundary.
    pub fn query(&self, timeout: Duration) -> Result<StateSnapshot, InjectError> {
        let (reply, answer) = mpsc::channel();
        self.send(ControlMessage::Query(reply))?;
        answer.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => InjectError::Timeout(timeout),
            RecvTimeoutError::Disconnected => InjectError::Disconnected,
        })
    }

    fn send(&self, message: ControlMessage<C>) -> Result<(), InjectError> {
        self.sender.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => InjectError::QueueFull,
            TrySendError::Disconnected(_) => InjectError::Disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use mx_script::Type;

    #[derive(Default)]
    struct Recorder {
        notes: Vec<String>,
        directive: Option<Directive>,
    }

    impl ExecutionContext for Recorder {
        fn take_directive(&mut self) -> Option<Directive> {
            self.directive.take()
        }

        fn summary(&self) -> serde_json::Value {
            serde_json::json!({ "notes": self.notes.len() })
        }
    }

    fn registry() -> Arc<Registry<Recorder>> {
        let mut registry = Registry::new();
        registry
            .register_fn(
                "note",
                &[Type::String],
                Type::Void,
                "record a note",
                |r: &mut Recorder, args| {
                    r.notes.push(args[0].to_string());
                    Ok(Value::Void)
                },
            )
            .unwrap();
        registry
            .register_fn("fail", &[], Type::Void, "always fails", |_: &mut Recorder, _| {
                Err(EvalError::failed("boom"))
            })
            .unwrap();
        registry
            .register_fn("interactive", &[], Type::Void, "wait", |r: &mut Recorder, _| {
                r.directive = Some(Directive::Interactive);
                Ok(Value::Void)
            })
            .unwrap();
        Arc::new(registry)
    }

    fn executor(source: &str) -> (Executor<Recorder>, ExecutorHandle<Recorder>) {
        let registry = registry();
        let sequence = compile(source, &registry).expect("test script compiles");
        Executor::new(Recorder::default(), sequence, registry, 16)
    }

    fn await_state(
        handle: &ExecutorHandle<Recorder>,
        done: impl Fn(&StateSnapshot) -> bool,
    ) -> StateSnapshot {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = handle
                .query(Duration::from_secs(5))
                .expect("executor answers queries");
            if done(&state) {
                return state;
            }
            assert!(Instant::now() < deadline, "state never reached: {state:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn statements_injected_while_paused_run_after_the_script_in_arrival_order() {
        let (mut executor, handle) = executor("note \"a\"\nnote \"b\"");
        handle.pause().unwrap();

        let operator = thread::spawn(move || {
            let paused = await_state(&handle, |s| s.mode == ModeLabel::Paused);
            assert_eq!(paused.context["notes"], 0);
            handle.run_statement("note \"x\"").unwrap();
            handle.run_statement("note \"y\"; note \"z\"").unwrap();
            handle.resume().unwrap();
        });

        assert_eq!(executor.run().unwrap(), RunOutcome::Completed);
        operator.join().unwrap();
        assert_eq!(executor.context().notes, vec!["a", "b", "x", "y", "z"]);
        assert_eq!(executor.mode(), ExecutionMode::Finished);
    }

    #[test]
    fn failure_keeps_earlier_effects() {
        let (mut executor, _handle) = executor("note \"a\"\nfail\nnote \"b\"");
        let err = executor.run().unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.location, Location { line: 2, column: 1 });
        assert_eq!(err.statement, "fail");
        assert_eq!(executor.context().notes, vec!["a"]);
        assert_eq!(executor.mode(), ExecutionMode::Failed);
        assert_eq!(executor.snapshot().mode, ModeLabel::Failed);
    }

    #[test]
    fn failed_runs_stay_inspectable_while_kept_open() {
        let (mut executor, handle) = executor("note \"a\"\nfail\nnote \"b\"");
        executor.set_keep_open(true);

        let operator = thread::spawn(move || {
            let state = await_state(&handle, |s| s.mode == ModeLabel::Failed);
            assert_eq!(state.position, 1);
            assert_eq!(state.context["notes"], 1);
            let error = state.last_error.unwrap_or_default();
            assert!(error.contains("boom"), "{error}");
            handle.run_statement("note \"late\"").unwrap();
            handle.resume().unwrap();
            let state = await_state(&handle, |s| s.length == 3);
            assert_eq!(state.mode, ModeLabel::Failed);
            handle.keep_open(false).unwrap();
        });

        let err = executor.run().unwrap_err();
        operator.join().unwrap();
        assert_eq!(err.statement, "fail");
        assert_eq!(executor.context().notes, vec!["a"]);
        assert_eq!(executor.sequence().len(), 3);
    }

    #[test]
    fn stopping_a_failed_run_returns_the_failure() {
        let (mut executor, handle) = executor("fail");
        executor.set_keep_open(true);

        let operator = thread::spawn(move || {
            await_state(&handle, |s| s.mode == ModeLabel::Failed);
            handle.stop().unwrap();
        });

        let err = executor.run().unwrap_err();
        operator.join().unwrap();
        assert_eq!(err.index, 0);
        assert_eq!(executor.mode(), ExecutionMode::Failed);
    }

    #[test]
    fn compile_errors_stay_with_the_requester() {
        let (mut executor, handle) = executor("note \"a\"");
        assert!(matches!(
            handle.run_statement("note"),
            Err(InjectError::Compile(_))
        ));
        assert_eq!(executor.run().unwrap(), RunOutcome::Completed);
        assert_eq!(executor.sequence().len(), 1);
    }

    #[test]
    fn stop_is_honoured_before_the_next_statement() {
        let (mut executor, handle) = executor("note \"a\"\nnote \"b\"");
        handle.stop().unwrap();
        assert_eq!(executor.run().unwrap(), RunOutcome::Stopped);
        assert!(executor.context().notes.is_empty());
    }

    #[test]
    fn keep_open_waits_for_late_statements() {
        let (mut executor, handle) = executor("note \"a\"");
        handle.keep_open(true).unwrap();

        let operator = thread::spawn(move || {
            await_state(&handle, |s| s.position == s.length && s.keep_open);
            handle.run_statement("note \"late\"").unwrap();
            await_state(&handle, |s| s.position == 2);
            handle.keep_open(false).unwrap();
        });

        assert_eq!(executor.run().unwrap(), RunOutcome::Completed);
        operator.join().unwrap();
        assert_eq!(executor.context().notes, vec!["a", "late"]);
    }

    #[test]
    fn interactive_suspends_until_resumed() {
        let (mut executor, handle) = executor("note \"a\"\ninteractive\nnote \"b\"");

        let operator = thread::spawn(move || {
            let state = await_state(&handle, |s| s.mode == ModeLabel::AwaitingInteraction);
            assert_eq!(state.position, 2);
            assert_eq!(state.context["notes"], 1);
            handle.resume().unwrap();
        });

        assert_eq!(executor.run().unwrap(), RunOutcome::Completed);
        operator.join().unwrap();
        assert_eq!(executor.context().notes, vec!["a", "b"]);
    }

    #[test]
    fn dropping_every_handle_while_paused_stops_the_run() {
        let (mut executor, handle) = executor("note \"a\"");
        handle.pause().unwrap();
        drop(handle);
        assert_eq!(executor.run().unwrap(), RunOutcome::Stopped);
        assert!(executor.context().notes.is_empty());
    }
}
