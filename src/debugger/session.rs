//! Debug/release sessions
//!
//! A [`Session`] owns one program run from preparation to termination:
//!
//! 1. **Preparing**: lower the program, load its assemblies, initialize
//!    globals and resolve the single entry point
//! 2. **Running**: invoke the entry point on its own call stack
//! 3. **Idle**: the entry point returned and nothing it started is still in
//!    flight; the host may still call into the program
//! 4. **Stopped**: `stop()`, or automatically after Idle unless
//!    `session.keep_alive` is set
//!
//! Program execution happens on tokio's blocking pool; every public method
//! here can be called from any task while a run is in progress.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::{SessionState, StateChange};
use crate::config::Config;
use crate::interpreter::errors::{ErrorKind, ExecResult, RuntimeError, Unwind};
use crate::interpreter::frames::CallStackId;
use crate::interpreter::host::HostInterop;
use crate::interpreter::observer::{ExecutionObserver, SilentObserver, TracingObserver};
use crate::interpreter::runtime::{Controls, Runtime};
use crate::interpreter::value::Val;
use crate::optimizer::{diagnostics, optimize, Diagnostic, OptimizerOptions, Severity};
use crate::program::{Method, Program, Shape};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("session has not been started")]
    NotStarted,

    #[error("session has terminated")]
    Terminated,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("execution was cancelled")]
    Cancelled,

    #[error("invocation task failed: {0}")]
    Join(#[from] JoinError),
}

/// Debug sessions honour breakpoints; release sessions ignore them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Debug,
    Release,
}

#[derive(Clone, Default)]
pub struct SessionOptions {
    pub config: Config,
    /// Replaces the observer selected by `session.trace_statements`
    pub observer: Option<Arc<dyn ExecutionObserver>>,
}

impl SessionOptions {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Result of [`Session::invoke_method`]
#[derive(Debug)]
pub enum Invocation {
    /// A synchronous method, already finished
    Value(Val),
    /// An asynchronous method, still running
    Task(JoinHandle<Result<Val, SessionError>>),
}

impl Invocation {
    /// Wait for the result whichever way the method ran
    pub async fn into_value(self) -> Result<Val, SessionError> {
        match self {
            Invocation::Value(value) => Ok(value),
            Invocation::Task(handle) => handle.await?,
        }
    }
}

pub struct Session {
    program: Arc<Program>,
    host: Arc<dyn HostInterop>,
    config: Config,
    controls: Controls,
    runtime: Mutex<Option<Arc<Runtime>>>,
}

impl Session {
    pub fn new(program: Program, host: Arc<dyn HostInterop>, config: Config) -> Self {
        Self::with_options(program, host, SessionOptions::new(config))
    }

    pub fn with_options(program: Program, host: Arc<dyn HostInterop>, options: SessionOptions) -> Self {
        let observer: Arc<dyn ExecutionObserver> = match options.observer {
            Some(observer) => observer,
            None if options.config.session.trace_statements => Arc::new(TracingObserver),
            None => Arc::new(SilentObserver),
        };

        Self {
            program: Arc::new(program),
            host,
            config: options.config,
            controls: Controls::new(observer),
            runtime: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.controls.machine.current()
    }

    /// Every state transition from now on, in order
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.controls.machine.subscribe()
    }

    /// The prepared runtime, once the session got past Preparing
    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.lock().clone()
    }

    /* ===================== Breakpoints ===================== */

    /// Break before statements starting on `line` (0-indexed)
    pub fn set_breakpoint(&self, line: usize) -> bool {
        self.controls.gate.set_breakpoint(line)
    }

    pub fn clear_breakpoint(&self, line: usize) -> bool {
        self.controls.gate.clear_breakpoint(line)
    }

    pub fn clear_breakpoints(&self) {
        self.controls.gate.clear_breakpoints();
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        self.controls.gate.breakpoints()
    }

    /* ===================== Lifecycle ===================== */

    pub async fn start_debug(&self, args: Vec<String>) -> Result<Val, SessionError> {
        self.start(Mode::Debug, args).await
    }

    pub async fn start_release(&self, args: Vec<String>) -> Result<Val, SessionError> {
        self.start(Mode::Release, args).await
    }

    /// Prepare, run the entry point and wait for everything it started.
    /// Returns the entry point's result.
    async fn start(&self, mode: Mode, args: Vec<String>) -> Result<Val, SessionError> {
        let machine = &self.controls.machine;
        if !machine.transition(SessionState::Preparing) {
            return Err(SessionError::InvalidState {
                operation: "start",
                state: machine.current(),
            });
        }
        self.controls.gate.set_debug_mode(mode == Mode::Debug);
        info!(?mode, methods = self.program.methods.len(), "session starting");

        let (runtime, entry) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(err) => {
                self.controls.fail(&err);
                return Err(err.into());
            }
        };
        *self.runtime.lock() = Some(Arc::clone(&runtime));

        let id = CallStackId::new();
        let tracker = Arc::clone(&self.controls.tracker);
        tracker.set_entry_active(true);
        let guard = tracker.task_started(id);

        if !machine.transition(SessionState::Running) {
            // Stopped while preparing
            tracker.set_entry_active(false);
            return Err(SessionError::Cancelled);
        }

        let args = if entry.params.is_empty() {
            Vec::new()
        } else {
            vec![Val::array(args.into_iter().map(Val::Str).collect())]
        };

        let task_runtime = Arc::clone(&runtime);
        let outcome = tokio::task::spawn_blocking(move || {
            task_runtime.run_task(id, &entry, args, guard)
        })
        .await;

        tracker.set_entry_active(false);
        runtime.refresh_idle();
        tracker.drain(id).await;
        runtime.refresh_idle();
        debug!(state = %machine.current(), "entry point finished");

        if !self.config.session.keep_alive {
            self.stop().await;
        }

        match outcome {
            Ok(result) => into_session_result(result),
            Err(join) => {
                self.controls
                    .fail(&RuntimeError::new(ErrorKind::Unexpected, join.to_string()));
                Err(join.into())
            }
        }
    }

    /// Preparation runs on the blocking pool; global initializers are
    /// program code.
    async fn prepare(&self) -> Result<(Arc<Runtime>, Method), RuntimeError> {
        let program = Arc::clone(&self.program);
        let host = Arc::clone(&self.host);
        let controls = self.controls.clone();
        let config = self.config.clone();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || prepare_runtime(&program, host, controls, &config, handle))
            .await
            .map_err(|join| RuntimeError::new(ErrorKind::Unexpected, join.to_string()))?
    }

    /// Cancel all execution, wait for every call stack to wind down, then
    /// enter Stopped (unless the session already failed)
    pub async fn stop(&self) {
        self.controls.gate.cancel();
        self.controls.tracker.drain_all().await;

        let machine = &self.controls.machine;
        if !machine.current().is_terminal() {
            machine.transition(SessionState::Stopped);
        }
        info!(state = %machine.current(), "session stopped");
    }

    /* ===================== Stepping ===================== */

    /// Pause at the next statement boundary. Pausing before `start` stops
    /// at the entry point's first statement.
    pub fn pause(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(SessionError::Terminated);
        }
        self.controls.gate.pause(&self.controls.machine);
        Ok(())
    }

    /// Run exactly one statement, then pause again
    pub fn next_step(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Paused || self.controls.tracker.is_idle_candidate() {
            return Err(SessionError::InvalidState {
                operation: "step",
                state,
            });
        }
        if !self.controls.gate.step(&self.controls.machine) {
            return Err(SessionError::InvalidState {
                operation: "step",
                state: self.state(),
            });
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        if self.state().is_terminal() {
            return Err(SessionError::Terminated);
        }
        self.controls
            .gate
            .release(&self.controls.machine, &self.controls.tracker);
        Ok(())
    }

    /* ===================== Host calls ===================== */

    /// Call a program method from the host on a fresh call stack.
    ///
    /// Synchronous methods run to completion before this returns;
    /// asynchronous ones come back as a task. `host_initiated` calls keep
    /// the session out of Idle until they finish.
    pub async fn invoke_method(
        &self,
        host_initiated: bool,
        name: &str,
        args: Vec<Val>,
    ) -> Result<Invocation, SessionError> {
        let runtime = self.runtime().ok_or(SessionError::NotStarted)?;
        if self.state().is_terminal() {
            return Err(SessionError::Terminated);
        }
        let method = runtime.program().method(name).cloned().ok_or_else(|| {
            RuntimeError::new(
                ErrorKind::MethodNotFound,
                format!("method '{}' not found", name),
            )
        })?;

        let id = CallStackId::new();
        let tracker = Arc::clone(&self.controls.tracker);
        if host_initiated {
            tracker.extern_started();
        }
        let guard = tracker.task_started(id);
        self.controls.machine.activate();
        debug!(call_stack = %id, method = name, is_async = method.is_async, "host invocation");

        let is_async = method.is_async;
        let task_runtime = Arc::clone(&runtime);
        let blocking = tokio::task::spawn_blocking(move || {
            task_runtime.run_task(id, &method, args, guard)
        });

        if is_async {
            let handle = tokio::spawn(async move {
                let outcome = blocking.await;
                finish_invocation(&runtime, id, host_initiated).await;
                joined(outcome)
            });
            return Ok(Invocation::Task(handle));
        }

        let outcome = blocking.await;
        finish_invocation(&runtime, id, host_initiated).await;
        joined(outcome).map(Invocation::Value)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("methods", &self.program.methods.len())
            .finish()
    }
}

async fn finish_invocation(runtime: &Runtime, id: CallStackId, host_initiated: bool) {
    let tracker = &runtime.controls.tracker;
    if host_initiated {
        tracker.extern_finished();
    }
    runtime.refresh_idle();
    tracker.drain(id).await;
    runtime.refresh_idle();
}

fn into_session_result(result: ExecResult<Val>) -> Result<Val, SessionError> {
    match result {
        Ok(value) => Ok(value),
        Err(Unwind::Error(err)) => Err(SessionError::Runtime(*err)),
        Err(Unwind::Cancelled) => Err(SessionError::Cancelled),
    }
}

fn joined(outcome: Result<ExecResult<Val>, JoinError>) -> Result<Val, SessionError> {
    outcome.map_err(SessionError::Join).and_then(into_session_result)
}

/* ===================== Preparation ===================== */

fn prepare_runtime(
    program: &Program,
    host: Arc<dyn HostInterop>,
    controls: Controls,
    config: &Config,
    handle: Handle,
) -> Result<(Arc<Runtime>, Method), RuntimeError> {
    let optimized = optimize(program, &OptimizerOptions::from(&config.optimizer));
    for diagnostic in &optimized.diagnostics {
        match diagnostic.severity {
            Severity::Error => warn!("{}", diagnostic),
            Severity::Warning | Severity::Info => debug!("{}", diagnostic),
        }
    }
    if let Some(first) = optimized.errors().next() {
        return Err(diagnostic_error(first));
    }

    for assembly in &optimized.program.assemblies {
        host.load_assembly(assembly)?;
    }

    let runtime = Runtime::new(
        Arc::new(optimized.program),
        host,
        controls,
        config.interpreter.clone(),
        handle,
    );
    runtime.initialize_globals()?;

    let entry = entry_point(runtime.program())?.clone();
    Ok((runtime, entry))
}

/// The runtime failure a blocking diagnostic turns into
fn diagnostic_error(diagnostic: &Diagnostic) -> RuntimeError {
    let kind = match diagnostic.code {
        diagnostics::UNRESOLVED_METHOD => ErrorKind::MethodNotFound,
        diagnostics::ARITY_MISMATCH => ErrorKind::BadArgument,
        diagnostics::BREAK_OUTSIDE_LOOP => ErrorKind::IllegalStatement,
        _ => ErrorKind::Unexpected,
    };
    RuntimeError::new(kind, diagnostic.message.clone()).at(diagnostic.span, diagnostic.code)
}

/// Exactly one synchronous entry point taking nothing or an argument array
fn entry_point(program: &Program) -> Result<&Method, RuntimeError> {
    let entries: Vec<&Method> = program.entry_points().collect();
    let entry = match entries.as_slice() {
        [] => {
            return Err(RuntimeError::new(
                ErrorKind::MissingEntryPoint,
                "program has no entry point",
            ))
        }
        [entry] => *entry,
        several => {
            let names: Vec<&str> = several.iter().map(|m| m.name.as_str()).collect();
            return Err(RuntimeError::new(
                ErrorKind::SeveralEntryPoint,
                format!("program has several entry points: {}", names.join(", ")),
            ));
        }
    };

    if entry.is_async {
        return Err(RuntimeError::new(
            ErrorKind::MissingEntryPoint,
            format!("entry point '{}' must not be async", entry.name),
        ));
    }
    match entry.params.as_slice() {
        [] => Ok(entry),
        [param] if param.shape == Shape::Array => Ok(entry),
        _ => Err(RuntimeError::bad_argument(format!(
            "entry point '{}' must take no parameters or one argument array",
            entry.name
        ))),
    }
}
