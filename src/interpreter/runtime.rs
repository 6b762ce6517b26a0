//! Shared execution context
//!
//! A [`Runtime`] is built once a program is prepared and shared (behind an
//! `Arc`) by every call stack of the session: the lowered program, globals,
//! the host, and the session controls (state machine, pause gate, tracker).

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use super::engine::Engine;
use super::errors::{ExecResult, RuntimeError, Unwind};
use super::frames::{CallStack, CallStackId, DebugInfo};
use super::host::HostInterop;
use super::memory::{Globals, Variable};
use super::observer::ExecutionObserver;
use super::tracker::{PendingGuard, Tracker};
use super::value::Val;
use crate::config::InterpreterConfig;
use crate::debugger::{ErrorSnapshot, Gate, StateMachine};
use crate::program::{Method, Program};

/// Session-wide control objects, created before any program is prepared
#[derive(Clone)]
pub struct Controls {
    pub machine: Arc<StateMachine>,
    pub gate: Arc<Gate>,
    pub tracker: Arc<Tracker>,
    pub observer: Arc<dyn ExecutionObserver>,
}

impl Controls {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        Self {
            machine: Arc::new(StateMachine::new(Arc::clone(&observer))),
            gate: Arc::new(Gate::new()),
            tracker: Tracker::new(),
            observer,
        }
    }

    /// End the session with this failure. Only the first one is kept.
    pub fn fail(&self, err: &RuntimeError) {
        if self.machine.fail(ErrorSnapshot::from(err)) {
            warn!(kind = %err.kind, node = ?err.node, "execution failed: {}", err.message);
        }
        self.gate.cancel();
    }
}

pub struct Runtime {
    pub(crate) program: Arc<Program>,
    pub(crate) globals: Globals,
    pub(crate) host: Arc<dyn HostInterop>,
    pub(crate) controls: Controls,
    pub(crate) settings: InterpreterConfig,
    handle: Handle,
}

impl Runtime {
    pub fn new(
        program: Arc<Program>,
        host: Arc<dyn HostInterop>,
        controls: Controls,
        settings: InterpreterConfig,
        handle: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            program,
            globals: Globals::new(),
            host,
            controls,
            settings,
            handle,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Evaluate global declarations in order; later initializers see
    /// earlier globals.
    pub fn initialize_globals(self: &Arc<Self>) -> Result<(), RuntimeError> {
        for decl in &self.program.globals {
            let variable = Arc::new(Variable::new(decl.name.clone(), decl.shape));
            if let Some(init) = &decl.init {
                let mut engine = Engine::new(Arc::clone(self), CallStack::new(CallStackId::new()));
                let value = engine.eval(init).map_err(|unwind| match unwind {
                    Unwind::Error(err) => (*err).at(decl.span, "global-variable"),
                    Unwind::Cancelled => RuntimeError::internal("stopped while initializing globals"),
                })?;
                variable.set_value(value)?;
            }
            self.globals.declare(variable);
        }
        Ok(())
    }

    /// Run `method` to completion on a fresh call stack arena for `id`
    pub fn invoke(self: &Arc<Self>, id: CallStackId, method: &Method, args: Vec<Val>) -> ExecResult<Val> {
        Engine::new(Arc::clone(self), CallStack::new(id)).invoke(method, args)
    }

    /// Body of every background invocation: run, release the pending
    /// guard, report a failure, then let the session re-check idleness.
    pub fn run_task(
        self: &Arc<Self>,
        id: CallStackId,
        method: &Method,
        args: Vec<Val>,
        guard: PendingGuard,
    ) -> ExecResult<Val> {
        let result = self.invoke(id, method, args);
        drop(guard);
        if let Err(Unwind::Error(err)) = &result {
            self.fail(err);
        }
        self.refresh_idle();
        result
    }

    /// Start an asynchronous program method as fire-and-forget work on `id`
    pub fn spawn_tracked(self: &Arc<Self>, id: CallStackId, method: Method, args: Vec<Val>) {
        let guard = self.controls.tracker.task_started(id);
        let runtime = Arc::clone(self);
        let handle = self.handle.spawn_blocking(move || {
            let _ = runtime.run_task(id, &method, args, guard);
        });
        self.controls.tracker.track(id, handle);
    }

    pub fn fail(&self, err: &RuntimeError) {
        self.controls.fail(err);
    }

    pub fn refresh_idle(&self) {
        self.controls.machine.refresh_idle(&self.controls.tracker);
    }

    pub fn capture(&self, stack: &CallStack) -> DebugInfo {
        stack.capture(&self.globals)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("methods", &self.program.methods.len())
            .field("settings", &self.settings)
            .finish()
    }
}
