//! Test helpers for engine tests
//!
//! A [`Harness`] owns a tokio runtime (for asynchronous program calls), the
//! standard host, and a prepared [`Runtime`] with a silent observer.

use std::sync::Arc;

use crate::config::InterpreterConfig;
use crate::interpreter::errors::{ExecResult, RuntimeError, Unwind};
use crate::interpreter::frames::CallStackId;
use crate::interpreter::host::{HostInterop, StdHost};
use crate::interpreter::observer::SilentObserver;
use crate::interpreter::runtime::{Controls, Runtime};
use crate::interpreter::value::Val;
use crate::optimizer::{optimize, OptimizerOptions};
use crate::program::{Program, Span, Stmt};

pub struct Harness {
    pub rt: tokio::runtime::Runtime,
    pub host: Arc<StdHost>,
    pub runtime: Arc<Runtime>,
}

impl Harness {
    /// Lower `program` with default options, then prepare it
    pub fn new(program: Program) -> Self {
        Self::with_settings(program, InterpreterConfig::default())
    }

    pub fn with_settings(program: Program, settings: InterpreterConfig) -> Self {
        let optimized = optimize(&program, &OptimizerOptions::default());
        assert!(
            !optimized.has_errors(),
            "program has errors: {:?}",
            optimized.diagnostics
        );
        Self::prepare(optimized.program, settings)
    }

    /// Run `program` as given, structured statements and all
    pub fn raw(program: Program) -> Self {
        Self::prepare(program, InterpreterConfig::default())
    }

    pub fn raw_with_settings(program: Program, settings: InterpreterConfig) -> Self {
        Self::prepare(program, settings)
    }

    fn prepare(program: Program, settings: InterpreterConfig) -> Self {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build tokio runtime");
        let host = Arc::new(StdHost::new());
        let runtime = Runtime::new(
            Arc::new(program),
            Arc::clone(&host) as Arc<dyn HostInterop>,
            Controls::new(Arc::new(SilentObserver)),
            settings,
            rt.handle().clone(),
        );
        runtime
            .initialize_globals()
            .expect("Global initialization failed");
        Self { rt, host, runtime }
    }

    pub fn run(&self, method: &str, args: Vec<Val>) -> ExecResult<Val> {
        self.run_on(CallStackId::new(), method, args)
    }

    pub fn run_on(&self, id: CallStackId, method: &str, args: Vec<Val>) -> ExecResult<Val> {
        let method = self
            .runtime
            .program()
            .method(method)
            .cloned()
            .expect("Method not found in program");
        self.runtime.invoke(id, &method, args)
    }

    /// Run and expect a value
    pub fn value(&self, method: &str, args: Vec<Val>) -> Val {
        match self.run(method, args) {
            Ok(value) => value,
            Err(Unwind::Error(err)) => panic!("{} failed: {}", method, err),
            Err(Unwind::Cancelled) => panic!("{} was cancelled", method),
        }
    }

    /// Run and expect a runtime error
    pub fn error(&self, method: &str, args: Vec<Val>) -> RuntimeError {
        match self.run(method, args) {
            Err(Unwind::Error(err)) => *err,
            Err(Unwind::Cancelled) => panic!("{} was cancelled", method),
            Ok(value) => panic!("{} returned {} instead of failing", method, value),
        }
    }

    pub fn console(&self) -> Vec<String> {
        self.host.console_output()
    }

    pub fn global(&self, name: &str) -> Val {
        self.runtime
            .globals()
            .get(name)
            .expect("Global not declared")
            .value()
    }
}

pub fn label(name: &str) -> Stmt {
    Stmt::Label {
        name: name.to_string(),
        span: Span::default(),
    }
}

pub fn goto(name: &str) -> Stmt {
    Stmt::Goto {
        label: name.to_string(),
        span: Span::default(),
    }
}
