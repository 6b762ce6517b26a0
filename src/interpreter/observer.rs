//! Execution observer
//!
//! The observer is threaded through the runtime so a host can follow
//! execution without a global logger. Hooks run synchronously on the thread
//! doing the work and must not block; they never influence control flow.

use tracing::trace;

use super::frames::CallStackId;
use crate::debugger::StateChange;
use crate::program::Stmt;

/// The statement about to run (or just run) on one call stack
#[derive(Debug, Clone, Copy)]
pub struct StatementEvent<'a> {
    pub call_stack: CallStackId,
    pub method: &'a str,
    pub depth: usize,
    pub stmt: &'a Stmt,
}

pub trait ExecutionObserver: Send + Sync {
    fn before_statement(&self, _event: &StatementEvent<'_>) {}

    fn after_statement(&self, _event: &StatementEvent<'_>) {}

    /// Called inside every validated session state transition, in order
    fn state_changed(&self, _change: &StateChange) {}
}

/// Logs every statement at `trace` level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn before_statement(&self, event: &StatementEvent<'_>) {
        let span = event.stmt.span();
        trace!(
            call_stack = %event.call_stack,
            method = event.method,
            depth = event.depth,
            line = span.start_line + 1,
            "{}",
            event.stmt.kind_name()
        );
    }

    fn state_changed(&self, change: &StateChange) {
        trace!(state = %change.state, failed = change.error.is_some(), "state change observed");
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl ExecutionObserver for SilentObserver {}
