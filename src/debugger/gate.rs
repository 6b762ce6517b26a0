//! Pause gate and breakpoints
//!
//! Every engine passes through [`Gate::checkpoint`] before each statement.
//! Pausing is cooperative: `pause` only arms a flag, and an engine that finds
//! the flag armed blocks on a condition variable (reporting `Paused` with its
//! call stack) until it is released, granted a step, or cancelled.
//!
//! Lock order is gate, then state machine, then tracker.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::state::StateMachine;
use super::SessionState;
use crate::interpreter::errors::Unwind;
use crate::interpreter::frames::DebugInfo;
use crate::interpreter::tracker::Tracker;
use crate::program::Stmt;

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    /// Statements that may run before blocking again
    budget: usize,
    cancelled: bool,
}

#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    wake: Condvar,
    /// 0-indexed source lines, as in `Span`
    breakpoints: Mutex<BTreeSet<usize>>,
    debug_mode: AtomicBool,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breakpoints only fire in debug sessions
    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn set_breakpoint(&self, line: usize) -> bool {
        self.breakpoints.lock().insert(line)
    }

    pub fn clear_breakpoint(&self, line: usize) -> bool {
        self.breakpoints.lock().remove(&line)
    }

    pub fn clear_breakpoints(&self) {
        self.breakpoints.lock().clear();
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        self.breakpoints.lock().iter().copied().collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Called before every statement. Blocks while paused; fails with
    /// `Cancelled` once the session is stopping.
    pub fn checkpoint(
        &self,
        stmt: &Stmt,
        machine: &StateMachine,
        capture: impl FnOnce() -> DebugInfo,
    ) -> Result<(), Unwind> {
        let mut gate = self.state.lock();
        if gate.cancelled {
            return Err(Unwind::Cancelled);
        }

        if self.hits_breakpoint(stmt) {
            debug!(line = stmt.span().start_line + 1, "breakpoint hit");
            gate.armed = true;
        }

        if !gate.armed {
            return Ok(());
        }
        if gate.budget > 0 {
            gate.budget -= 1;
            return Ok(());
        }

        machine.pause_with(capture());

        loop {
            self.wake.wait(&mut gate);
            if gate.cancelled {
                return Err(Unwind::Cancelled);
            }
            if !gate.armed {
                return Ok(());
            }
            if gate.budget > 0 {
                gate.budget -= 1;
                return Ok(());
            }
        }
    }

    fn hits_breakpoint(&self, stmt: &Stmt) -> bool {
        if !self.debug_mode.load(Ordering::SeqCst) || stmt.is_jump_plumbing() {
            return false;
        }
        let span = stmt.span();
        !span.is_synthetic() && self.breakpoints.lock().contains(&span.start_line)
    }

    /// Arm the pause flag. An idle session pauses immediately.
    pub fn pause(&self, machine: &StateMachine) {
        let mut gate = self.state.lock();
        gate.armed = true;
        if machine.current() == SessionState::Idle {
            machine.transition(SessionState::Paused);
        }
    }

    /// Let exactly one more statement run, then pause again
    pub fn step(&self, machine: &StateMachine) -> bool {
        let mut gate = self.state.lock();
        if machine.current() != SessionState::Paused {
            return false;
        }
        gate.budget += 1;
        machine.transition(SessionState::Running);
        self.wake.notify_all();
        true
    }

    /// Clear the pause flag and wake every blocked engine
    pub fn release(&self, machine: &StateMachine, tracker: &Tracker) {
        let mut gate = self.state.lock();
        gate.armed = false;
        gate.budget = 0;
        if machine.current() == SessionState::Paused {
            let next = if tracker.is_idle_candidate() {
                SessionState::Idle
            } else {
                SessionState::Running
            };
            machine.transition(next);
        }
        self.wake.notify_all();
    }

    /// Make every engine stop at its next checkpoint
    pub fn cancel(&self) {
        let mut gate = self.state.lock();
        gate.cancelled = true;
        self.wake.notify_all();
    }
}
