//! # Debugger
//!
//! The session layer a host drives: lifecycle state machine, cooperative
//! pause/step gate, breakpoints and the [`Session`] API.
//!
//! ```text
//! Ready ──► Preparing ──► Running ◄──► Idle
//!                           │  ▲        │  ▲
//!                           ▼  │        ▼  │
//!                           Paused ◄────┘  │
//!                              └───────────┘
//! any state ──► Stopped | StoppedWithError (terminal)
//! ```

pub mod gate;
pub mod session;
pub mod state;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::interpreter::errors::{ErrorKind, RuntimeError};
use crate::interpreter::frames::DebugInfo;
use crate::program::Span;

pub use gate::Gate;
pub use session::{Invocation, Mode, Session, SessionError, SessionOptions};
pub use state::StateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Ready,
    Preparing,
    Running,
    Idle,
    Paused,
    Stopped,
    StoppedWithError,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::StoppedWithError)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() || *self == next {
            return false;
        }
        match next {
            Stopped | StoppedWithError => true,
            Preparing => *self == Ready,
            Running => matches!(self, Preparing | Idle | Paused),
            Idle => matches!(self, Running | Paused),
            Paused => matches!(self, Running | Idle),
            Ready => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The failure that ended a session
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSnapshot {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
    pub node: Option<String>,
    pub debug_info: Option<DebugInfo>,
    pub occurred_at: DateTime<Utc>,
}

impl From<&RuntimeError> for ErrorSnapshot {
    fn from(err: &RuntimeError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            span: err.span,
            node: err.node.clone(),
            debug_info: err.debug_info.as_deref().cloned(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for ErrorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let (Some(node), Some(span)) = (&self.node, &self.span) {
            write!(f, " (in {} at {})", node, span)?;
        }
        Ok(())
    }
}

/// Published on every state transition
#[derive(Debug, Clone)]
pub struct StateChange {
    pub state: SessionState,
    /// Set when entering StoppedWithError
    pub error: Option<Arc<ErrorSnapshot>>,
    /// Set when entering Paused from a blocked engine, or with an error
    pub debug_info: Option<Arc<DebugInfo>>,
}
