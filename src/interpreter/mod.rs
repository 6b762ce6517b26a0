//! # Interpreter
//!
//! Executes lowered programs.
//!
//! ## Pieces
//!
//! - `value` / `memory` - runtime values, shape-checked variables, scopes
//! - `frames` - per-call-stack frames and debug snapshots
//! - `engine` / `expressions` - the block loop and evaluation
//! - `host` - the boundary to everything outside the program
//! - `tracker` - outstanding asynchronous work, per call stack
//! - `runtime` - the shared context every engine of a session runs against
//!
//! Each call stack runs on one thread at a time. Asynchronous program calls
//! and host invocations get call stacks of their own, run on tokio's
//! blocking pool, and share globals through the [`Runtime`].

pub mod engine;
pub mod errors;
mod expressions;
pub mod frames;
pub mod host;
pub mod memory;
pub mod observer;
pub mod runtime;
pub mod tracker;
pub mod value;

#[cfg(test)]
mod tests;

pub use engine::{BlockState, Engine};
pub use errors::{ErrorKind, ExecResult, RuntimeError, Unwind};
pub use expressions::to_condition;
pub use frames::{CallStack, CallStackId, DebugInfo, FrameInfo, VariableInfo};
pub use host::{HostInterop, MemberTarget, StdHost};
pub use memory::{Globals, Scope, ValueDescriptor, Variable};
pub use observer::{ExecutionObserver, SilentObserver, StatementEvent, TracingObserver};
pub use runtime::{Controls, Runtime};
pub use tracker::{PendingGuard, Tracker};
pub use value::{Exception, HostObject, Key, Val};
