pub mod cli;
pub mod config;
pub mod debugger;
pub mod interpreter;
pub mod optimizer;
pub mod program;

// Re-export the embedding API
pub use config::Config;
pub use debugger::{Invocation, Mode, Session, SessionError, SessionOptions, SessionState};
pub use interpreter::{ErrorKind, HostInterop, RuntimeError, StdHost, Val};
pub use program::Program;
