//! Runtime failures
//!
//! Every failure raised while a program runs is a [`RuntimeError`] carrying
//! one [`ErrorKind`]. Errors are created at the failing operation and
//! annotated on the way out with the statement that was executing and the
//! call stack at that moment.

use serde::Serialize;
use thiserror::Error;

use super::frames::DebugInfo;
use super::value::Val;
use crate::program::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NullValue,
    BadType,
    BadArgument,
    OutOfRange,
    NotAssignable,
    MethodNotFound,
    MethodNotAwaitable,
    MissingEntryPoint,
    SeveralEntryPoint,
    DivideByZero,
    StackOverflow,
    IllegalStatement,
    AssemblyLoad,
    HostInterop,
    Internal,
    Unexpected,
    /// A user `throw` that no catch handled
    Thrown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Location of the statement that failed
    pub span: Option<Span>,
    /// Short description of the failing node, e.g. `assign`
    pub node: Option<String>,
    pub debug_info: Option<Box<DebugInfo>>,
    /// The thrown value, for user exceptions
    pub exception: Option<Val>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            node: None,
            debug_info: None,
            exception: None,
        }
    }

    pub fn thrown(exception: Val) -> Self {
        let message = match &exception {
            Val::Exception(e) => e.message.clone(),
            other => other.to_string(),
        };
        Self {
            exception: Some(exception),
            ..Self::new(ErrorKind::Thrown, message)
        }
    }

    pub fn null_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NullValue, message)
    }

    pub fn bad_type(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadType, message)
    }

    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadArgument, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HostInterop, message)
    }

    /// Attach the failing node unless an inner statement already did
    pub fn at(mut self, span: Span, node: &str) -> Self {
        if self.node.is_none() {
            self.span = Some(span);
            self.node = Some(node.to_string());
        }
        self
    }

    /// The value a `catch` binds: the thrown exception itself, or an
    /// exception describing the structured failure.
    pub fn to_exception(&self) -> Val {
        match &self.exception {
            Some(value) => value.clone(),
            None => Val::exception(self.kind.to_string(), self.message.clone()),
        }
    }
}

/// Why execution of a call stack stopped early
#[derive(Debug)]
pub enum Unwind {
    Error(Box<RuntimeError>),
    /// The session was stopped; never caught by try/catch
    Cancelled,
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Error(Box::new(err))
    }
}

pub type ExecResult<T> = Result<T, Unwind>;
