//! Preparation diagnostics
//!
//! Problems found while lowering (unresolved callees, arity mismatches,
//! misplaced `break`) are collected as diagnostics instead of aborting, so a
//! host can show all of them at once. Execution only starts when no
//! error-severity diagnostic exists.

use serde::Serialize;

use crate::program::Span;

pub const UNRESOLVED_METHOD: &str = "unresolved-method";
pub const ARITY_MISMATCH: &str = "arity-mismatch";
pub const BREAK_OUTSIDE_LOOP: &str = "break-outside-loop";
pub const DUPLICATE_METHOD: &str = "duplicate-method";
pub const INLINE_REFUSED: &str = "inline-refused";
pub const UNREACHABLE_CODE: &str = "unreachable-code";

/// Severity levels for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks execution
    Error,
    /// Suspicious but runnable
    Warning,
    /// Informational, e.g. a call that stays a genuine invocation
    Info,
}

/// A diagnostic produced while preparing a program.
///
/// Independent of any output format so the CLI and embedding hosts can
/// render it however they like.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// The source location of the issue
    pub span: Span,
    /// Human-readable message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Which check produced this diagnostic
    pub code: &'static str,
}

impl Diagnostic {
    pub fn error(span: Span, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Error,
            code,
        }
    }

    pub fn warning(span: Span, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Warning,
            code,
        }
    }

    pub fn info(span: Span, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Info,
            code,
        }
    }

    /// Check if this is an error (not a warning or info)
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(
            f,
            "{} at {}: {} [{}]",
            severity, self.span, self.message, self.code
        )
    }
}

impl std::error::Error for Diagnostic {}
