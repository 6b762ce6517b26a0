//! Call stack arena
//!
//! One [`CallStack`] per logical call stack: a vector of frames, each owning a
//! vector of scopes. Frames are pushed by real (non-inlined) calls and always
//! popped and disposed when the call ends, whatever the outcome.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::memory::{Globals, Scope, ValueDescriptor, Variable};
use super::value::Val;
use crate::program::{MethodId, Shape, Span};

/// Identity of one logical call stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CallStackId(pub Uuid);

impl CallStackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallStackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallStackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Frame {
    pub method: MethodId,
    pub method_name: String,
    scopes: Vec<Scope>,
    /// Value stored by `return`
    pub result: Option<Val>,
    /// Span of the statement currently executing in this frame
    pub current_span: Span,
}

impl Frame {
    fn new(method: MethodId, method_name: &str) -> Self {
        Self {
            method,
            method_name: method_name.to_string(),
            scopes: vec![Scope::new()],
            result: None,
            current_span: Span::default(),
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).cloned()
    }

    fn dispose(&mut self) {
        for scope in &mut self.scopes {
            scope.dispose();
        }
        self.scopes.clear();
    }
}

#[derive(Debug)]
pub struct CallStack {
    pub id: CallStackId,
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new(id: CallStackId) -> Self {
        Self {
            id,
            frames: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self, method: MethodId, method_name: &str) {
        self.frames.push(Frame::new(method, method_name));
    }

    /// Pop the innermost frame, disposing its variables, and return its result
    pub fn pop_frame(&mut self) -> Option<Val> {
        let mut frame = self.frames.pop()?;
        frame.dispose();
        frame.result.take()
    }

    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Number of scopes in the current frame, to restore after a nested block
    pub fn scope_mark(&self) -> usize {
        self.frames.last().map_or(0, |f| f.scopes.len())
    }

    pub fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(Scope::new());
        }
    }

    /// Drop every scope above `mark`
    pub fn restore_scopes(&mut self, mark: usize) {
        if let Some(frame) = self.frames.last_mut() {
            while frame.scopes.len() > mark.max(1) {
                if let Some(mut scope) = frame.scopes.pop() {
                    scope.dispose();
                }
            }
        }
    }

    /// Bind a variable in the innermost scope. Outside any frame (global
    /// initialization) there is nowhere to bind, so `false` is returned.
    pub fn declare(&mut self, variable: Arc<Variable>) -> bool {
        match self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
            Some(scope) => {
                scope.declare(variable);
                true
            }
            None => false,
        }
    }

    /// Local lookup in the current frame only; callers fall back to globals
    pub fn lookup_local(&self, name: &str) -> Option<Arc<Variable>> {
        self.frames.last().and_then(|f| f.lookup(name))
    }

    pub fn set_current_span(&mut self, span: Span) {
        if let Some(frame) = self.frames.last_mut() {
            frame.current_span = span;
        }
    }

    /// Snapshot the logical call stack, innermost frame first
    pub fn capture(&self, globals: &Globals) -> DebugInfo {
        let frames = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let mut variables: Vec<VariableInfo> = frame
                    .scopes
                    .iter()
                    .flat_map(|scope| scope.variables())
                    .map(|v| VariableInfo::of(v))
                    .collect();
                variables.sort_by(|a, b| a.name.cmp(&b.name));
                FrameInfo {
                    method: frame.method_name.clone(),
                    span: frame.current_span,
                    variables,
                }
            })
            .collect();

        DebugInfo {
            call_stack: self.id,
            frames,
            globals: globals
                .snapshot()
                .iter()
                .map(|v| VariableInfo::of(v))
                .collect(),
        }
    }
}

/* ===================== Debug snapshots ===================== */

#[derive(Debug, Clone, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub shape: Shape,
    pub descriptor: ValueDescriptor,
    pub value: Val,
}

impl VariableInfo {
    fn of(variable: &Variable) -> Self {
        let value = variable.value();
        Self {
            name: variable.name.clone(),
            shape: variable.shape,
            descriptor: ValueDescriptor::of(&value),
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameInfo {
    pub method: String,
    pub span: Span,
    pub variables: Vec<VariableInfo>,
}

/// Call stack with visible variables, captured when execution pauses or fails
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub call_stack: CallStackId,
    pub frames: Vec<FrameInfo>,
    pub globals: Vec<VariableInfo>,
}

impl DebugInfo {
    pub fn variable(&self, frame: usize, name: &str) -> Option<&VariableInfo> {
        self.frames
            .get(frame)?
            .variables
            .iter()
            .find(|v| v.name == name)
    }
}
