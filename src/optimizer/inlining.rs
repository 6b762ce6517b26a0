//! Inlining contexts
//!
//! While a callee body is being spliced into a call site, an
//! [`InliningContext`] records where that copy begins and ends, which
//! variable receives its return value, and how every name the callee
//! declares maps to a fresh name. Contexts form a stack; the innermost one is
//! the last element.
//!
//! Names are bound per scope: a try or catch body opens a scope of its own,
//! so a declaration there shadows the outer mapping only until the body ends.

use std::collections::HashMap;

use crate::program::MethodId;

#[derive(Debug)]
pub struct InliningContext {
    /// Method whose body is being inlined
    pub method: MethodId,
    /// Label placed before the inlined body
    pub start_label: String,
    /// Label placed after the inlined body; inlined returns jump here
    pub end_label: String,
    /// Synthetic variable receiving the inlined return value
    pub receiver: String,
    /// Name substitutions, one map per open scope, innermost last
    scopes: Vec<HashMap<String, String>>,
}

impl InliningContext {
    pub fn new(method: MethodId, start_label: String, end_label: String, receiver: String) -> Self {
        Self {
            method,
            start_label,
            end_label,
            receiver,
            scopes: vec![HashMap::new()],
        }
    }

    /// Record that `original` is now called `fresh` in the innermost scope
    pub fn bind(&mut self, original: &str, fresh: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(original.to_string(), fresh);
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Close the innermost scope. The callee's top-level scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Fresh name for a variable declared by the callee, searching from the
    /// innermost scope outward
    pub fn lookup(&self, original: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(original))
            .map(String::as_str)
    }
}

/// How many times `method` is already being inlined on the context stack
pub fn active_count(contexts: &[InliningContext], method: MethodId) -> usize {
    contexts.iter().filter(|ctx| ctx.method == method).count()
}
