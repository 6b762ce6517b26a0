//! Memory model
//!
//! A [`Variable`] is a synchronized cell whose declared [`Shape`] never
//! changes: scalar variables hold primitives, array variables hold
//! collections, and either may hold null. Locals live in [`Scope`]s owned by
//! call frames; [`Globals`] are shared by every call stack of a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::errors::{ErrorKind, RuntimeError};
use super::value::Val;
use crate::program::Shape;

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VariableId(pub u64);

/// What a debugger shows for a value without rendering it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ValueDescriptor {
    Null,
    Primitive,
    Collection { len: usize },
}

impl ValueDescriptor {
    pub fn of(value: &Val) -> Self {
        match value.len() {
            Some(len) => ValueDescriptor::Collection { len },
            None if value.is_null() => ValueDescriptor::Null,
            None => ValueDescriptor::Primitive,
        }
    }
}

#[derive(Debug)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub shape: Shape,
    value: Mutex<Val>,
}

impl Variable {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            id: VariableId(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            shape,
            value: Mutex::new(Val::Null),
        }
    }

    pub fn value(&self) -> Val {
        self.value.lock().clone()
    }

    /// Store a value, enforcing the declared shape. Null is always accepted.
    pub fn set_value(&self, value: Val) -> Result<(), RuntimeError> {
        let fits = match self.shape {
            Shape::Dynamic => true,
            _ if value.is_null() => true,
            Shape::Scalar => !value.is_collection(),
            Shape::Array => value.is_collection(),
        };

        if !fits {
            return Err(RuntimeError::new(
                ErrorKind::NotAssignable,
                format!(
                    "cannot store {} in {} variable '{}'",
                    value.type_name(),
                    shape_name(self.shape),
                    self.name
                ),
            ));
        }

        *self.value.lock() = value;
        Ok(())
    }

    pub fn descriptor(&self) -> ValueDescriptor {
        ValueDescriptor::of(&self.value.lock())
    }

    pub fn dispose(&self) {
        *self.value.lock() = Val::Null;
    }
}

fn shape_name(shape: Shape) -> &'static str {
    match shape {
        Shape::Scalar => "scalar",
        Shape::Array => "array",
        Shape::Dynamic => "dynamic",
    }
}

/// One lexical scope of a frame
#[derive(Debug, Default)]
pub struct Scope {
    variables: HashMap<String, Arc<Variable>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable; a redeclaration replaces the previous binding
    pub fn declare(&mut self, variable: Arc<Variable>) {
        self.variables.insert(variable.name.clone(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Variable>> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Arc<Variable>> {
        self.variables.values()
    }

    pub fn dispose(&mut self) {
        for variable in self.variables.values() {
            variable.dispose();
        }
        self.variables.clear();
    }
}

/// Program-wide variables, in declaration order
#[derive(Debug, Default)]
pub struct Globals {
    variables: RwLock<Vec<Arc<Variable>>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, variable: Arc<Variable>) {
        let mut variables = self.variables.write();
        variables.retain(|v| v.name != variable.name);
        variables.push(variable);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables
            .read()
            .iter()
            .find(|v| v.name == name)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Variable>> {
        self.variables.read().clone()
    }
}
