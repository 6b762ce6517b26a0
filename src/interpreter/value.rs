//! Runtime value types

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::program::Literal;

/// Map key. Only hashable primitives can key a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => f.write_str(s),
            Key::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Exception payload carried by `throw` and bound by `catch`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exception {
    pub type_name: String,
    pub message: String,
}

/// Opaque host object with named fields
#[derive(Debug)]
pub struct HostObject {
    pub type_name: String,
    fields: Mutex<HashMap<String, Val>>,
}

impl HostObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Mutex::new(HashMap::new()),
        }
    }

    pub fn field(&self, name: &str) -> Option<Val> {
        self.fields.lock().get(name).cloned()
    }

    pub fn set_field(&self, name: impl Into<String>, value: Val) {
        self.fields.lock().insert(name.into(), value);
    }
}

pub type ArrayRef = Arc<Mutex<Vec<Val>>>;
pub type MapRef = Arc<Mutex<HashMap<Key, Val>>>;

/// Runtime value type
///
/// Collections and objects are reference values: cloning a `Val` shares the
/// underlying storage, the same way two variables can hold one array.
#[derive(Debug, Clone)]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(ArrayRef),
    Map(MapRef),
    Exception(Arc<Exception>),
    Object(Arc<HostObject>),
}

impl Val {
    pub fn array(items: Vec<Val>) -> Self {
        Val::Array(Arc::new(Mutex::new(items)))
    }

    pub fn map() -> Self {
        Val::Map(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn exception(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Val::Exception(Arc::new(Exception {
            type_name: type_name.into(),
            message: message.into(),
        }))
    }

    pub fn object(type_name: impl Into<String>) -> Self {
        Val::Object(Arc::new(HostObject::new(type_name)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    /// Arrays and maps are collections; everything else is primitive
    pub fn is_collection(&self) -> bool {
        matches!(self, Val::Array(_) | Val::Map(_))
    }

    /// Number of elements of a collection
    pub fn len(&self) -> Option<usize> {
        match self {
            Val::Array(items) => Some(items.lock().len()),
            Val::Map(entries) => Some(entries.lock().len()),
            _ => None,
        }
    }

    /// Name used in error messages
    pub fn type_name(&self) -> &str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "string",
            Val::Array(_) => "array",
            Val::Map(_) => "map",
            Val::Exception(e) => &e.type_name,
            Val::Object(o) => &o.type_name,
        }
    }

    pub fn as_key(&self) -> Option<Key> {
        match self {
            Val::Int(i) => Some(Key::Int(*i)),
            Val::Str(s) => Some(Key::Str(s.clone())),
            Val::Bool(b) => Some(Key::Bool(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&Literal> for Val {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Null => Val::Null,
            Literal::Bool(b) => Val::Bool(*b),
            Literal::Int(i) => Val::Int(*i),
            Literal::Float(f) => Val::Float(*f),
            Literal::Str(s) => Val::Str(s.clone()),
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<i64> for Val {
    fn from(i: i64) -> Self {
        Val::Int(i)
    }
}

impl From<Key> for Val {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(i) => Val::Int(i),
            Key::Str(s) => Val::Str(s),
            Key::Bool(b) => Val::Bool(b),
        }
    }
}

thread_local! {
    /// Collections currently being compared, printed or serialized on this
    /// thread, as address pairs
    static VISITING: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a collection (or a pair of collections) as being walked. `enter`
/// returns `None` when the walk has come back around to it.
struct Visit((usize, usize));

impl Visit {
    fn enter(key: (usize, usize)) -> Option<Self> {
        VISITING.with(|visiting| {
            let mut visiting = visiting.borrow_mut();
            if visiting.contains(&key) {
                return None;
            }
            visiting.push(key);
            Some(Visit(key))
        })
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        VISITING.with(|visiting| {
            let mut visiting = visiting.borrow_mut();
            if let Some(pos) = visiting.iter().rposition(|key| *key == self.0) {
                visiting.remove(pos);
            }
        });
    }
}

fn addr<T>(shared: &Arc<T>) -> usize {
    Arc::as_ptr(shared) as usize
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a == b,
            (Val::Int(a), Val::Float(b)) | (Val::Float(b), Val::Int(a)) => (*a as f64) == *b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Array(a), Val::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                // A pair already under comparison is assumed equal
                let Some(_visit) = Visit::enter((addr(a), addr(b))) else {
                    return true;
                };
                // Compare snapshots; locks are never held across nested comparisons
                let left = a.lock().clone();
                let right = b.lock().clone();
                left == right
            }
            (Val::Map(a), Val::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let Some(_visit) = Visit::enter((addr(a), addr(b))) else {
                    return true;
                };
                let left = a.lock().clone();
                let right = b.lock().clone();
                left == right
            }
            (Val::Exception(a), Val::Exception(b)) => Arc::ptr_eq(a, b) || a == b,
            (Val::Object(a), Val::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => f.write_str("null"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Int(i) => write!(f, "{}", i),
            Val::Float(x) => write!(f, "{}", x),
            Val::Str(s) => f.write_str(s),
            Val::Array(items) => {
                let Some(_visit) = Visit::enter((addr(items), 0)) else {
                    return f.write_str("[...]");
                };
                let items = items.lock().clone();
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Val::Map(entries) => {
                let Some(_visit) = Visit::enter((addr(entries), 0)) else {
                    return f.write_str("{...}");
                };
                let entries = entries.lock().clone();
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Val::Exception(e) => write!(f, "{}: {}", e.type_name, e.message),
            Val::Object(o) => write!(f, "<{}>", o.type_name),
        }
    }
}

/// Host-facing JSON shape, used by debug snapshots and the CLI. A collection
/// that contains itself serializes the repeat as null.
impl Serialize for Val {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Val::Null => serializer.serialize_unit(),
            Val::Bool(b) => serializer.serialize_bool(*b),
            Val::Int(i) => serializer.serialize_i64(*i),
            Val::Float(x) => serializer.serialize_f64(*x),
            Val::Str(s) => serializer.serialize_str(s),
            Val::Array(items) => {
                let Some(_visit) = Visit::enter((addr(items), 0)) else {
                    return serializer.serialize_unit();
                };
                let items = items.lock().clone();
                serializer.collect_seq(items.iter())
            }
            Val::Map(entries) => {
                let Some(_visit) = Visit::enter((addr(entries), 0)) else {
                    return serializer.serialize_unit();
                };
                let entries = entries.lock().clone();
                serializer.collect_map(entries.iter().map(|(k, v)| (k.to_string(), v)))
            }
            Val::Exception(e) => e.serialize(serializer),
            Val::Object(o) => {
                let Some(_visit) = Visit::enter((addr(o), 0)) else {
                    return serializer.serialize_unit();
                };
                let fields = o.fields.lock().clone();
                let mut map = serializer.serialize_map(Some(fields.len() + 1))?;
                map.serialize_entry("$type", &o.type_name)?;
                for (name, value) in &fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}
