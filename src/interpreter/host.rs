//! Host interop
//!
//! Everything a program reaches outside itself (assemblies, static members,
//! host objects) goes through [`HostInterop`]. The engine never inspects
//! host types directly.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use super::errors::{ErrorKind, RuntimeError};
use super::value::{Key, Val};

/// Owner of a member access
#[derive(Debug, Clone, Copy)]
pub enum MemberTarget<'a> {
    /// A type, for static members
    Static(&'a str),
    /// A value, for instance members
    Instance(&'a Val),
}

pub trait HostInterop: Send + Sync {
    fn load_assembly(&self, name: &str) -> Result<(), RuntimeError>;

    fn get_property(&self, target: MemberTarget<'_>, name: &str) -> Result<Val, RuntimeError>;

    fn set_property(
        &self,
        target: MemberTarget<'_>,
        name: &str,
        value: Val,
    ) -> Result<(), RuntimeError>;

    fn invoke_method(
        &self,
        target: MemberTarget<'_>,
        name: &str,
        args: Vec<Val>,
    ) -> Result<Val, RuntimeError>;

    fn construct(&self, type_name: &str, args: Vec<Val>) -> Result<Val, RuntimeError>;
}

/* ===================== Standard host ===================== */

const ASSEMBLIES: &[&str] = &["std", "System"];

/// Default host: a small standard library plus captured console output
#[derive(Debug, Default)]
pub struct StdHost {
    loaded: Mutex<HashSet<String>>,
    console: Mutex<Vec<String>>,
}

impl StdHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written through `Console.WriteLine`, in order
    pub fn console_output(&self) -> Vec<String> {
        self.console.lock().clone()
    }

    pub fn is_loaded(&self, assembly: &str) -> bool {
        self.loaded.lock().contains(assembly)
    }

    fn write_line(&self, args: &[Val]) -> Val {
        let line = args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "cadence::console", "{}", line);
        self.console.lock().push(line);
        Val::Null
    }

    fn invoke_static(&self, type_name: &str, name: &str, args: Vec<Val>) -> Result<Val, RuntimeError> {
        match (type_name, name) {
            ("Console", "WriteLine") => Ok(self.write_line(&args)),
            ("Math", "Abs") => {
                let [x] = expect_args::<1>(name, args)?;
                match x {
                    Val::Int(i) => i
                        .checked_abs()
                        .map(Val::Int)
                        .ok_or_else(|| RuntimeError::out_of_range("Math.Abs overflow")),
                    Val::Float(f) => Ok(Val::Float(f.abs())),
                    other => Err(not_a_number(name, &other)),
                }
            }
            ("Math", "Max") | ("Math", "Min") => {
                let [a, b] = expect_args::<2>(name, args)?;
                let pick_first = match (&a, &b) {
                    (Val::Int(x), Val::Int(y)) => (x >= y) == (name == "Max"),
                    _ => {
                        let x = a.as_f64().ok_or_else(|| not_a_number(name, &a))?;
                        let y = b.as_f64().ok_or_else(|| not_a_number(name, &b))?;
                        (x >= y) == (name == "Max")
                    }
                };
                Ok(if pick_first { a } else { b })
            }
            ("Thread", "Sleep") => {
                let [ms] = expect_args::<1>(name, args)?;
                match ms {
                    Val::Int(ms) if ms >= 0 => {
                        std::thread::sleep(Duration::from_millis(ms as u64));
                        Ok(Val::Null)
                    }
                    other => Err(RuntimeError::bad_argument(format!(
                        "Thread.Sleep expects a non-negative int, got {}",
                        other.type_name()
                    ))),
                }
            }
            _ => Err(RuntimeError::new(
                ErrorKind::MethodNotFound,
                format!("static method '{}.{}' not found", type_name, name),
            )),
        }
    }

    fn invoke_instance(&self, target: &Val, name: &str, args: Vec<Val>) -> Result<Val, RuntimeError> {
        match (target, name) {
            (Val::Array(items), "Add") => {
                let [item] = expect_args::<1>(name, args)?;
                items.lock().push(item);
                Ok(Val::Null)
            }
            (Val::Map(entries), "Add") => {
                let [key, value] = expect_args::<2>(name, args)?;
                let key = map_key(&key)?;
                let mut entries = entries.lock();
                if entries.contains_key(&key) {
                    return Err(RuntimeError::bad_argument(format!(
                        "key '{}' is already present",
                        key
                    )));
                }
                entries.insert(key, value);
                Ok(Val::Null)
            }
            (Val::Map(entries), "ContainsKey") => {
                let [key] = expect_args::<1>(name, args)?;
                let key = map_key(&key)?;
                Ok(Val::Bool(entries.lock().contains_key(&key)))
            }
            (Val::Map(entries), "Remove") => {
                let [key] = expect_args::<1>(name, args)?;
                let key = map_key(&key)?;
                Ok(Val::Bool(entries.lock().remove(&key).is_some()))
            }
            (Val::Array(items), "Remove") => {
                let [item] = expect_args::<1>(name, args)?;
                // Elements may share storage with `item`; compare without the lock
                let snapshot = items.lock().clone();
                let Some(pos) = snapshot.iter().position(|v| *v == item) else {
                    return Ok(Val::Bool(false));
                };
                let mut items = items.lock();
                if pos < items.len() {
                    items.remove(pos);
                }
                Ok(Val::Bool(true))
            }
            (_, "ToString") => Ok(Val::Str(target.to_string())),
            _ => Err(RuntimeError::new(
                ErrorKind::MethodNotFound,
                format!("method '{}' not found on {}", name, target.type_name()),
            )),
        }
    }
}

impl HostInterop for StdHost {
    fn load_assembly(&self, name: &str) -> Result<(), RuntimeError> {
        if !ASSEMBLIES.contains(&name) {
            return Err(RuntimeError::new(
                ErrorKind::AssemblyLoad,
                format!("assembly '{}' could not be loaded", name),
            ));
        }
        self.loaded.lock().insert(name.to_string());
        Ok(())
    }

    fn get_property(&self, target: MemberTarget<'_>, name: &str) -> Result<Val, RuntimeError> {
        match target {
            MemberTarget::Static("Math") if name == "PI" => Ok(Val::Float(std::f64::consts::PI)),
            MemberTarget::Static(type_name) => Err(RuntimeError::host(format!(
                "static property '{}.{}' not found",
                type_name, name
            ))),
            MemberTarget::Instance(value) => match (value, name) {
                (Val::Null, _) => Err(RuntimeError::null_value(format!(
                    "cannot read '{}' of null",
                    name
                ))),
                (Val::Str(s), "Length") => Ok(Val::Int(s.chars().count() as i64)),
                (Val::Array(_) | Val::Map(_), "Length" | "Count") => {
                    Ok(Val::Int(value.len().unwrap_or(0) as i64))
                }
                (Val::Exception(e), "Message") => Ok(Val::Str(e.message.clone())),
                (Val::Exception(e), "Type") => Ok(Val::Str(e.type_name.clone())),
                (Val::Object(o), _) => o.field(name).ok_or_else(|| {
                    RuntimeError::host(format!("'{}' has no field '{}'", o.type_name, name))
                }),
                _ => Err(RuntimeError::host(format!(
                    "property '{}' not found on {}",
                    name,
                    value.type_name()
                ))),
            },
        }
    }

    fn set_property(
        &self,
        target: MemberTarget<'_>,
        name: &str,
        value: Val,
    ) -> Result<(), RuntimeError> {
        match target {
            MemberTarget::Instance(Val::Object(o)) => {
                o.set_field(name, value);
                Ok(())
            }
            MemberTarget::Instance(Val::Null) => Err(RuntimeError::null_value(format!(
                "cannot set '{}' of null",
                name
            ))),
            MemberTarget::Instance(other) => Err(RuntimeError::new(
                ErrorKind::NotAssignable,
                format!("property '{}' of {} is read-only", name, other.type_name()),
            )),
            MemberTarget::Static(type_name) => Err(RuntimeError::new(
                ErrorKind::NotAssignable,
                format!("static property '{}.{}' is read-only", type_name, name),
            )),
        }
    }

    fn invoke_method(
        &self,
        target: MemberTarget<'_>,
        name: &str,
        args: Vec<Val>,
    ) -> Result<Val, RuntimeError> {
        match target {
            MemberTarget::Static(type_name) => self.invoke_static(type_name, name, args),
            MemberTarget::Instance(Val::Null) => Err(RuntimeError::null_value(format!(
                "cannot call '{}' on null",
                name
            ))),
            MemberTarget::Instance(value) => self.invoke_instance(value, name, args),
        }
    }

    fn construct(&self, type_name: &str, args: Vec<Val>) -> Result<Val, RuntimeError> {
        match type_name {
            "Exception" => {
                let message = match args.into_iter().next() {
                    Some(Val::Str(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(Val::exception("Exception", message))
            }
            "List" => Ok(Val::array(args)),
            "Map" | "Dictionary" => Ok(Val::map()),
            "Object" => Ok(Val::object("Object")),
            _ => Err(RuntimeError::host(format!("type '{}' not found", type_name))),
        }
    }
}

fn expect_args<const N: usize>(method: &str, args: Vec<Val>) -> Result<[Val; N], RuntimeError> {
    let count = args.len();
    args.try_into().map_err(|_| {
        RuntimeError::bad_argument(format!(
            "'{}' expects {} argument(s), got {}",
            method, N, count
        ))
    })
}

fn map_key(value: &Val) -> Result<Key, RuntimeError> {
    value.as_key().ok_or_else(|| {
        RuntimeError::bad_type(format!("{} cannot be used as a map key", value.type_name()))
    })
}

fn not_a_number(method: &str, value: &Val) -> RuntimeError {
    RuntimeError::bad_type(format!(
        "'{}' expects numbers, got {}",
        method,
        value.type_name()
    ))
}
