//! Expression evaluation
//!
//! Operands are evaluated left to right. `and`/`or` short-circuit; every
//! other operator evaluates both sides first.

use std::cmp::Ordering;
use std::sync::Arc;

use super::engine::Engine;
use super::errors::{ErrorKind, ExecResult, RuntimeError};
use super::host::MemberTarget;
use super::value::Val;
use crate::program::{BinaryOp, Expr, Receiver, UnaryOp};

impl Engine {
    pub fn eval(&mut self, expr: &Expr) -> ExecResult<Val> {
        match expr {
            Expr::Literal { value, .. } => Ok(Val::from(value)),

            Expr::Variable { name, global, .. } => Ok(self.lookup(name, *global)?.value()),

            Expr::Property { receiver, name, .. } => {
                let host = Arc::clone(&self.runtime.host);
                let value = match receiver {
                    Receiver::Static { type_name } => {
                        host.get_property(MemberTarget::Static(type_name), name)?
                    }
                    Receiver::Instance { object } => {
                        let object = self.eval(object)?;
                        host.get_property(MemberTarget::Instance(&object), name)?
                    }
                };
                Ok(value)
            }

            Expr::Index { target, index, .. } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(index_value(&target, &index)?)
            }

            Expr::Binary {
                op, left, right, ..
            } => {
                if op.is_short_circuit() {
                    return self.eval_short_circuit(*op, left, right);
                }
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right)?)
            }

            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand)?;
                Ok(unary(*op, &value)?)
            }

            Expr::Invoke {
                receiver,
                method,
                args,
                ..
            } => match receiver {
                None => self.invoke_program_method(method, args),
                Some(receiver) => self.invoke_host_method(receiver, method, args),
            },

            Expr::Instantiate {
                type_name, args, ..
            } => {
                let args = self.eval_args(args)?;
                Ok(self.runtime.host.construct(type_name, args)?)
            }

            Expr::ArrayCreation { items, .. } => Ok(Val::array(self.eval_args(items)?)),
        }
    }

    pub(super) fn eval_condition(&mut self, expr: &Expr) -> ExecResult<bool> {
        let value = self.eval(expr)?;
        Ok(to_condition(&value)?)
    }

    fn eval_short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> ExecResult<Val> {
        let left = self.eval_condition(left)?;
        let decided = match op {
            BinaryOp::And => !left,
            _ => left,
        };
        if decided {
            return Ok(Val::Bool(left));
        }
        Ok(Val::Bool(self.eval_condition(right)?))
    }

    fn eval_args(&mut self, args: &[Expr]) -> ExecResult<Vec<Val>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn invoke_program_method(&mut self, name: &str, args: &[Expr]) -> ExecResult<Val> {
        let runtime = Arc::clone(&self.runtime);
        let callee = runtime.program.method(name).ok_or_else(|| {
            RuntimeError::new(
                ErrorKind::MethodNotFound,
                format!("method '{}' not found", name),
            )
        })?;
        let args = self.eval_args(args)?;

        if callee.is_async {
            // Fire and forget on the same call stack id; the tracker keeps
            // the session out of Idle until it finishes
            runtime.spawn_tracked(self.stack.id, callee.clone(), args);
            return Ok(Val::Null);
        }
        self.invoke(callee, args)
    }

    fn invoke_host_method(&mut self, receiver: &Receiver, name: &str, args: &[Expr]) -> ExecResult<Val> {
        let host = Arc::clone(&self.runtime.host);
        let value = match receiver {
            Receiver::Static { type_name } => {
                let args = self.eval_args(args)?;
                host.invoke_method(MemberTarget::Static(type_name), name, args)?
            }
            Receiver::Instance { object } => {
                let object = self.eval(object)?;
                let args = self.eval_args(args)?;
                host.invoke_method(MemberTarget::Instance(&object), name, args)?
            }
        };
        Ok(value)
    }
}

/// Conditions take a bool, or the integers 0 and 1
pub fn to_condition(value: &Val) -> Result<bool, RuntimeError> {
    match value {
        Val::Bool(b) => Ok(*b),
        Val::Int(0) => Ok(false),
        Val::Int(1) => Ok(true),
        Val::Int(other) => Err(RuntimeError::out_of_range(format!(
            "{} is not a valid condition, expected 0 or 1",
            other
        ))),
        Val::Null => Err(RuntimeError::null_value("condition is null")),
        other => Err(RuntimeError::bad_type(format!(
            "{} is not a valid condition",
            other.type_name()
        ))),
    }
}

/// Bounds-checked array position for an index value
pub(super) fn element_position(index: &Val, len: usize) -> Result<usize, RuntimeError> {
    match index {
        Val::Int(i) if *i >= 0 && (*i as u64) < len as u64 => Ok(*i as usize),
        Val::Int(i) => Err(RuntimeError::out_of_range(format!(
            "index {} is out of range for length {}",
            i, len
        ))),
        Val::Null => Err(RuntimeError::null_value("index is null")),
        other => Err(RuntimeError::bad_type(format!(
            "index must be an int, got {}",
            other.type_name()
        ))),
    }
}

fn index_value(target: &Val, index: &Val) -> Result<Val, RuntimeError> {
    match target {
        Val::Array(items) => {
            let items = items.lock();
            let position = element_position(index, items.len())?;
            Ok(items[position].clone())
        }
        Val::Map(entries) => {
            let key = index.as_key().ok_or_else(|| {
                RuntimeError::bad_type(format!("{} cannot be used as a map key", index.type_name()))
            })?;
            entries
                .lock()
                .get(&key)
                .cloned()
                .ok_or_else(|| RuntimeError::out_of_range(format!("key '{}' not found", key)))
        }
        Val::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let position = element_position(index, chars.len())?;
            Ok(Val::Str(chars[position].to_string()))
        }
        Val::Null => Err(RuntimeError::null_value("cannot index into null")),
        other => Err(RuntimeError::bad_type(format!(
            "cannot index into {}",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: &Val) -> Result<Val, RuntimeError> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Val::Bool(!to_condition(value)?)),
        (UnaryOp::Neg, Val::Int(i)) => i
            .checked_neg()
            .map(Val::Int)
            .ok_or_else(|| RuntimeError::out_of_range(format!("-({}) overflows", i))),
        (UnaryOp::Neg, Val::Float(x)) => Ok(Val::Float(-x)),
        (UnaryOp::Neg, Val::Null) => Err(RuntimeError::null_value("cannot negate null")),
        (UnaryOp::Neg, other) => Err(RuntimeError::bad_type(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Val, right: &Val) -> Result<Val, RuntimeError> {
    match op {
        BinaryOp::Eq => Ok(Val::Bool(left == right)),
        BinaryOp::NotEq => Ok(Val::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(op, left, right)?;
            let result = match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            };
            Ok(Val::Bool(result))
        }
        BinaryOp::Add if matches!(left, Val::Str(_)) || matches!(right, Val::Str(_)) => {
            Ok(Val::Str(format!("{}{}", concat_part(left), concat_part(right))))
        }
        BinaryOp::And | BinaryOp::Or => Ok(Val::Bool(to_condition(left)? && to_condition(right)?)),
        _ => arithmetic(op, left, right),
    }
}

/// Null concatenates as the empty string
fn concat_part(value: &Val) -> String {
    match value {
        Val::Null => String::new(),
        other => other.to_string(),
    }
}

fn compare(op: BinaryOp, left: &Val, right: &Val) -> Result<Option<Ordering>, RuntimeError> {
    match (left, right) {
        (Val::Int(a), Val::Int(b)) => Ok(Some(a.cmp(b))),
        (Val::Str(a), Val::Str(b)) => Ok(Some(a.cmp(b))),
        (Val::Null, _) | (_, Val::Null) => Err(RuntimeError::null_value(format!(
            "cannot compare null with {:?}",
            op
        ))),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(a.partial_cmp(&b)),
            _ => Err(RuntimeError::bad_type(format!(
                "cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn arithmetic(op: BinaryOp, left: &Val, right: &Val) -> Result<Val, RuntimeError> {
    match (left, right) {
        (Val::Null, _) | (_, Val::Null) => Err(RuntimeError::null_value(format!(
            "null operand for {:?}",
            op
        ))),
        (Val::Int(a), Val::Int(b)) => int_arithmetic(op, *a, *b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => float_arithmetic(op, a, b),
            _ => Err(RuntimeError::bad_type(format!(
                "{:?} is not defined for {} and {}",
                op,
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Val, RuntimeError> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
        return Err(divide_by_zero());
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod => a.checked_rem(b),
        other => return Err(RuntimeError::internal(format!("{:?} is not arithmetic", other))),
    };
    result
        .map(Val::Int)
        .ok_or_else(|| RuntimeError::out_of_range(format!("{} {:?} {} overflows", a, op, b)))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Val, RuntimeError> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
        return Err(divide_by_zero());
    }
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        other => return Err(RuntimeError::internal(format!("{:?} is not arithmetic", other))),
    };
    Ok(Val::Float(result))
}

fn divide_by_zero() -> RuntimeError {
    RuntimeError::new(ErrorKind::DivideByZero, "division by zero")
}
