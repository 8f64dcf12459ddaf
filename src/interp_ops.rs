//! Runtime semantics shared by both virtual machines: generic arithmetic,
//! comparison, and container indexing. Kept in one place so the stack and
//! register VMs can never drift apart on what a given opcode *means* —
//! spec.md §8's invariant that the two back ends must produce identical
//! output depends on this.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::RuntimeError;
use crate::value::{MapKey, StructVal, Value};

fn type_mismatch(op: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        message: format!("cannot apply '{op}' to {} and {}", a.type_name(), b.type_name()),
    }
}

fn concat_str(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        other => other.display(),
    }
}

/// Generic `Add`: string concatenation if either operand is a string
/// (stringifying the other side), otherwise numeric with int/float
/// promotion, otherwise a type error.
pub fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Ok(Value::str(format!("{}{}", concat_str(a), concat_str(b))))
        }
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_add(*y))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 + y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x + *y as f64)),
        _ => Err(type_mismatch("+", a, b)),
    }
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_sub(*y))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x - y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 - y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x - *y as f64)),
        _ => Err(type_mismatch("-", a, b)),
    }
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_mul(*y))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x * y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 * y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x * *y as f64)),
        _ => Err(type_mismatch("*", a, b)),
    }
}

pub fn div(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::Int(x.wrapping_div(*y)))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x / y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 / y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x / *y as f64)),
        _ => Err(type_mismatch("/", a, b)),
    }
}

pub fn rem(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(RuntimeError::ModuloByZero);
            }
            Ok(Value::Int(x.wrapping_rem(*y)))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x % y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 % y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x % *y as f64)),
        _ => Err(type_mismatch("%", a, b)),
    }
}

pub fn neg(a: &Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Int(x) => Ok(Value::Int(x.wrapping_neg())),
        Value::Float(x) => Ok(Value::Float(-x)),
        _ => Err(RuntimeError::TypeMismatch { message: format!("cannot negate {}", a.type_name()) }),
    }
}

pub fn eq(a: &Value, b: &Value) -> Value {
    Value::Bool(a.eq_val(b))
}

pub fn ne(a: &Value, b: &Value) -> Value {
    Value::Bool(!a.eq_val(b))
}

#[derive(Clone, Copy)]
enum Ord3 {
    Lt,
    Eq,
    Gt,
}

fn ordering(a: &Value, b: &Value) -> Result<Ord3, RuntimeError> {
    let o = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.as_ref().cmp(y.as_ref()),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => return Err(type_mismatch("<", a, b)),
        },
    };
    Ok(match o {
        std::cmp::Ordering::Less => Ord3::Lt,
        std::cmp::Ordering::Equal => Ord3::Eq,
        std::cmp::Ordering::Greater => Ord3::Gt,
    })
}

pub fn lt(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(ordering(a, b)?, Ord3::Lt)))
}

pub fn gt(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(ordering(a, b)?, Ord3::Gt)))
}

pub fn le(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(!matches!(ordering(a, b)?, Ord3::Gt)))
}

pub fn ge(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(!matches!(ordering(a, b)?, Ord3::Lt)))
}

/// A `Value` used as a map key: `Int`/`Str` keep their natural key, every
/// other kind is stringified (spec.md §3: "other Value kinds stringified on
/// insert is acceptable but must be documented" — this is that document).
pub fn value_to_map_key(v: &Value) -> MapKey {
    match v {
        Value::Int(i) => MapKey::Int(*i),
        Value::Str(s) => MapKey::Str(s.to_string()),
        other => MapKey::Str(other.display()),
    }
}

fn array_index(len: usize, key: &Value) -> Result<usize, RuntimeError> {
    let i = match key {
        Value::Int(i) => *i,
        other => {
            return Err(RuntimeError::TypeMismatch {
                message: format!("array index must be an int, found {}", other.type_name()),
            })
        }
    };
    if i < 0 || i as usize >= len {
        return Err(RuntimeError::IndexOutOfBounds { index: i, length: len });
    }
    Ok(i as usize)
}

/// `ArrayGet`/`MapGet` both route here: the opcode the compiler chose is a
/// hint from static inference, but the handler always dispatches on the
/// collection's actual runtime kind, so a wrong guess degrades gracefully
/// instead of miscompiling.
pub fn index_get(coll: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match coll {
        Value::Array(arr) => {
            let arr = arr.lock();
            let i = array_index(arr.len(), key)?;
            Ok(arr[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = array_index(chars.len(), key)?;
            Ok(Value::str(chars[i].to_string()))
        }
        Value::Map(map) => {
            let map = map.lock();
            Ok(map.get(&value_to_map_key(key)).cloned().unwrap_or(Value::Nil))
        }
        _ => Err(RuntimeError::TypeMismatch {
            message: format!("cannot index into {}", coll.type_name()),
        }),
    }
}

pub fn index_set(coll: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
    match coll {
        Value::Array(arr) => {
            let mut arr = arr.lock();
            let i = array_index(arr.len(), key)?;
            arr[i] = value;
            Ok(())
        }
        Value::Map(map) => {
            map.lock().insert(value_to_map_key(key), value);
            Ok(())
        }
        _ => Err(RuntimeError::TypeMismatch {
            message: format!("cannot assign into {}", coll.type_name()),
        }),
    }
}

pub fn get_field(coll: &Value, name: &str) -> Result<Value, RuntimeError> {
    match coll {
        Value::Struct(s) => {
            let s = s.lock();
            s.get(name).cloned().ok_or_else(|| RuntimeError::MissingField {
                type_name: s.type_name.clone(),
                field: name.to_string(),
            })
        }
        _ => Err(RuntimeError::TypeMismatch {
            message: format!("cannot read field '{name}' of {}", coll.type_name()),
        }),
    }
}

pub fn set_field(coll: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
    match coll {
        Value::Struct(s) => {
            let mut s = s.lock();
            let type_name = s.type_name.clone();
            if s.set(name, value) {
                Ok(())
            } else {
                Err(RuntimeError::MissingField { type_name, field: name.to_string() })
            }
        }
        _ => Err(RuntimeError::TypeMismatch {
            message: format!("cannot set field '{name}' of {}", coll.type_name()),
        }),
    }
}

pub fn new_struct(type_name: String, field_names: Vec<String>, field_values: Vec<Value>) -> Value {
    Value::Struct(Arc::new(Mutex::new(StructVal { type_name, field_names, field_values })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_promotes_int_to_float() {
        assert!(matches!(add(&Value::Int(1), &Value::Float(2.5)).unwrap(), Value::Float(f) if f == 3.5));
    }

    #[test]
    fn add_concatenates_when_either_side_is_string() {
        let v = add(&Value::Int(1), &Value::str("x")).unwrap();
        assert_eq!(v.display(), "1x");
    }

    #[test]
    fn div_by_zero_int_errors_but_float_yields_infinity() {
        assert!(matches!(div(&Value::Int(1), &Value::Int(0)), Err(RuntimeError::DivisionByZero)));
        let v = div(&Value::Float(1.0), &Value::Float(0.0)).unwrap();
        assert!(matches!(v, Value::Float(f) if f.is_infinite()));
    }

    #[test]
    fn index_get_dispatches_on_runtime_kind_regardless_of_hint() {
        let map = Value::map(Default::default());
        index_set(&map, &Value::str("k"), Value::Int(9)).unwrap();
        assert!(matches!(index_get(&map, &Value::str("k")).unwrap(), Value::Int(9)));
    }

    #[test]
    fn array_index_out_of_bounds_errors() {
        let arr = Value::array(vec![Value::Int(1)]);
        assert!(matches!(
            index_get(&arr, &Value::Int(1)),
            Err(RuntimeError::IndexOutOfBounds { index: 1, length: 1 })
        ));
    }
}
