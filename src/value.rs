//! The runtime value representation shared by both back ends.
//!
//! A tagged union with `Arc` + `parking_lot::Mutex` for shared mutable
//! containers, rather than `RwLock`/concurrent-map pairing: the VM here is
//! single-threaded so a plain `Mutex` is the simpler tool, even though
//! nothing in this crate spawns threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bytecode_register::Proto;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Int(i) => write!(f, "{i}"),
            MapKey::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The two shapes a compiled function's code can take; a function carries
/// exactly one, decided once at compile time by the selected back end.
#[derive(Debug, Clone)]
pub enum Code {
    Stack(Arc<Vec<u8>>),
    Register(Arc<Proto>),
}

impl Code {
    pub fn as_stack(&self) -> Option<&Arc<Vec<u8>>> {
        match self {
            Code::Stack(c) => Some(c),
            Code::Register(_) => None,
        }
    }

    pub fn as_register(&self) -> Option<&Arc<Proto>> {
        match self {
            Code::Register(p) => Some(p),
            Code::Stack(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct FunctionObj {
    pub name: String,
    pub num_params: usize,
    pub num_locals: usize,
    pub code: Code,
}

#[derive(Debug)]
pub struct ClosureObj {
    pub function: Arc<FunctionObj>,
    pub free: Vec<Value>,
}

#[derive(Debug)]
pub struct StructVal {
    pub type_name: String,
    pub field_names: Vec<String>,
    pub field_values: Vec<Value>,
}

impl StructVal {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field_names.iter().position(|n| n == name).map(|i| &self.field_values[i])
    }

    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.field_names.iter().position(|n| n == name) {
            Some(i) => {
                self.field_values[i] = value;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
    Array(Arc<Mutex<Vec<Value>>>),
    Map(Arc<Mutex<HashMap<MapKey, Value>>>),
    Struct(Arc<Mutex<StructVal>>),
    Function(Arc<FunctionObj>),
    Closure(Arc<ClosureObj>),
    Builtin(usize),
    Nil,
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn map(items: HashMap<MapKey, Value>) -> Value {
        Value::Map(Arc::new(Mutex::new(items)))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Nil => false,
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Function(_) => "function",
            Value::Closure(_) => "function",
            Value::Builtin(_) => "function",
            Value::Nil => "nil",
        }
    }

    /// Structural equality: containers compare by recursive value equality,
    /// never by identity (spec.md §9's explicit resolution for struct
    /// equality generalises naturally to arrays and maps too).
    pub fn eq_val(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.lock(), b.lock());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_val(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.lock(), b.lock());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |v2| v.eq_val(v2)))
            }
            (Value::Struct(a), Value::Struct(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.lock(), b.lock());
                a.type_name == b.type_name
                    && a.field_names == b.field_names
                    && a.field_values.iter().zip(b.field_values.iter()).all(|(x, y)| x.eq_val(y))
            }
            _ => false,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Nil => "nil".to_string(),
            Value::Array(a) => {
                let a = a.lock();
                let items: Vec<String> = a.iter().map(|v| v.display()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let m = m.lock();
                let mut items: Vec<(String, String)> =
                    m.iter().map(|(k, v)| (k.to_string(), v.display())).collect();
                items.sort();
                let rendered: Vec<String> =
                    items.into_iter().map(|(k, v)| format!("{k}: {v}")).collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Struct(s) => {
                let s = s.lock();
                let fields: Vec<String> = s
                    .field_names
                    .iter()
                    .zip(s.field_values.iter())
                    .map(|(n, v)| format!("{n}: {}", v.display()))
                    .collect();
                format!("{}{{{}}}", s.type_name, fields.join(", "))
            }
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Closure(c) => format!("<function {}>", c.function.name),
            Value::Builtin(i) => format!("<builtin #{i}>"),
        }
    }
}
