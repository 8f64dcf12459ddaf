//! The fixed, indexed built-in function table (spec.md §4.3). Each entry is
//! a function from an argument slice to a `Value`; malformed calls never
//! abort the VM — they print a diagnostic to stderr and return `Nil`
//! (spec.md §7's documented softness of the dynamic surface).

use std::collections::HashMap;

use once_cell::sync::OnceCell;

use crate::interp_ops::value_to_map_key;
use crate::value::{MapKey, Value};

/// Index into this table is the operand of `GetBuiltin`/register `GetBuiltin`;
/// order is part of the compiled artifact's contract within a single run, not
/// a stable ABI across builds.
pub const BUILTIN_NAMES: &[&str] = &[
    "print",
    "len",
    "delete",
    "append",
    "keys",
    "values",
    "copy",
    "abs",
    "min",
    "max",
    "sqrt",
    "pow",
    "floor",
    "ceil",
    "split",
    "substring",
    "int",
    "float",
    "string",
    "enumName",
    "enumValue",
];

static BUILTIN_INDEX: OnceCell<HashMap<&'static str, u16>> = OnceCell::new();

/// Resolves a source-level call target to its `GetBuiltin` operand, built
/// once and reused by both compiler back ends instead of scanning
/// `BUILTIN_NAMES` linearly on every call site.
pub fn index_of(name: &str) -> Option<u16> {
    BUILTIN_INDEX
        .get_or_init(|| BUILTIN_NAMES.iter().enumerate().map(|(i, &n)| (n, i as u16)).collect())
        .get(name)
        .copied()
}

fn malformed(name: &str, detail: &str) -> Value {
    eprintln!("builtin '{name}': {detail}");
    Value::Nil
}

/// Joins each argument's stringification with single spaces and a trailing
/// newline, matching the `print` statement's stdout contract (spec.md §6).
pub fn print_values(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&a.display());
    }
    out.push('\n');
    out
}

pub fn call(index: usize, args: &[Value]) -> Value {
    let name = BUILTIN_NAMES.get(index).copied().unwrap_or("<unknown>");
    match name {
        "print" => {
            print!("{}", print_values(args));
            Value::Nil
        }
        "len" => match args.first() {
            Some(Value::Array(a)) => Value::Int(a.lock().len() as i64),
            Some(Value::Map(m)) => Value::Int(m.lock().len() as i64),
            Some(Value::Str(s)) => Value::Int(s.chars().count() as i64),
            _ => malformed(name, "expected an array, map, or string argument"),
        },
        "delete" => match (args.first(), args.get(1)) {
            (Some(Value::Map(m)), Some(key)) => {
                m.lock().remove(&value_to_map_key(key));
                Value::Nil
            }
            _ => malformed(name, "expected (map, key)"),
        },
        "append" => match args.first() {
            Some(Value::Array(a)) => {
                let mut items = a.lock().clone();
                items.extend(args[1..].iter().cloned());
                Value::array(items)
            }
            _ => malformed(name, "expected an array as the first argument"),
        },
        "keys" => match args.first() {
            Some(Value::Map(m)) => {
                let items = m.lock().keys().map(map_key_to_value).collect();
                Value::array(items)
            }
            _ => malformed(name, "expected a map argument"),
        },
        "values" => match args.first() {
            Some(Value::Map(m)) => {
                let items: Vec<Value> = m.lock().values().cloned().collect();
                Value::array(items)
            }
            _ => malformed(name, "expected a map argument"),
        },
        "copy" => match args.first() {
            Some(Value::Array(a)) => Value::array(a.lock().clone()),
            _ => malformed(name, "expected an array argument"),
        },
        "abs" => match args.first() {
            Some(Value::Int(i)) => Value::Int(i.wrapping_abs()),
            Some(Value::Float(f)) => Value::Float(f.abs()),
            _ => malformed(name, "expected a numeric argument"),
        },
        "min" => numeric_fold(name, args, |a, b| if a <= b { a } else { b }),
        "max" => numeric_fold(name, args, |a, b| if a >= b { a } else { b }),
        "sqrt" => match args.first().and_then(Value::as_f64) {
            Some(f) => Value::Float(f.sqrt()),
            None => malformed(name, "expected a numeric argument"),
        },
        "pow" => match (args.first(), args.get(1)) {
            (Some(base), Some(Value::Int(exp))) if *exp >= 0 => match base {
                Value::Int(b) => Value::Int(b.wrapping_pow(*exp as u32)),
                Value::Float(b) => Value::Float(b.powi(*exp as i32)),
                _ => malformed(name, "expected a numeric base"),
            },
            _ => malformed(name, "expected (numeric base, non-negative int exponent)"),
        },
        "floor" => match args.first().and_then(Value::as_f64) {
            Some(f) => Value::Float(f.floor()),
            None => malformed(name, "expected a numeric argument"),
        },
        "ceil" => match args.first().and_then(Value::as_f64) {
            Some(f) => Value::Float(f.ceil()),
            None => malformed(name, "expected a numeric argument"),
        },
        "split" => match (args.first(), args.get(1)) {
            (Some(Value::Str(s)), Some(Value::Str(sep))) => {
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::str(c.to_string())).collect()
                } else {
                    s.split(sep.as_ref()).map(Value::str).collect()
                };
                Value::array(parts)
            }
            _ => malformed(name, "expected (string, separator)"),
        },
        "substring" => match (args.first(), args.get(1), args.get(2)) {
            (Some(Value::Str(s)), Some(Value::Int(start)), Some(Value::Int(end))) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = (*start, *end);
                if start < 0 || end < start || end as usize > chars.len() {
                    return malformed(name, "start/end out of bounds");
                }
                Value::str(chars[start as usize..end as usize].iter().collect::<String>())
            }
            _ => malformed(name, "expected (string, start, end)"),
        },
        "int" => match args.first() {
            Some(Value::Int(i)) => Value::Int(*i),
            Some(Value::Float(f)) => Value::Int(*f as i64),
            Some(Value::Bool(b)) => Value::Int(*b as i64),
            Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).unwrap_or_else(|_| {
                malformed(name, &format!("cannot parse '{s}' as int"))
            }),
            _ => malformed(name, "expected a convertible argument"),
        },
        "float" => match args.first() {
            Some(Value::Int(i)) => Value::Float(*i as f64),
            Some(Value::Float(f)) => Value::Float(*f),
            Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).unwrap_or_else(|_| {
                malformed(name, &format!("cannot parse '{s}' as float"))
            }),
            _ => malformed(name, "expected a convertible argument"),
        },
        "string" => match args.first() {
            Some(v) => Value::str(v.display()),
            None => malformed(name, "expected one argument"),
        },
        "enumName" => match args.get(1).or_else(|| args.first()) {
            // `value` is our string encoding of an enum instance, "Type.Variant";
            // `enumName` needs only the part after the last '.'.
            Some(Value::Str(s)) => match s.rsplit_once('.') {
                Some((_, variant)) => Value::str(variant),
                None => malformed(name, "value is not an enum instance"),
            },
            _ => malformed(name, "expected (type, enum value)"),
        },
        "enumValue" => match (args.first(), args.get(1)) {
            (Some(Value::Str(type_name)), Some(Value::Str(variant))) => {
                Value::str(format!("{type_name}.{variant}"))
            }
            _ => malformed(name, "expected (type name, variant name)"),
        },
        _ => malformed(name, "unknown built-in"),
    }
}

fn map_key_to_value(k: &MapKey) -> Value {
    match k {
        MapKey::Int(i) => Value::Int(*i),
        MapKey::Str(s) => Value::str(s.clone()),
    }
}

fn numeric_fold(name: &str, args: &[Value], pick: impl Fn(f64, f64) -> f64) -> Value {
    if args.len() < 2 {
        return malformed(name, "expected at least two numeric arguments");
    }
    let mut all_int = true;
    let mut acc = match args[0].as_f64() {
        Some(f) => f,
        None => return malformed(name, "expected numeric arguments"),
    };
    all_int &= matches!(args[0], Value::Int(_));
    for a in &args[1..] {
        let f = match a.as_f64() {
            Some(f) => f,
            None => return malformed(name, "expected numeric arguments"),
        };
        all_int &= matches!(a, Value::Int(_));
        acc = pick(acc, f);
    }
    if all_int {
        Value::Int(acc as i64)
    } else {
        Value::Float(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(name: &str) -> usize {
        BUILTIN_NAMES.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn append_does_not_mutate_the_original() {
        let original = Value::array(vec![Value::Int(1)]);
        let appended = call(idx("append"), &[original.clone(), Value::Int(2)]);
        if let (Value::Array(o), Value::Array(n)) = (&original, &appended) {
            assert_eq!(o.lock().len(), 1);
            assert_eq!(n.lock().len(), 2);
        } else {
            panic!("expected arrays");
        }
    }

    #[test]
    fn copy_produces_an_unaliased_array() {
        let a = Value::array(vec![Value::Int(1)]);
        let b = call(idx("copy"), &[a.clone()]);
        if let (Value::Array(a), Value::Array(b)) = (&a, &b) {
            b.lock()[0] = Value::Int(99);
            assert_eq!(a.lock()[0].display(), "1");
            assert_eq!(b.lock()[0].display(), "99");
        } else {
            panic!("expected arrays");
        }
    }

    #[test]
    fn malformed_call_returns_nil_not_an_error() {
        let v = call(idx("sqrt"), &[Value::str("nope")]);
        assert!(matches!(v, Value::Nil));
    }

    #[test]
    fn enum_name_and_value_roundtrip_through_the_string_encoding() {
        let encoded = call(idx("enumValue"), &[Value::str("Color"), Value::str("Red")]);
        assert_eq!(encoded.display(), "Color.Red");
        let name = call(idx("enumName"), &[Value::str("Color"), encoded]);
        assert_eq!(name.display(), "Red");
    }

    #[test]
    fn min_max_promote_to_float_when_any_argument_is_float() {
        assert_eq!(call(idx("min"), &[Value::Int(1), Value::Float(0.5)]).display(), "0.5");
        assert_eq!(call(idx("max"), &[Value::Int(1), Value::Int(2)]).display(), "2");
    }
}
