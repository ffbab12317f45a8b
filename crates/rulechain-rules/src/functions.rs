//! Built-in functions and value methods available to rule expressions.

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::value::{compare_numbers, Value};

/// Global functions usable inside expressions.
pub const FUNCTIONS: &[&str] = &["Len", "Abs", "Max", "Min", "Floor", "Ceil", "IsNil", "Now"];

/// Procedures usable only as action statements.
pub const PROCEDURES: &[&str] = &["Retract", "Complete", "Log"];

pub fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub fn is_procedure(name: &str) -> bool {
    PROCEDURES.contains(&name)
}

fn arity(function: &str, expected: &str, args: &[Value], ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::Arity {
            function: function.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        })
    }
}

fn number<'a>(value: &'a Value) -> Result<&'a Value, EvalError> {
    if value.is_number() {
        Ok(value)
    } else {
        Err(EvalError::UnexpectedType {
            expected: "number",
            found: value.type_name(),
        })
    }
}

fn string<'a>(value: &'a Value) -> Result<&'a str, EvalError> {
    value.as_str().ok_or(EvalError::UnexpectedType {
        expected: "string",
        found: value.type_name(),
    })
}

/// Evaluate a global function on already-evaluated arguments.
pub fn call_function(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "Len" => {
            arity(name, "1", args, args.len() == 1)?;
            length(&args[0])
        }
        "Abs" => {
            arity(name, "1", args, args.len() == 1)?;
            match number(&args[0])? {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or(EvalError::Overflow),
                other => Ok(Value::Float(other.as_f64().unwrap_or_default().abs())),
            }
        }
        "Max" | "Min" => {
            arity(name, "at least 1", args, !args.is_empty())?;
            let wanted = if name == "Max" {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            let mut best = number(&args[0])?;
            for arg in &args[1..] {
                let arg = number(arg)?;
                if compare_numbers(arg, best) == Some(wanted) {
                    best = arg;
                }
            }
            if args.iter().all(|a| matches!(a, Value::Int(_))) {
                Ok(best.clone())
            } else {
                Ok(Value::Float(best.as_f64().unwrap_or_default()))
            }
        }
        "Floor" | "Ceil" => {
            arity(name, "1", args, args.len() == 1)?;
            match number(&args[0])? {
                Value::Int(i) => Ok(Value::Int(*i)),
                other => {
                    let x = other.as_f64().unwrap_or_default();
                    Ok(Value::Float(if name == "Floor" { x.floor() } else { x.ceil() }))
                }
            }
        }
        "IsNil" => {
            arity(name, "1", args, args.len() == 1)?;
            Ok(Value::Bool(args[0].is_nil()))
        }
        "Now" => {
            arity(name, "0", args, args.is_empty())?;
            Ok(Value::Int(chrono::Utc::now().timestamp()))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn length(value: &Value) -> Result<Value, EvalError> {
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Record(record) => record.fields().len(),
        other => {
            return Err(EvalError::UnexpectedType {
                expected: "string, array or object",
                found: other.type_name(),
            })
        }
    };
    Ok(Value::Int(len as i64))
}

/// Evaluate `receiver.method(args)`.
pub fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    match receiver {
        Value::Str(s) => string_method(s, method, args),
        Value::Array(items) => array_method(items, method, args),
        other => Err(EvalError::UnknownMethod {
            method: method.to_string(),
            receiver: other.type_name(),
        }),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let no_args = || arity(method, "0", args, args.is_empty());
    let one_str = || single_string(method, args);
    match method {
        "ToUpper" => {
            no_args()?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "ToLower" => {
            no_args()?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "Trim" => {
            no_args()?;
            Ok(Value::Str(s.trim().to_string()))
        }
        "Len" => {
            no_args()?;
            Ok(Value::Int(s.chars().count() as i64))
        }
        "Contains" => Ok(Value::Bool(s.contains(one_str()?))),
        "HasPrefix" => Ok(Value::Bool(s.starts_with(one_str()?))),
        "HasSuffix" => Ok(Value::Bool(s.ends_with(one_str()?))),
        "Index" => {
            let needle = one_str()?;
            let index = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        "Compare" => {
            let other = one_str()?;
            Ok(Value::Int(match s.cmp(other) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }))
        }
        "Replace" => {
            arity(method, "2", args, args.len() == 2)?;
            Ok(Value::Str(s.replace(string(&args[0])?, string(&args[1])?)))
        }
        _ => Err(EvalError::UnknownMethod {
            method: method.to_string(),
            receiver: "string",
        }),
    }
}

fn single_string<'a>(method: &str, args: &'a [Value]) -> Result<&'a str, EvalError> {
    arity(method, "1", args, args.len() == 1)?;
    string(&args[0])
}

fn array_method(items: &[Value], method: &str, args: &[Value]) -> Result<Value, EvalError> {
    match method {
        "Len" => {
            arity(method, "0", args, args.is_empty())?;
            Ok(Value::Int(items.len() as i64))
        }
        "Contains" => {
            arity(method, "1", args, args.len() == 1)?;
            // Elements of another type simply do not match.
            let found = items
                .iter()
                .any(|item| item.equals(&args[0]).unwrap_or(false));
            Ok(Value::Bool(found))
        }
        _ => Err(EvalError::UnknownMethod {
            method: method.to_string(),
            receiver: "array",
        }),
    }
}
