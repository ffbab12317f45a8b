//! Runtime values.
//!
//! Every fact, field and intermediate result is a [`Value`]. JSON-derived
//! trees use [`Value::Object`] (open schema: assignments may add keys), while
//! native structs bound through serde become [`Value::Record`] (fixed schema:
//! only declared fields can be read or written).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::EvalError;

/// A fact value or intermediate result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Record(Record),
}

/// A native structured value with a fixed set of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overwrite a declared field. Unknown fields are rejected, and numeric
    /// values are coerced to the field's current kind when that is lossless.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), EvalError> {
        let slot = self
            .fields
            .get_mut(field)
            .ok_or_else(|| EvalError::MissingField(field.to_string()))?;
        *slot = coerce_into_slot(slot, value)?;
        Ok(())
    }
}

impl Value {
    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Record(_) => "record",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of ints and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Convert a JSON document into an open-schema value tree.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => number_from_json(&n),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a serialized native struct into a fixed-schema tree. Nested
    /// objects become records too.
    pub fn record_from_json(type_name: &str, json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => Value::Record(Record::new(
                type_name,
                map.into_iter()
                    .map(|(k, v)| (k, Value::record_from_json("", v)))
                    .collect(),
            )),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| Value::record_from_json("", v))
                    .collect(),
            ),
            other => Value::from_json(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Record(record) => serde_json::Value::Object(
                record
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Member access: `value.field`.
    pub fn field(&self, name: &str) -> Result<&Value, EvalError> {
        match self {
            Value::Object(map) => map
                .get(name)
                .ok_or_else(|| EvalError::MissingField(name.to_string())),
            Value::Record(record) => record
                .get(name)
                .ok_or_else(|| EvalError::MissingField(name.to_string())),
            Value::Nil => Err(EvalError::MissingField(name.to_string())),
            other => Err(EvalError::UnexpectedType {
                expected: "object",
                found: other.type_name(),
            }),
        }
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Result<&mut Value, EvalError> {
        match self {
            Value::Object(map) => map
                .get_mut(name)
                .ok_or_else(|| EvalError::MissingField(name.to_string())),
            Value::Record(record) => record
                .fields
                .get_mut(name)
                .ok_or_else(|| EvalError::MissingField(name.to_string())),
            other => Err(EvalError::NotAssignable(format!(
                "field '{}' of {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Index access: `array[int]` or `object["key"]`.
    pub fn index(&self, index: &Value) -> Result<&Value, EvalError> {
        match (self, index) {
            (Value::Array(items), Value::Int(i)) => {
                let pos = array_position(*i, items.len())?;
                Ok(&items[pos])
            }
            (Value::Object(_) | Value::Record(_) | Value::Nil, Value::Str(key)) => self.field(key),
            (Value::Nil, Value::Int(i)) => Err(EvalError::IndexOutOfBounds { index: *i, len: 0 }),
            (container, key) => Err(EvalError::TypeMismatch {
                op: "[]".to_string(),
                left: container.type_name(),
                right: key.type_name(),
            }),
        }
    }

    pub(crate) fn index_mut(&mut self, index: &Value) -> Result<&mut Value, EvalError> {
        match index {
            Value::Str(key) => self.field_mut(key),
            Value::Int(i) => match self {
                Value::Array(items) => {
                    let pos = array_position(*i, items.len())?;
                    Ok(&mut items[pos])
                }
                other => Err(EvalError::TypeMismatch {
                    op: "[]".to_string(),
                    left: other.type_name(),
                    right: "int",
                }),
            },
            key => Err(EvalError::TypeMismatch {
                op: "[]".to_string(),
                left: self.type_name(),
                right: key.type_name(),
            }),
        }
    }

    /// Write `self.name = value`. Objects accept new keys, records only
    /// their declared fields.
    pub(crate) fn assign_field(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        match self {
            Value::Object(map) => {
                map.insert(name.to_string(), value);
                Ok(())
            }
            Value::Record(record) => record.set(name, value),
            other => Err(EvalError::NotAssignable(format!(
                "field '{}' of {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Write `self[index] = value`.
    pub(crate) fn assign_index(&mut self, index: &Value, value: Value) -> Result<(), EvalError> {
        match index {
            Value::Str(key) => self.assign_field(key, value),
            Value::Int(_) => {
                *self.index_mut(index)? = value;
                Ok(())
            }
            key => Err(EvalError::TypeMismatch {
                op: "[]".to_string(),
                left: self.type_name(),
                right: key.type_name(),
            }),
        }
    }

    /// Equality with numeric promotion. Nil equals only nil; other values of
    /// unrelated types cannot be compared.
    pub fn equals(&self, other: &Value) -> Result<bool, EvalError> {
        match (self, other) {
            (Value::Nil, Value::Nil) => Ok(true),
            (Value::Nil, _) | (_, Value::Nil) => Ok(false),
            (a, b) if a.is_number() && b.is_number() => {
                Ok(compare_numbers(a, b) == Some(Ordering::Equal))
            }
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b) {
                    if !x.equals(y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Object(_) | Value::Record(_), Value::Object(_) | Value::Record(_)) => {
                Ok(self.to_json() == other.to_json())
            }
            (a, b) => Err(EvalError::TypeMismatch {
                op: "==".to_string(),
                left: a.type_name(),
                right: b.type_name(),
            }),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`: numbers (promoted) and strings.
    pub fn compare(&self, other: &Value, op: &str) -> Result<Ordering, EvalError> {
        let mismatch = || EvalError::TypeMismatch {
            op: op.to_string(),
            left: self.type_name(),
            right: other.type_name(),
        };
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => compare_numbers(a, b).ok_or_else(mismatch),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) | Value::Record(Record { fields, .. }) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

fn number_from_json(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        // u64 beyond i64::MAX and all non-integral numbers.
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn array_position(index: i64, len: usize) -> Result<usize, EvalError> {
    usize::try_from(index)
        .ok()
        .filter(|pos| *pos < len)
        .ok_or(EvalError::IndexOutOfBounds { index, len })
}

/// Compare two numbers, exactly when an integer meets an integral float.
pub(crate) fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => int_float_cmp(*x, *y),
        (Value::Float(x), Value::Int(y)) => int_float_cmp(*y, *x).map(Ordering::reverse),
        _ => None,
    }
}

fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    // 2^63 as f64; integral floats inside [-2^63, 2^63) convert exactly.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(i.cmp(&(f as i64)))
    } else {
        (i as f64).partial_cmp(&f)
    }
}

fn coerce_into_slot(slot: &Value, value: Value) -> Result<Value, EvalError> {
    match (slot, value) {
        (Value::Nil, v) | (_, v @ Value::Nil) => Ok(v),
        (Value::Int(_), Value::Float(f)) => {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Ok(Value::Int(f as i64))
            } else {
                Err(EvalError::UnexpectedType {
                    expected: "int",
                    found: "float",
                })
            }
        }
        (Value::Float(_), Value::Int(i)) => Ok(Value::Float(i as f64)),
        (Value::Object(_) | Value::Record(_), v @ (Value::Object(_) | Value::Record(_))) => Ok(v),
        (s, v) if std::mem::discriminant(s) == std::mem::discriminant(&v) => Ok(v),
        (s, v) => Err(EvalError::UnexpectedType {
            expected: s.type_name(),
            found: v.type_name(),
        }),
    }
}
