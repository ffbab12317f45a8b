//! Request-scoped fact bindings.
//!
//! A [`FactContext`] maps symbolic names to [`Value`]s. It is created per
//! evaluation, populated before rules run, and mutated only by rule actions.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EvalError, Result, RuleError};
use crate::value::Value;

/// Mutable set of named facts for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct FactContext {
    facts: HashMap<String, Value>,
}

impl FactContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a native value. Structs become fixed-schema records whose fields
    /// are addressable as `name.field`.
    pub fn bind<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        self.ensure_unbound(name)?;
        let json = serde_json::to_value(value)
            .map_err(|e| RuleError::Serialization(format!("fact '{}': {}", name, e)))?;
        let value = Value::record_from_json(short_type_name::<T>(), json);
        self.facts.insert(name.to_string(), value);
        Ok(())
    }

    /// Bind an already-built value as is.
    pub fn bind_value(&mut self, name: &str, value: Value) -> Result<()> {
        self.ensure_unbound(name)?;
        self.facts.insert(name.to_string(), value);
        Ok(())
    }

    /// Parse raw JSON and bind the resulting tree under `name`.
    pub fn bind_json(&mut self, name: &str, raw: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_unbound(name)?;
        let json: serde_json::Value =
            serde_json::from_slice(raw.as_ref()).map_err(|source| RuleError::Json {
                name: name.to_string(),
                source,
            })?;
        self.facts.insert(name.to_string(), Value::from_json(json));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.facts.get(name)
    }

    /// Read a fact back into a native type, typically after execution has
    /// mutated it.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .facts
            .get(name)
            .ok_or_else(|| RuleError::Serialization(format!("fact '{}' is not bound", name)))?;
        serde_json::from_value(value.to_json())
            .map_err(|e| RuleError::Serialization(format!("fact '{}': {}", name, e)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.facts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Snapshot of every fact as one JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.facts
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub(crate) fn lookup(&self, name: &str) -> std::result::Result<&Value, EvalError> {
        self.facts
            .get(name)
            .ok_or_else(|| EvalError::UnboundFact(name.to_string()))
    }

    pub(crate) fn lookup_mut(&mut self, name: &str) -> std::result::Result<&mut Value, EvalError> {
        self.facts
            .get_mut(name)
            .ok_or_else(|| EvalError::UnboundFact(name.to_string()))
    }

    fn ensure_unbound(&self, name: &str) -> Result<()> {
        if self.facts.contains_key(name) {
            return Err(RuleError::DuplicateFact(name.to_string()));
        }
        Ok(())
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Template {
        #[serde(rename = "State")]
        state: String,
        #[serde(rename = "ID")]
        id: Option<String>,
    }

    #[test]
    fn test_bind_struct_as_record() {
        let mut facts = FactContext::new();
        facts
            .bind(
                "Result",
                &Template {
                    state: "No Result".to_string(),
                    id: None,
                },
            )
            .unwrap();

        match facts.get("Result").unwrap() {
            Value::Record(record) => {
                assert_eq!(record.type_name(), "Template");
                assert_eq!(record.get("State"), Some(&Value::Str("No Result".into())));
                assert_eq!(record.get("ID"), Some(&Value::Nil));
            }
            other => panic!("Expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_bind_keeps_first() {
        let mut facts = FactContext::new();
        facts.bind_json("json", r#"{"amount": 100}"#).unwrap();
        let err = facts.bind_json("json", r#"{"amount": 5}"#).unwrap_err();
        assert!(matches!(err, RuleError::DuplicateFact(ref n) if n == "json"));
        assert_eq!(
            facts.get("json").unwrap().field("amount").unwrap(),
            &Value::Int(100)
        );
    }

    #[test]
    fn test_bind_json_rejects_malformed_input() {
        let mut facts = FactContext::new();
        let err = facts.bind_json("json", "{not json").unwrap_err();
        assert!(matches!(err, RuleError::Json { .. }));
        assert!(!facts.contains("json"));
    }

    #[test]
    fn test_bind_json_scalar() {
        let mut facts = FactContext::new();
        facts.bind_json("str", r#""A String""#).unwrap();
        assert_eq!(facts.get("str"), Some(&Value::Str("A String".into())));
    }

    #[test]
    fn test_get_as_reads_back_struct() {
        let mut facts = FactContext::new();
        let template = Template {
            state: "FOUND".to_string(),
            id: Some("456".to_string()),
        };
        facts.bind("Result", &template).unwrap();
        let back: Template = facts.get_as("Result").unwrap();
        assert_eq!(back, template);
        assert_eq!(facts.names(), vec!["Result"]);
    }
}
