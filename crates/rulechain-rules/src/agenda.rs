//! Conflict resolution: which rules currently match, and in what order.

use std::cmp::Reverse;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ast::Rule;
use crate::config::ConditionErrorPolicy;
use crate::error::Result;
use crate::eval::evaluate_condition;
use crate::facts::FactContext;
use crate::knowledge::KnowledgeBase;

/// One agenda entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub name: String,
    pub salience: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&Rule> for RuleMatch {
    fn from(rule: &Rule) -> Self {
        Self {
            name: rule.name.clone(),
            salience: rule.salience,
            description: rule.description.clone(),
        }
    }
}

/// Rules whose condition holds against `facts`, highest salience first and
/// declaration order among equals. Any condition error aborts resolution.
///
/// This only reads `facts`, so it doubles as a fetch-only diagnostic.
pub fn resolve(kb: &KnowledgeBase, facts: &FactContext) -> Result<Vec<RuleMatch>> {
    let agenda = matching_rules(kb, facts, ConditionErrorPolicy::Abort, &HashSet::new())?;
    Ok(agenda.into_iter().map(RuleMatch::from).collect())
}

/// Ordered matching rules, leaving out any name in `retracted`.
pub(crate) fn matching_rules<'kb>(
    kb: &'kb KnowledgeBase,
    facts: &FactContext,
    policy: ConditionErrorPolicy,
    retracted: &HashSet<String>,
) -> Result<Vec<&'kb Rule>> {
    let mut agenda = Vec::new();

    for rule in kb.rules() {
        if retracted.contains(&rule.name) {
            continue;
        }
        match evaluate_condition(rule, facts) {
            Ok(true) => agenda.push(rule),
            Ok(false) => {}
            Err(e) => match policy {
                ConditionErrorPolicy::Abort => return Err(e),
                ConditionErrorPolicy::Skip => {
                    tracing::warn!(rule = %rule.name, error = %e, "Skipping rule with failing condition");
                }
            },
        }
    }

    // Sort on the declaration index rather than relying on storage order.
    agenda.sort_by_key(|rule| (Reverse(rule.salience), rule.index));

    tracing::debug!(
        knowledge_base = kb.name(),
        matched = agenda.len(),
        "Agenda resolved"
    );
    Ok(agenda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use crate::knowledge::compile;

    fn facts(a: i64) -> FactContext {
        let mut facts = FactContext::new();
        facts
            .bind_json("X", format!(r#"{{"A": {}}}"#, a))
            .unwrap();
        facts
    }

    #[test]
    fn test_equal_salience_keeps_declaration_order() {
        let kb = compile(
            "ties",
            "1",
            r#"
            rule C salience 1 { when X.A > 0 then X.A = 0; }
            rule A salience 1 { when X.A > 0 then X.A = 0; }
            rule B salience 2 { when X.A > 0 then X.A = 0; }
            rule D salience 1 { when X.A > 0 then X.A = 0; }
            "#,
        )
        .unwrap();
        let names: Vec<String> = resolve(&kb, &facts(1))
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["B", "C", "A", "D"]);
    }

    #[test]
    fn test_retracted_rules_are_left_out() {
        let kb = compile(
            "retract",
            "1",
            "rule A { when X.A > 0 then X.A = 0; } rule B { when X.A > 0 then X.A = 0; }",
        )
        .unwrap();
        let retracted = HashSet::from(["A".to_string()]);
        let agenda =
            matching_rules(&kb, &facts(1), ConditionErrorPolicy::Abort, &retracted).unwrap();
        assert_eq!(agenda.len(), 1);
        assert_eq!(agenda[0].name, "B");
    }

    #[test]
    fn test_condition_error_policies() {
        let kb = compile(
            "errors",
            "1",
            r#"
            rule Broken salience 9 { when X.Missing > 1 then X.A = 0; }
            rule Fine { when X.A > 0 then X.A = 0; }
            "#,
        )
        .unwrap();

        match resolve(&kb, &facts(1)) {
            Err(RuleError::Evaluation {
                rule, expression, ..
            }) => {
                assert_eq!(rule, "Broken");
                assert_eq!(expression, "X.Missing");
            }
            other => panic!("Expected evaluation error, got {:?}", other),
        }

        let agenda = matching_rules(
            &kb,
            &facts(1),
            ConditionErrorPolicy::Skip,
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(agenda.len(), 1);
        assert_eq!(agenda[0].name, "Fine");
    }

    #[test]
    fn test_non_boolean_condition_is_error() {
        let kb = compile("nb", "1", "rule R { when X.A then X.A = 0; }").unwrap();
        let err = resolve(&kb, &facts(1)).unwrap_err();
        assert!(err.to_string().contains("expected bool"));
    }
}
