//! End-to-end tests: compile, bind facts, resolve, and execute.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rulechain_rules::{
    compile, execute, resolve, ConditionErrorPolicy, EngineConfig, EvalError, FactContext,
    KnowledgeLibrary, RuleEngine, RuleError, Termination, Value,
};

#[derive(Debug, Serialize, Deserialize)]
struct TypedJson {
    #[serde(rename = "ID")]
    id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectResult {
    #[serde(rename = "Result")]
    result: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Template {
    state: String,
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Fact {
    net_amount: f32,
    distance: i32,
    duration: i32,
    result: bool,
}

const CONFLICT_RULES: &str = r#"
    rule  DuplicateRule1  "Duplicate Rule 1"  salience 5 {
    when
    (Fact.Distance > 5000  &&   Fact.Duration > 120) && (Fact.Result == false)
    Then
    Fact.NetAmount=143.320007;
    Fact.Result=true;
    }
    rule  DuplicateRule2  "Duplicate Rule 2"  salience 6 {
    when
    (Fact.Distance > 5000  &&   Fact.Duration > 120) && (Fact.Result == false)
    Then
    Fact.NetAmount=143.320007;
    Fact.Result=true;
    }
    rule  DuplicateRule3  "Duplicate Rule 3"  salience 7 {
    when
    (Fact.Distance > 5000  &&   Fact.Duration > 120) && (Fact.Result == false)
    Then
    Fact.NetAmount=143.320007;
    Fact.Result=true;
    }
    rule  DuplicateRule4  "Duplicate Rule 4"  salience 8 {
    when
    (Fact.Distance > 5000  &&   Fact.Duration > 120) && (Fact.Result == false)
    Then
    Fact.NetAmount=143.320007;
    Fact.Result=true;
    }
    rule  DuplicateRule5  "Duplicate Rule 5"  salience 9 {
    when
    (Fact.Distance > 5000  &&   Fact.Duration == 120) && (Fact.Result == false)
    Then
    Output.NetAmount=143.320007;
    Fact.Result=true;
    }"#;

const PAYMENT_RULE: &str = r#"
    rule CheckIfJSONIntWorks {
        when
            Result.State == "No Result" &&
            json.payment == "123" &&
            json.payment_method == "bolbradesco" &&
            json.amount > 10 &&
            json.tax < 10 &&
            json.site != "ASD"
        then
            Result.State = "FOUND";
            Result.ID = "456";
    }"#;

const PAYMENT_JSON: &str = r#"{
    "payment": "123",
    "payment_method": "bolbradesco",
    "amount": 100,
    "tax": 1,
    "site": "MELI"
}"#;

fn conflict_facts(duration: i32) -> FactContext {
    let mut facts = FactContext::new();
    facts
        .bind(
            "Fact",
            &Fact {
                distance: 6000,
                duration,
                ..Default::default()
            },
        )
        .unwrap();
    facts
}

#[test]
fn test_guarded_string_rule_matches_present_id() {
    let kb = compile(
        "TestJSONSimple",
        "0.0.1",
        r#"rule CheckIfJSONStringWorks {
            when R.ID != nil && R.ID == "12345"
            then R.ID = "PERFECT";
        }"#,
    )
    .unwrap();

    let mut facts = FactContext::new();
    facts
        .bind("R", &TypedJson { id: Some("12345".to_string()) })
        .unwrap();
    let matches = resolve(&kb, &facts).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].name, "CheckIfJSONStringWorks");

    // Resolution alone leaves facts untouched.
    assert_eq!(facts.get_as::<TypedJson>("R").unwrap().id.as_deref(), Some("12345"));

    let mut absent = FactContext::new();
    absent.bind("R", &TypedJson { id: None }).unwrap();
    assert!(resolve(&kb, &absent).unwrap().is_empty());

    let mut open = FactContext::new();
    open.bind_json("R", "{}").unwrap();
    assert!(resolve(&kb, &open).unwrap().is_empty());
}

#[test]
fn test_string_fact_method_call() {
    let kb = compile(
        "TestJSONSimple",
        "0.0.1",
        r#"rule CheckIfJSONStringWorks {
            when R.Result == "NoResult" && str.ToUpper() == "A STRING"
            then R.Result = "PERFECT";
        }"#,
    )
    .unwrap();

    let mut facts = FactContext::new();
    facts
        .bind(
            "R",
            &ObjectResult {
                result: "NoResult".to_string(),
            },
        )
        .unwrap();
    facts.bind_json("str", br#""A String""#).unwrap();

    let outcome = execute(&kb, &mut facts, 5).unwrap();
    assert_eq!(outcome.cycles_run, 1);
    assert_eq!(outcome.termination, Termination::Fixpoint);
    assert_eq!(facts.get_as::<ObjectResult>("R").unwrap().result, "PERFECT");
}

#[test]
fn test_json_payment_rule_updates_native_fact() {
    let kb = compile("TestJSONBitComplex", "0.0.1", PAYMENT_RULE).unwrap();

    let mut facts = FactContext::new();
    facts
        .bind(
            "Result",
            &Template {
                state: "No Result".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    facts.bind_json("json", PAYMENT_JSON).unwrap();

    let outcome = execute(&kb, &mut facts, 5).unwrap();
    assert_eq!(outcome.fired, vec!["CheckIfJSONIntWorks"]);
    assert_eq!(outcome.termination, Termination::Fixpoint);

    let result: Template = facts.get_as("Result").unwrap();
    assert_eq!(result.state, "FOUND");
    assert_eq!(result.id, "456");
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({"State": "FOUND", "ID": "456"})
    );
}

#[test]
fn test_json_integer_compares_with_integer_literal() {
    let mut facts = FactContext::new();
    facts.bind_json("json", PAYMENT_JSON).unwrap();
    assert_eq!(
        facts.get("json").unwrap().field("amount").unwrap(),
        &Value::Int(100)
    );

    let kb = compile(
        "amount",
        "1",
        r#"
        rule Big { when json.amount > 10 && json.amount < 1000 then json.big = true; }
        rule AsFloat { when json.amount == 100.0 then json.big = true; }
        rule SameAsNative { when json.amount == Native.amount then json.big = true; }
        "#,
    )
    .unwrap();

    let mut native = std::collections::BTreeMap::new();
    native.insert("amount".to_string(), serde_json::json!(100));
    facts.bind("Native", &native).unwrap();

    let names: Vec<String> = resolve(&kb, &facts)
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["Big", "AsFloat", "SameAsNative"]);
}

#[test]
fn test_two_rule_scenario_resolves_and_converges() {
    let source = r#"
        rule R1 salience 5 { when X.A > 1 then X.A = 0; }
        rule R2 salience 6 { when X.A > 1 then X.A = -1; }
    "#;
    let kb = compile("scenario", "0.0.1", source).unwrap();
    // Compiling the same text again yields the same rules.
    assert_eq!(
        compile("scenario", "0.0.1", source).unwrap().rules(),
        kb.rules()
    );

    let mut facts = FactContext::new();
    facts.bind_json("X", r#"{"A": 2}"#).unwrap();

    let names: Vec<String> = resolve(&kb, &facts)
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["R2", "R1"]);

    let outcome = execute(&kb, &mut facts, 5).unwrap();
    assert_eq!(outcome.cycles_run, 1);
    assert_eq!(outcome.termination, Termination::Fixpoint);
    assert_eq!(facts.to_json()["X"]["A"], -1);
    assert!(resolve(&kb, &facts).unwrap().is_empty());
}

#[test]
fn test_conflict_set_ordered_by_salience() {
    let kb = compile("conflict_rules_test", "0.1.1", CONFLICT_RULES).unwrap();

    let saliences: Vec<i64> = resolve(&kb, &conflict_facts(121))
        .unwrap()
        .iter()
        .map(|m| m.salience)
        .collect();
    assert_eq!(saliences, vec![8, 7, 6, 5]);

    let matches = resolve(&kb, &conflict_facts(120)).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].name, "DuplicateRule5");
    assert_eq!(matches[0].description.as_deref(), Some("Duplicate Rule 5"));
}

#[test]
fn test_all_five_rules_resolve_in_salience_order() {
    let source = CONFLICT_RULES
        .replace("Fact.Duration == 120", "Fact.Duration > 120")
        .replace("Output.NetAmount", "Fact.NetAmount");
    let kb = compile("conflict_rules_test", "0.1.2", &source).unwrap();

    let matches = resolve(&kb, &conflict_facts(121)).unwrap();
    let saliences: Vec<i64> = matches.iter().map(|m| m.salience).collect();
    assert_eq!(saliences, vec![9, 8, 7, 6, 5]);

    let mut facts = conflict_facts(121);
    let outcome = execute(&kb, &mut facts, 5).unwrap();
    assert_eq!(outcome.fired, vec!["DuplicateRule5"]);
    assert_eq!(outcome.termination, Termination::Fixpoint);

    let fact: Fact = facts.get_as("Fact").unwrap();
    assert!(fact.result);
    assert!((fact.net_amount - 143.32).abs() < 0.001);
}

#[test]
fn test_is_nil_rule_fires_on_absent_field() {
    let kb = compile(
        "TestIsNil",
        "0.0.1",
        r#"rule AssignMissingID {
            when IsNil(R.ID)
            then R.ID = "ASSIGNED";
        }"#,
    )
    .unwrap();

    let mut facts = FactContext::new();
    facts.bind_json("R", "{}").unwrap();
    assert_eq!(resolve(&kb, &facts).unwrap().len(), 1);

    let outcome = execute(&kb, &mut facts, 5).unwrap();
    assert_eq!(outcome.cycles_run, 1);
    assert_eq!(outcome.termination, Termination::Fixpoint);
    assert_eq!(facts.to_json()["R"]["ID"], "ASSIGNED");

    let mut present = FactContext::new();
    present.bind("R", &TypedJson { id: Some("12345".to_string()) }).unwrap();
    assert!(resolve(&kb, &present).unwrap().is_empty());
}

#[test]
fn test_action_on_unbound_fact_aborts_execution() {
    let kb = compile("conflict_rules_test", "0.1.1", CONFLICT_RULES).unwrap();
    let mut facts = conflict_facts(120);

    match execute(&kb, &mut facts, 5) {
        Err(RuleError::Evaluation {
            rule,
            expression,
            source,
        }) => {
            assert_eq!(rule, "DuplicateRule5");
            assert_eq!(expression, "Output.NetAmount = 143.320007");
            assert_eq!(source, EvalError::UnboundFact("Output".to_string()));
        }
        other => panic!("Expected evaluation error, got {:?}", other),
    }
    // Nothing before the failing statement wrote to the fact.
    assert!(!facts.get_as::<Fact>("Fact").unwrap().result);
}

#[test]
fn test_record_rejects_unknown_field() {
    let kb = compile(
        "schema",
        "1",
        r#"rule Extra { when Result.State == "" then Result.Extra = 1; }"#,
    )
    .unwrap();
    let mut facts = FactContext::new();
    facts.bind("Result", &Template::default()).unwrap();

    let err = execute(&kb, &mut facts, 5).unwrap_err();
    assert!(matches!(
        err,
        RuleError::Evaluation { source: EvalError::MissingField(ref f), .. } if f == "Extra"
    ));
}

#[test]
fn test_binding_same_name_twice_fails() {
    let mut facts = FactContext::new();
    facts.bind_json("X", r#"{"A": 1}"#).unwrap();
    assert!(matches!(
        facts.bind_json("X", r#"{"A": 2}"#),
        Err(RuleError::DuplicateFact(ref name)) if name == "X"
    ));
    assert!(matches!(
        facts.bind("X", &Template::default()),
        Err(RuleError::DuplicateFact(_))
    ));
    assert_eq!(facts.len(), 1);
    assert_eq!(facts.to_json()["X"]["A"], 1);
}

#[test]
fn test_invalid_json_fact() {
    let mut facts = FactContext::new();
    let err = facts.bind_json("json", "{not json").unwrap_err();
    assert!(matches!(err, RuleError::Json { ref name, .. } if name == "json"));
    assert!(facts.is_empty());
}

#[test]
fn test_skip_policy_keeps_healthy_rules_running() {
    let kb = compile(
        "policy",
        "1",
        r#"
        rule Broken salience 10 { when X.Missing.Deep > 1 then X.A = 0; }
        rule Count { when X.A < 3 then X.A += 1; }
        "#,
    )
    .unwrap();

    let mut facts = FactContext::new();
    facts.bind_json("X", r#"{"A": 0}"#).unwrap();
    assert!(execute(&kb, &mut facts, 5).is_err());

    let engine = RuleEngine::new(
        EngineConfig::default()
            .with_max_cycles(10)
            .with_condition_errors(ConditionErrorPolicy::Skip),
    );
    let outcome = engine.execute(&kb, &mut facts).unwrap();
    assert_eq!(outcome.cycles_run, 3);
    assert_eq!(outcome.termination, Termination::Fixpoint);
    assert_eq!(facts.to_json()["X"]["A"], 3);
}

#[test]
fn test_shared_knowledge_base_across_threads() {
    let library = KnowledgeLibrary::new();
    library
        .build("TestJSONBitComplex", "0.0.1", PAYMENT_RULE)
        .unwrap();
    let kb = library.require("TestJSONBitComplex", "0.0.1").unwrap();

    std::thread::scope(|scope| {
        for i in 0..8 {
            let kb = Arc::clone(&kb);
            scope.spawn(move || {
                let mut facts = FactContext::new();
                facts
                    .bind(
                        "Result",
                        &Template {
                            state: "No Result".to_string(),
                            ..Default::default()
                        },
                    )
                    .unwrap();
                let payment = if i % 2 == 0 { "123" } else { "999" };
                facts
                    .bind_json(
                        "json",
                        format!(
                            r#"{{"payment": "{}", "payment_method": "bolbradesco", "amount": 100, "tax": 1, "site": "MELI"}}"#,
                            payment
                        ),
                    )
                    .unwrap();

                execute(&kb, &mut facts, 5).unwrap();
                let result: Template = facts.get_as("Result").unwrap();
                if i % 2 == 0 {
                    assert_eq!(result.state, "FOUND");
                } else {
                    assert_eq!(result.state, "No Result");
                }
            });
        }
    });

    assert_eq!(library.len(), 1);
}
