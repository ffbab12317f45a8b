//! Rule engine for firing matched rules until a fixpoint.
//!
//! Each cycle re-resolves the agenda from scratch, fires the single top
//! entry, and repeats. Execution stops when nothing matches, when the cycle
//! bound is reached, or when a rule calls `Complete()`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::agenda::{matching_rules, RuleMatch};
use crate::ast::{Expr, Rule, Statement};
use crate::config::{ConditionErrorPolicy, EngineConfig};
use crate::error::{EvalError, Result};
use crate::eval::{arithmetic, evaluate, EvalFailure};
use crate::facts::FactContext;
use crate::knowledge::KnowledgeBase;
use crate::value::Value;

/// Why an execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// No rule matched any more.
    Fixpoint,
    /// The cycle bound was reached while rules still matched.
    CycleLimit,
    /// A rule called `Complete()`.
    Completed,
}

/// Execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Number of rules fired.
    pub cycles_run: usize,
    pub termination: Termination,
    /// Names of fired rules, in firing order.
    pub fired: Vec<String>,
}

enum State<'kb> {
    Resolving,
    Firing(&'kb Rule),
    Terminated(Termination),
}

/// Per-execution bookkeeping for `Retract` and `Complete`.
#[derive(Default)]
struct Control {
    retracted: HashSet<String>,
    complete: bool,
}

/// Rule engine.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    config: EngineConfig,
}

impl RuleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Matching rules without firing anything, honouring the configured
    /// condition error policy.
    pub fn fetch_matching_rules(
        &self,
        kb: &KnowledgeBase,
        facts: &FactContext,
    ) -> Result<Vec<RuleMatch>> {
        let agenda = matching_rules(kb, facts, self.config.condition_errors, &HashSet::new())?;
        Ok(agenda.into_iter().map(RuleMatch::from).collect())
    }

    /// Fire rules against `facts` until a fixpoint, the cycle bound, or
    /// `Complete()`. An evaluation error aborts the run; facts keep whatever
    /// mutations happened before it.
    pub fn execute(&self, kb: &KnowledgeBase, facts: &mut FactContext) -> Result<ExecutionOutcome> {
        let max_cycles = self.config.max_cycles;
        let mut control = Control::default();
        let mut fired = Vec::new();
        let mut cycles = 0usize;
        let mut state = State::Resolving;

        tracing::debug!(
            knowledge_base = kb.name(),
            version = kb.version(),
            max_cycles,
            "Execution started"
        );

        let termination = loop {
            state = match state {
                State::Resolving => {
                    let agenda =
                        matching_rules(kb, facts, self.config.condition_errors, &control.retracted)?;
                    match agenda.first() {
                        None => State::Terminated(Termination::Fixpoint),
                        Some(_) if cycles >= max_cycles => {
                            State::Terminated(Termination::CycleLimit)
                        }
                        Some(&top) => State::Firing(top),
                    }
                }
                State::Firing(rule) => {
                    tracing::debug!(rule = %rule.name, salience = rule.salience, cycle = cycles + 1, "Firing rule");
                    for action in &rule.actions {
                        execute_statement(action, facts, kb, &mut control)
                            .map_err(|f| f.in_rule(&rule.name))?;
                    }
                    cycles += 1;
                    fired.push(rule.name.clone());
                    if control.complete {
                        State::Terminated(Termination::Completed)
                    } else {
                        State::Resolving
                    }
                }
                State::Terminated(reason) => break reason,
            };
        };

        tracing::debug!(
            knowledge_base = kb.name(),
            cycles,
            termination = ?termination,
            "Execution finished"
        );

        Ok(ExecutionOutcome {
            cycles_run: cycles,
            termination,
            fired,
        })
    }
}

/// Execute `kb` against `facts` with an explicit cycle bound and the abort
/// policy for condition errors.
pub fn execute(
    kb: &KnowledgeBase,
    facts: &mut FactContext,
    max_cycles: usize,
) -> Result<ExecutionOutcome> {
    RuleEngine::new(
        EngineConfig::default()
            .with_max_cycles(max_cycles)
            .with_condition_errors(ConditionErrorPolicy::Abort),
    )
    .execute(kb, facts)
}

/// One step of an assignment target path.
enum Step {
    Field(String),
    Index(Value),
}

fn execute_statement(
    statement: &Statement,
    facts: &mut FactContext,
    kb: &KnowledgeBase,
    control: &mut Control,
) -> std::result::Result<(), EvalFailure> {
    match statement {
        Statement::Assign { target, op, value } => {
            let fail = |e| EvalFailure {
                expression: statement.to_string(),
                error: e,
            };

            // Everything on the right, and every index on the left, is
            // evaluated before the first write.
            let mut new_value = evaluate(value, facts)?;
            if let Some(op) = op.binary_op() {
                let current = evaluate(target, facts)?;
                new_value = arithmetic(op, &current, &new_value).map_err(fail)?;
            }
            let (root, steps) = target_path(target, facts)?;
            assign(facts, root, &steps, new_value).map_err(fail)
        }
        Statement::Call { procedure, args } => {
            let fail = |e| EvalFailure {
                expression: statement.to_string(),
                error: e,
            };
            let args: Vec<Value> = args
                .iter()
                .map(|arg| evaluate(arg, facts))
                .collect::<std::result::Result<_, _>>()?;

            match procedure.as_str() {
                "Retract" => {
                    let name = match args.first() {
                        Some(Value::Str(name)) => name.clone(),
                        other => {
                            return Err(fail(EvalError::UnexpectedType {
                                expected: "string",
                                found: other.map(Value::type_name).unwrap_or("nothing"),
                            }))
                        }
                    };
                    if kb.rule(&name).is_none() {
                        return Err(fail(EvalError::UnknownRule(name)));
                    }
                    if !control.retracted.insert(name.clone()) {
                        tracing::warn!(rule = %name, "Rule retracted twice");
                    }
                    Ok(())
                }
                "Complete" => {
                    control.complete = true;
                    Ok(())
                }
                "Log" => {
                    let message = args
                        .iter()
                        .map(|a| a.to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    tracing::info!(knowledge_base = kb.name(), "{}", message);
                    Ok(())
                }
                other => Err(fail(EvalError::UnknownFunction(other.to_string()))),
            }
        }
    }
}

/// Split `X.a[0].b` into the fact name and evaluated steps.
fn target_path<'t>(
    target: &'t Expr,
    facts: &FactContext,
) -> std::result::Result<(&'t str, Vec<Step>), EvalFailure> {
    let mut steps = Vec::new();
    let mut node = target;
    loop {
        match node {
            Expr::Ident(name) => {
                steps.reverse();
                return Ok((name.as_str(), steps));
            }
            Expr::Member { object, field } => {
                steps.push(Step::Field(field.clone()));
                node = object.as_ref();
            }
            Expr::Index { object, index } => {
                steps.push(Step::Index(evaluate(index, facts)?));
                node = object.as_ref();
            }
            other => {
                return Err(EvalFailure {
                    expression: other.to_string(),
                    error: EvalError::NotAssignable(other.to_string()),
                })
            }
        }
    }
}

fn assign(
    facts: &mut FactContext,
    root: &str,
    steps: &[Step],
    value: Value,
) -> std::result::Result<(), EvalError> {
    let Some((last, parents)) = steps.split_last() else {
        return Err(EvalError::NotAssignable(format!("fact '{}'", root)));
    };

    let mut slot = facts.lookup_mut(root)?;
    for step in parents {
        slot = match step {
            Step::Field(name) => slot.field_mut(name)?,
            Step::Index(index) => slot.index_mut(index)?,
        };
    }
    match last {
        Step::Field(name) => slot.assign_field(name, value),
        Step::Index(index) => slot.assign_index(index, value),
    }
}
