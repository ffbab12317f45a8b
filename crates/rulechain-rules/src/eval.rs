//! Expression evaluation against a [`FactContext`].
//!
//! Evaluation never mutates facts, so conditions can be evaluated any number
//! of times during conflict resolution.

use std::cmp::Ordering;

use crate::ast::{BinaryOp, Expr, Rule, UnaryOp};
use crate::error::{EvalError, RuleError};
use crate::facts::FactContext;
use crate::functions;
use crate::value::Value;

/// An evaluation error together with the sub-expression that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalFailure {
    pub expression: String,
    pub error: EvalError,
}

impl EvalFailure {
    fn at(expr: &Expr, error: EvalError) -> Self {
        Self {
            expression: expr.to_string(),
            error,
        }
    }

    /// Attach the rule the failure happened in.
    pub fn in_rule(self, rule: &str) -> RuleError {
        RuleError::Evaluation {
            rule: rule.to_string(),
            expression: self.expression,
            source: self.error,
        }
    }
}

type EvalResult<T> = std::result::Result<T, EvalFailure>;

/// Evaluate `expr` against `facts`.
pub fn evaluate(expr: &Expr, facts: &FactContext) -> EvalResult<Value> {
    Evaluator { facts }.eval(expr)
}

/// Evaluate a rule's condition; anything other than a boolean is an error.
pub fn evaluate_condition(rule: &Rule, facts: &FactContext) -> Result<bool, RuleError> {
    let value = evaluate(&rule.condition, facts).map_err(|f| f.in_rule(&rule.name))?;
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalFailure::at(
            &rule.condition,
            EvalError::NonBooleanCondition(other.type_name()),
        )
        .in_rule(&rule.name)),
    }
}

struct Evaluator<'a> {
    facts: &'a FactContext,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(lit.to_value()),
            Expr::Ident(_) => self.resolve_path(expr).cloned(),
            Expr::Member { .. } | Expr::Index { .. } if expr.is_path() => {
                self.resolve_path(expr).cloned()
            }
            // Member access on a computed value, e.g. `Max(a, b).x`.
            Expr::Member { object, field } => {
                let base = self.eval(object)?;
                base.field(field)
                    .cloned()
                    .map_err(|e| EvalFailure::at(expr, e))
            }
            Expr::Index { object, index } => {
                let base = self.eval(object)?;
                let key = self.eval(index)?;
                base.index(&key)
                    .cloned()
                    .map_err(|e| EvalFailure::at(expr, e))
            }
            Expr::Call { function, args } => {
                let args = if function == "IsNil" {
                    args.iter()
                        .map(|arg| self.eval_optional(arg))
                        .collect::<EvalResult<Vec<_>>>()?
                } else {
                    self.eval_args(args)?
                };
                functions::call_function(function, &args).map_err(|e| EvalFailure::at(expr, e))
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_args(args)?;
                functions::call_method(&receiver, method, &args)
                    .map_err(|e| EvalFailure::at(expr, e))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value).map_err(|e| EvalFailure::at(expr, e))
            }
            Expr::Binary { op, left, right } => self.binary(expr, *op, left, right),
        }
    }

    fn eval_args(&self, args: &[Expr]) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Walk a fact path without cloning intermediate containers.
    fn resolve_path(&self, expr: &Expr) -> EvalResult<&'a Value> {
        match expr {
            Expr::Ident(name) => self
                .facts
                .lookup(name)
                .map_err(|e| EvalFailure::at(expr, e)),
            Expr::Member { object, field } => {
                let base = self.resolve_path(object)?;
                base.field(field).map_err(|e| EvalFailure::at(expr, e))
            }
            Expr::Index { object, index } => {
                let base = self.resolve_path(object)?;
                let key = self.eval(index)?;
                base.index(&key).map_err(|e| EvalFailure::at(expr, e))
            }
            other => Err(EvalFailure::at(
                other,
                EvalError::UnexpectedType {
                    expected: "fact path",
                    found: "expression",
                },
            )),
        }
    }

    /// Value of a path for a presence check: absent fields read as nil.
    fn eval_optional(&self, expr: &Expr) -> EvalResult<Value> {
        if !matches!(expr, Expr::Member { .. } | Expr::Index { .. }) {
            return self.eval(expr);
        }
        match self.eval(expr) {
            Ok(value) => Ok(value),
            Err(EvalFailure {
                error: EvalError::MissingField(_) | EvalError::IndexOutOfBounds { .. },
                ..
            }) => Ok(Value::Nil),
            Err(failure) => Err(failure),
        }
    }

    fn binary(&self, expr: &Expr, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult<Value> {
        let fail = |e| EvalFailure::at(expr, e);

        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = self.eval(left)?;
                let lhs = expect_bool(&lhs, op).map_err(fail)?;
                // Short-circuit: the right side is not evaluated at all.
                if (op == BinaryOp::And && !lhs) || (op == BinaryOp::Or && lhs) {
                    return Ok(Value::Bool(lhs));
                }
                let rhs = self.eval(right)?;
                Ok(Value::Bool(expect_bool(&rhs, op).map_err(fail)?))
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                let (lhs, rhs) = if right.is_nil() || left.is_nil() {
                    (self.eval_optional(left)?, self.eval_optional(right)?)
                } else {
                    (self.eval(left)?, self.eval(right)?)
                };
                let equal = lhs.equals(&rhs).map_err(|e| {
                    fail(match e {
                        EvalError::TypeMismatch { left, right, .. } => EvalError::TypeMismatch {
                            op: op.as_str().to_string(),
                            left,
                            right,
                        },
                        other => other,
                    })
                })?;
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                let ordering = lhs.compare(&rhs, op.as_str()).map_err(fail)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::LtEq => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            _ => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                arithmetic(op, &lhs, &rhs).map_err(fail)
            }
        }
    }
}

fn expect_bool(value: &Value, op: BinaryOp) -> Result<bool, EvalError> {
    value.as_bool().ok_or(EvalError::TypeMismatch {
        op: op.as_str().to_string(),
        left: "bool",
        right: value.type_name(),
    })
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, other) => Err(EvalError::UnexpectedType {
            expected: "bool",
            found: other.type_name(),
        }),
        (UnaryOp::Neg, other) => Err(EvalError::UnexpectedType {
            expected: "number",
            found: other.type_name(),
        }),
    }
}

/// `+ - * / %`. Integer overflow and non-finite float results fail with
/// [`EvalError::Overflow`]. `+` concatenates when either side is a string.
pub(crate) fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let mismatch = || EvalError::TypeMismatch {
        op: op.as_str().to_string(),
        left: lhs.type_name(),
        right: rhs.type_name(),
    };

    if op == BinaryOp::Add {
        let scalar = |v: &Value| !matches!(v, Value::Array(_) | Value::Object(_) | Value::Record(_));
        if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
            if scalar(lhs) && scalar(rhs) {
                return Ok(Value::Str(format!("{}{}", lhs, rhs)));
            }
            return Err(mismatch());
        }
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                _ => return Err(mismatch()),
            };
            result.map(Value::Int).ok_or(EvalError::Overflow)
        }
        (a, b) if a.is_number() && b.is_number() => {
            let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => return Err(mismatch()),
            };
            if result.is_finite() {
                Ok(Value::Float(result))
            } else {
                Err(EvalError::Overflow)
            }
        }
        _ => Err(mismatch()),
    }
}
