//! Compiled rule representation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A compiled rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name, unique within its knowledge base.
    pub name: String,
    /// Rule description (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Priority; higher fires first.
    pub salience: i64,
    /// Condition to evaluate.
    pub condition: Expr,
    /// Actions to execute, in order, when the rule fires.
    pub actions: Vec<Statement>,
    /// Position of the rule in its source unit, used as the agenda tie-break.
    pub index: usize,
    pub line: usize,
    pub column: usize,
}

/// Literal constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Nil => Value::Nil,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }

    /// Binding strength; larger binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::NotEq => 3,
            Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        self.precedence() >= 5
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    /// A bound fact name.
    Ident(String),
    /// `object.field`
    Member { object: Box<Expr>, field: String },
    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// Built-in global function: `Len(x)`.
    Call { function: String, args: Vec<Expr> },
    /// Method on a value: `str.ToUpper()`.
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn is_nil(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Nil))
    }

    /// Whether the expression is a path of member/index accesses rooted at a
    /// fact name.
    pub fn is_path(&self) -> bool {
        match self {
            Expr::Ident(_) => true,
            Expr::Member { object, .. } | Expr::Index { object, .. } => object.is_path(),
            _ => false,
        }
    }

    /// Levels in the expression tree; a literal or name has height 1.
    pub fn height(&self) -> usize {
        let children = match self {
            Expr::Literal(_) | Expr::Ident(_) => 0,
            Expr::Member { object, .. } => object.height(),
            Expr::Index { object, index } => object.height().max(index.height()),
            Expr::Call { args, .. } => args.iter().map(Expr::height).max().unwrap_or(0),
            Expr::MethodCall { receiver, args, .. } => args
                .iter()
                .map(Expr::height)
                .max()
                .unwrap_or(0)
                .max(receiver.height()),
            Expr::Unary { operand, .. } => operand.height(),
            Expr::Binary { left, right, .. } => left.height().max(right.height()),
        };
        children + 1
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => 7,
            _ => 8,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Nil => write!(f, "nil"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

fn fmt_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Member { object, field } => {
                object.fmt_operand(f, 8)?;
                write!(f, ".{}", field)
            }
            Expr::Index { object, index } => {
                object.fmt_operand(f, 8)?;
                write!(f, "[{}]", index)
            }
            Expr::Call { function, args } => {
                write!(f, "{}(", function)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                receiver.fmt_operand(f, 8)?;
                write!(f, ".{}(", method)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::Unary { op, operand } => {
                write!(f, "{}", if *op == UnaryOp::Not { "!" } else { "-" })?;
                operand.fmt_operand(f, 7)
            }
            Expr::Binary { op, left, right } => {
                // Left-associative: the right operand needs parens at equal precedence.
                left.fmt_operand(f, op.precedence())?;
                write!(f, " {} ", op.as_str())?;
                right.fmt_operand(f, op.precedence() + 1)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
        }
    }

    /// Arithmetic operator a compound assignment applies.
    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self {
            Self::Set => None,
            Self::Add => Some(BinaryOp::Add),
            Self::Sub => Some(BinaryOp::Sub),
            Self::Mul => Some(BinaryOp::Mul),
            Self::Div => Some(BinaryOp::Div),
        }
    }
}

/// Action statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `target.path = value;`
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    /// `Retract("Rule");`, `Complete();`, `Log(...)`.
    Call { procedure: String, args: Vec<Expr> },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Assign { target, op, value } => {
                write!(f, "{} {} {}", target, op.as_str(), value)
            }
            Statement::Call { procedure, args } => {
                write!(f, "{}(", procedure)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Int(i)))
    }

    #[test]
    fn test_display_keeps_needed_parens() {
        let sum = Expr::Binary {
            op: BinaryOp::Add,
            left: ident("a"),
            right: int(1),
        };
        let product = Expr::Binary {
            op: BinaryOp::Mul,
            left: Box::new(sum),
            right: int(2),
        };
        assert_eq!(product.to_string(), "(a + 1) * 2");

        let sub = Expr::Binary {
            op: BinaryOp::Sub,
            left: ident("a"),
            right: Box::new(Expr::Binary {
                op: BinaryOp::Sub,
                left: ident("b"),
                right: ident("c"),
            }),
        };
        assert_eq!(sub.to_string(), "a - (b - c)");
        assert_eq!(sub.height(), 3);
    }

    #[test]
    fn test_display_member_and_calls() {
        let expr = Expr::MethodCall {
            receiver: Box::new(Expr::Member {
                object: ident("R"),
                field: "Name".to_string(),
            }),
            method: "ToUpper".to_string(),
            args: vec![],
        };
        assert_eq!(expr.to_string(), "R.Name.ToUpper()");
        assert!(!expr.is_path());
        assert_eq!(expr.height(), 3);

        let stmt = Statement::Call {
            procedure: "Retract".to_string(),
            args: vec![Expr::Literal(Literal::Str("R1".to_string()))],
        };
        assert_eq!(stmt.to_string(), "Retract(\"R1\")");
    }
}
