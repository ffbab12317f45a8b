//! Rule DSL parser.
//!
//! A source unit holds zero or more rules:
//!
//! ```text
//! rule CheckIfJSONIntWorks "Matches paid orders" salience 10 {
//!     when
//!         Result.State == "No Result" &&
//!         json.amount > 10
//!     then
//!         Result.State = "FOUND";
//!         Retract("CheckIfJSONIntWorks");
//! }
//! ```
//!
//! Keywords are case-insensitive, identifiers are not. The description and
//! `salience` modifiers are optional and appear in that order. Every action
//! ends with `;`. `//` and `/* */` comments are skipped.

use std::collections::HashSet;

use crate::ast::{AssignOp, BinaryOp, Expr, Literal, Rule, Statement, UnaryOp};
use crate::error::{Result, RuleError};
use crate::functions;
use crate::lexer::{tokenize, Token, TokenKind};

/// Deepest expression nesting (parentheses, calls, indices, unary chains)
/// accepted before parsing fails.
pub const MAX_NESTING: usize = 64;

/// Tallest expression tree accepted, counting operator and accessor chains.
pub const MAX_HEIGHT: usize = 128;

/// Rule DSL parser.
pub struct RuleDslParser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl RuleDslParser {
    /// Parse a whole source unit. Fails on the first error; no partial result
    /// is returned.
    pub fn parse(source: &str) -> Result<Vec<Rule>> {
        let mut parser = Self::new(source)?;
        let mut rules: Vec<Rule> = Vec::new();
        let mut seen = HashSet::new();

        while !parser.check(&TokenKind::Eof) {
            let rule = parser.parse_rule(rules.len())?;
            if !seen.insert(rule.name.clone()) {
                return Err(RuleError::DuplicateRule {
                    name: rule.name,
                    line: rule.line,
                    column: rule.column,
                });
            }
            rules.push(rule);
        }

        check_retract_targets(&rules)?;
        Ok(rules)
    }

    /// Parse a standalone expression, e.g. `json.amount > 10`.
    pub fn parse_expression(source: &str) -> Result<Expr> {
        let mut parser = Self::new(source)?;
        let expr = parser.expression()?;
        parser.expect(&TokenKind::Eof)?;
        Ok(expr)
    }

    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    fn current(&self) -> &Token {
        // The token stream always ends with Eof and we never advance past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> RuleError {
        let token = self.current();
        RuleError::compile(token.line, token.column, message)
    }

    fn expected(&self, what: &str) -> RuleError {
        self.error_here(format!(
            "expected {}, found {}",
            what,
            self.current().kind.describe()
        ))
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.expected(&kind.describe()))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.expected(what)),
        }
    }

    fn parse_rule(&mut self, index: usize) -> Result<Rule> {
        let start = self.expect(&TokenKind::Rule)?;
        let name = self.expect_ident("rule name")?;

        let description = match &self.current().kind {
            TokenKind::Str(text) => {
                let text = text.clone();
                self.advance();
                Some(text)
            }
            _ => None,
        };

        let salience = if self.eat(&TokenKind::Salience) {
            self.salience()?
        } else {
            0
        };

        self.expect(&TokenKind::LBrace)?;
        self.expect(&TokenKind::When)?;
        let condition_at = self.current().clone();
        let condition = self.expression()?;
        check_condition_shape(&condition, &condition_at)?;

        self.expect(&TokenKind::Then)?;
        let mut actions = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.expected("'}'"));
            }
            actions.push(self.statement()?);
        }
        if actions.is_empty() {
            return Err(self.error_here(format!("rule '{}' has no actions after 'then'", name)));
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(Rule {
            name,
            description,
            salience,
            condition,
            actions,
            index,
            line: start.line,
            column: start.column,
        })
    }

    fn salience(&mut self) -> Result<i64> {
        let negative = self.eat(&TokenKind::Minus);
        match self.current().kind {
            TokenKind::Int(n) => {
                let value = signed(n, negative)
                    .ok_or_else(|| self.error_here("salience is out of range"))?;
                self.advance();
                Ok(value)
            }
            _ => Err(self.expected("integer salience")),
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        let at = self.current().clone();

        let is_call = matches!(self.peek_kind(1), TokenKind::LParen);
        if let (TokenKind::Ident(name), true) = (&at.kind, is_call) {
            let procedure = name.clone();
            if !functions::is_procedure(&procedure) {
                return Err(RuleError::compile(
                    at.line,
                    at.column,
                    if functions::is_function(&procedure) {
                        format!("'{}' has no effect as an action", procedure)
                    } else {
                        format!("unknown procedure '{}'", procedure)
                    },
                ));
            }
            self.advance();
            self.advance();
            let args = self.arguments()?;
            check_procedure_arity(&procedure, args.len(), &at)?;
            self.expect(&TokenKind::Semi)?;
            return Ok(Statement::Call { procedure, args });
        }

        let target = self.postfix()?;
        if !target.is_path() {
            return Err(RuleError::compile(
                at.line,
                at.column,
                format!("cannot assign to `{}`", target),
            ));
        }
        if let Expr::Ident(name) = &target {
            return Err(RuleError::compile(
                at.line,
                at.column,
                format!("cannot rebind fact '{}'; assign to one of its fields", name),
            ));
        }

        let op = match self.current().kind {
            TokenKind::Assign => AssignOp::Set,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Sub,
            TokenKind::StarAssign => AssignOp::Mul,
            TokenKind::SlashAssign => AssignOp::Div,
            _ => return Err(self.expected("assignment operator")),
        };
        self.advance();
        let value = self.expression()?;
        self.expect(&TokenKind::Semi)?;
        Ok(Statement::Assign { target, op, value })
    }

    fn expression(&mut self) -> Result<Expr> {
        self.nested(|parser| parser.binary(1))
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(format!(
                "expression is nested more than {} levels deep",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Reject trees that grew past [`MAX_HEIGHT`] through a chain of
    /// operators or accessors.
    fn within_height(&self, expr: Expr) -> Result<Expr> {
        if expr.height() > MAX_HEIGHT {
            return Err(self.error_here(format!(
                "expression is more than {} levels deep",
                MAX_HEIGHT
            )));
        }
        Ok(expr)
    }

    /// Precedence climbing over left-associative binary operators.
    fn binary(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut left = self.unary()?;
        while let Some(op) = binary_op(&self.current().kind) {
            if op.precedence() < min_precedence {
                break;
            }
            self.advance();
            let right = self.binary(op.precedence() + 1)?;
            left = self.within_height(Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            })?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Bang) {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.eat(&TokenKind::Minus) {
            // Fold negative integer literals so i64::MIN is expressible.
            if let TokenKind::Int(n) = self.current().kind {
                let value = signed(n, true)
                    .ok_or_else(|| self.error_here("integer literal is out of range"))?;
                self.advance();
                return Ok(Expr::Literal(Literal::Int(value)));
            }
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("field or method name")?;
                if self.eat(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    expr = self.within_height(Expr::MethodCall {
                        receiver: Box::new(expr),
                        method: name,
                        args,
                    })?;
                } else {
                    expr = self.within_height(Expr::Member {
                        object: Box::new(expr),
                        field: name,
                    })?;
                }
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket)?;
                expr = self.within_height(Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                })?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        let expr = match token.kind {
            TokenKind::Nil => Expr::Literal(Literal::Nil),
            TokenKind::True => Expr::Literal(Literal::Bool(true)),
            TokenKind::False => Expr::Literal(Literal::Bool(false)),
            TokenKind::Str(s) => Expr::Literal(Literal::Str(s)),
            TokenKind::Float(f) => Expr::Literal(Literal::Float(f)),
            TokenKind::Int(n) => Expr::Literal(Literal::Int(
                signed(n, false).ok_or_else(|| self.error_here("integer literal is out of range"))?,
            )),
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::Ident(name) => {
                if self.peek_kind(1) == &TokenKind::LParen {
                    if !functions::is_function(&name) {
                        return Err(self.error_here(if functions::is_procedure(&name) {
                            format!("'{}' can only be used as an action", name)
                        } else {
                            format!("unknown function '{}'", name)
                        }));
                    }
                    self.advance();
                    self.advance();
                    let args = self.arguments()?;
                    return Ok(Expr::Call {
                        function: name,
                        args,
                    });
                }
                Expr::Ident(name)
            }
            _ => return Err(self.expected("expression")),
        };
        self.advance();
        Ok(expr)
    }

    /// Comma-separated arguments after an opening parenthesis, through `)`.
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            if !self.eat(&TokenKind::Comma) {
                return Err(self.expected("',' or ')'"));
            }
        }
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::OrOr => BinaryOp::Or,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::NotEq,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::LtEq => BinaryOp::LtEq,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::GtEq => BinaryOp::GtEq,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        _ => return None,
    })
}

fn signed(magnitude: u64, negative: bool) -> Option<i64> {
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// Reject conditions that can never produce a boolean, whatever the facts.
fn check_condition_shape(condition: &Expr, at: &Token) -> Result<()> {
    let not_boolean = match condition {
        Expr::Literal(lit) => !matches!(lit, Literal::Bool(_)),
        Expr::Binary { op, .. } => op.is_arithmetic(),
        Expr::Unary { op, .. } => *op == UnaryOp::Neg,
        _ => false,
    };
    if not_boolean {
        return Err(RuleError::compile(
            at.line,
            at.column,
            format!("condition `{}` is not a boolean expression", condition),
        ));
    }
    Ok(())
}

fn check_procedure_arity(procedure: &str, got: usize, at: &Token) -> Result<()> {
    let expected = match procedure {
        "Retract" => Some(1),
        "Complete" => Some(0),
        _ => None,
    };
    match expected {
        Some(n) if n != got => Err(RuleError::compile(
            at.line,
            at.column,
            format!("'{}' expects {} argument(s), got {}", procedure, n, got),
        )),
        _ => Ok(()),
    }
}

/// `Retract("Name")` with a literal name must point at a rule in the same unit.
fn check_retract_targets(rules: &[Rule]) -> Result<()> {
    let names: HashSet<&str> = rules.iter().map(|r| r.name.as_str()).collect();
    for rule in rules {
        for action in &rule.actions {
            if let Statement::Call { procedure, args } = action {
                if let (true, [Expr::Literal(Literal::Str(target))]) =
                    (procedure == "Retract", args.as_slice())
                {
                    if !names.contains(target.as_str()) {
                        return Err(RuleError::compile(
                            rule.line,
                            rule.column,
                            format!("rule '{}' retracts unknown rule '{}'", rule.name, target),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}
