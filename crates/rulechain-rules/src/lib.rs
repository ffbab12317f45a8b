//! Forward-Chaining Rules Engine Crate
//!
//! This crate compiles a small rule language into versioned knowledge bases
//! and fires those rules against caller-supplied facts until nothing changes.
//!
//! ## Features
//!
//! - **DSL Parser**: `rule Name "desc" salience N { when <cond> then <actions> }`
//! - **Facts**: native structs through serde, or open JSON documents
//! - **Agenda**: matching rules ordered by salience, then declaration order
//! - **Rule Engine**: bounded fire-and-re-resolve loop with `Retract`/`Complete`
//! - **Knowledge Library**: shared, thread-safe registry of compiled rule sets
//!
//! ## Example
//!
//! ```rust
//! use rulechain_rules::{compile, execute, FactContext, Termination};
//!
//! let kb = compile(
//!     "pricing",
//!     "0.0.1",
//!     r#"
//!     rule Discount "big orders" salience 10 {
//!         when Order.amount > 10 && Order.discount == 0
//!         then Order.discount = Order.amount / 10;
//!     }
//!     "#,
//! )
//! .unwrap();
//!
//! let mut facts = FactContext::new();
//! facts.bind_json("Order", r#"{"amount": 100, "discount": 0}"#).unwrap();
//!
//! let outcome = execute(&kb, &mut facts, 5).unwrap();
//! assert_eq!(outcome.cycles_run, 1);
//! assert_eq!(outcome.termination, Termination::Fixpoint);
//! assert_eq!(facts.to_json()["Order"]["discount"], 10);
//! ```

pub mod agenda;
pub mod ast;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod eval;
pub mod facts;
pub mod functions;
pub mod knowledge;
pub mod lexer;
pub mod value;

pub use agenda::{resolve, RuleMatch};
pub use ast::{AssignOp, BinaryOp, Expr, Literal, Rule, Statement, UnaryOp};
pub use config::{ConditionErrorPolicy, EngineConfig};
pub use dsl::RuleDslParser;
pub use engine::{execute, ExecutionOutcome, RuleEngine, Termination};
pub use error::{EvalError, Result, RuleError};
pub use eval::{evaluate, EvalFailure};
pub use facts::FactContext;
pub use knowledge::{compile, KnowledgeBase, KnowledgeLibrary};
pub use value::{Record, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
