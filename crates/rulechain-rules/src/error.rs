//! Error types for the rules crate.

/// Errors raised while compiling rules, binding facts, or running rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Malformed rule text.
    #[error("Parse error at line {line}, column {column}: {message}")]
    Compile {
        line: usize,
        column: usize,
        message: String,
    },

    /// Two rules with the same name in one build.
    #[error("Duplicate rule '{name}' at line {line}, column {column}")]
    DuplicateRule {
        name: String,
        line: usize,
        column: usize,
    },

    /// A fact name was bound twice on the same context.
    #[error("Fact '{0}' is already bound")]
    DuplicateFact(String),

    /// Raw JSON handed to `bind_json` did not parse.
    #[error("Invalid JSON for fact '{name}': {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A rule condition or action failed at runtime.
    #[error("Evaluation error in rule '{rule}' at `{expression}`: {source}")]
    Evaluation {
        rule: String,
        expression: String,
        #[source]
        source: EvalError,
    },

    /// No knowledge base registered under this key.
    #[error("Knowledge base '{name}' version '{version}' not found")]
    UnknownKnowledgeBase { name: String, version: String },

    /// Converting a fact to or from a native type failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RuleError {
    pub(crate) fn compile(line: usize, column: usize, message: impl Into<String>) -> Self {
        RuleError::Compile {
            line,
            column,
            message: message.into(),
        }
    }

    /// Name of the rule the error originated in, if any.
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            RuleError::Evaluation { rule, .. } => Some(rule),
            RuleError::DuplicateRule { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Failures of a single expression or statement evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("fact '{0}' is not bound")]
    UnboundFact(String),

    #[error("field '{0}' is not present")]
    MissingField(String),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("type mismatch: cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("condition evaluated to {0}, expected bool")]
    NonBooleanCondition(&'static str),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown method '{method}' on {receiver}")]
    UnknownMethod {
        method: String,
        receiver: &'static str,
    },

    #[error("'{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("cannot assign to {0}")]
    NotAssignable(String),

    #[error("unknown rule '{0}'")]
    UnknownRule(String),
}

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;
