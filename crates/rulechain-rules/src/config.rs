//! Engine configuration defaults and environment overrides.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default values.
pub mod defaults {
    /// Cycles the engine fires before giving up.
    pub const MAX_CYCLES: usize = 5;
    /// Version assigned to knowledge bases when the caller has none.
    pub const KNOWLEDGE_BASE_VERSION: &str = "0.0.1";
}

/// Environment variable names.
pub mod env_vars {
    pub const MAX_CYCLES: &str = "RULECHAIN_MAX_CYCLES";
    pub const CONDITION_ERRORS: &str = "RULECHAIN_CONDITION_ERRORS";
    pub const LOG_JSON: &str = "RULECHAIN_LOG_JSON";
}

/// What to do when a rule condition fails to evaluate during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionErrorPolicy {
    /// Stop resolution and return the error.
    #[default]
    Abort,
    /// Log the error and leave the rule off the agenda.
    Skip,
}

impl FromStr for ConditionErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown condition error policy '{}'", other)),
        }
    }
}

/// Execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on fired rules per execution.
    pub max_cycles: usize,
    pub condition_errors: ConditionErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycles: defaults::MAX_CYCLES,
            condition_errors: ConditionErrorPolicy::Abort,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `RULECHAIN_MAX_CYCLES` and
    /// `RULECHAIN_CONDITION_ERRORS`. Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(env_vars::MAX_CYCLES) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.max_cycles = n,
                Err(e) => tracing::warn!(
                    var = env_vars::MAX_CYCLES,
                    value = %raw,
                    error = %e,
                    "Ignoring invalid max cycles"
                ),
            }
        }

        if let Some(raw) = lookup(env_vars::CONDITION_ERRORS) {
            match raw.parse::<ConditionErrorPolicy>() {
                Ok(policy) => config.condition_errors = policy,
                Err(e) => tracing::warn!(var = env_vars::CONDITION_ERRORS, "{}", e),
            }
        }

        config
    }

    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn with_condition_errors(mut self, policy: ConditionErrorPolicy) -> Self {
        self.condition_errors = policy;
        self
    }
}
