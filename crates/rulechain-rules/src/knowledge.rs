//! Compiled, versioned rule sets and the registry that holds them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::ast::Rule;
use crate::dsl::RuleDslParser;
use crate::error::{Result, RuleError};

/// An immutable set of rules identified by name and version.
///
/// Nothing in the engine writes to a knowledge base after it is built, so one
/// instance can be shared (`Arc<KnowledgeBase>`) by any number of concurrent
/// evaluations.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBase {
    name: String,
    version: String,
    rules: Vec<Rule>,
    compiled_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn compiled_at(&self) -> DateTime<Utc> {
        self.compiled_at
    }
}

/// Compile rule source into a knowledge base. All-or-nothing: any parse
/// error or duplicate rule name fails the whole build.
pub fn compile(name: &str, version: &str, source: &str) -> Result<KnowledgeBase> {
    let rules = RuleDslParser::parse(source).inspect_err(|e| {
        tracing::debug!(knowledge_base = name, version, error = %e, "Rule compilation failed");
    })?;

    tracing::info!(
        knowledge_base = name,
        version,
        rules = rules.len(),
        "Knowledge base compiled"
    );

    Ok(KnowledgeBase {
        name: name.to_string(),
        version: version.to_string(),
        rules,
        compiled_at: Utc::now(),
    })
}

type LibraryKey = (String, String);

/// Registry of compiled knowledge bases keyed by (name, version).
///
/// Owned by the caller; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct KnowledgeLibrary {
    bases: RwLock<HashMap<LibraryKey, Arc<KnowledgeBase>>>,
}

impl KnowledgeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source` and register it, replacing any previous build of the
    /// same name and version.
    pub fn build(&self, name: &str, version: &str, source: &str) -> Result<Arc<KnowledgeBase>> {
        let kb = compile(name, version, source)?;
        Ok(self.insert(kb))
    }

    /// Register an already compiled knowledge base.
    pub fn insert(&self, kb: KnowledgeBase) -> Arc<KnowledgeBase> {
        let kb = Arc::new(kb);
        let key = (kb.name.clone(), kb.version.clone());
        let previous = self.bases.write().insert(key, Arc::clone(&kb));
        if previous.is_some() {
            tracing::debug!(
                knowledge_base = kb.name(),
                version = kb.version(),
                "Replaced knowledge base"
            );
        }
        kb
    }

    pub fn get(&self, name: &str, version: &str) -> Option<Arc<KnowledgeBase>> {
        self.bases
            .read()
            .get(&(name.to_string(), version.to_string()))
            .cloned()
    }

    /// Like [`get`](Self::get), but a missing entry is an error.
    pub fn require(&self, name: &str, version: &str) -> Result<Arc<KnowledgeBase>> {
        self.get(name, version)
            .ok_or_else(|| RuleError::UnknownKnowledgeBase {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn remove(&self, name: &str, version: &str) -> Option<Arc<KnowledgeBase>> {
        self.bases
            .write()
            .remove(&(name.to_string(), version.to_string()))
    }

    /// Registered (name, version) pairs, sorted.
    pub fn keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<LibraryKey> = self.bases.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.bases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.read().is_empty()
    }

    pub fn clear(&self) {
        self.bases.write().clear();
    }
}
