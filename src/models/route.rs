//! Route definitions.

use crate::routing::matcher::{CompiledPattern, MatchError};
use serde_json::Value;
use std::collections::HashMap;

/// A registered route: a compiled pattern plus the method set, backend
/// targets and priority used by the router.
///
/// Routes are immutable after registration; administrative changes replace
/// the route through the router's writer lock.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    pub methods: Vec<String>,
    /// Opaque backend identifiers (`host:port` addresses in the pool).
    pub targets: Vec<String>,
    pub name: String,
    pub priority: i32,
    pub metadata: HashMap<String, Value>,
    compiled: CompiledPattern,
}

impl Route {
    /// Compiles `pattern` and creates a route allowing any method.
    pub fn new(pattern: impl Into<String>) -> Result<Self, MatchError> {
        let pattern = pattern.into();
        let compiled = CompiledPattern::compile(&pattern)?;
        Ok(Self {
            pattern,
            methods: vec!["*".to_string()],
            targets: Vec::new(),
            name: String::new(),
            priority: 0,
            metadata: HashMap::new(),
            compiled,
        })
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods
            .into_iter()
            .map(|m| m.into().to_uppercase())
            .collect();
        if self.methods.is_empty() {
            self.methods.push("*".to_string());
        }
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// True when the route's method set admits `method` (`*` admits all).
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == "*") || self.methods.iter().any(|m| m == method)
    }

    /// Matches `path` and `method`, returning captured parameters.
    pub fn matches(&self, path: &str, method: &str) -> Option<HashMap<String, String>> {
        if !self.allows_method(method) {
            return None;
        }
        self.compiled.extract(path)
    }

    /// Matches the path alone, ignoring the method set.
    pub fn matches_path(&self, path: &str) -> bool {
        self.compiled.matches(path)
    }

    /// The path forwarded upstream for a matched request: the pattern's
    /// literal prefix is stripped (`/api/:id` + `/api/42` → `/42`); fully
    /// literal patterns forward the path unchanged.
    pub fn upstream_path(&self, path: &str) -> String {
        self.compiled.upstream_path(path)
    }
}
