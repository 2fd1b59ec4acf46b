//! Route pattern compilation and matching.
//!
//! Patterns are `/`-separated sequences of segments, each one of:
//!
//! - a literal (`users`)
//! - `:name` - required single-segment capture
//! - `:name?` - optional single-segment capture (zero or one segment)
//! - `*` - at the tail, prefix match on everything after the preceding `/`;
//!   elsewhere, exactly one segment
//! - `**` - zero or more segments
//!
//! Compilation is segmentwise: only a segment whose first byte is `:` marks
//! a capture, so literals containing `:` in other positions are matched
//! byte-equal. Paths are canonicalized before matching (collapse `//`,
//! leading `/`, no trailing `/` except root).
//!
//! Optional captures compile at any position, but only a trailing `:name?`
//! is unambiguous; patterns with interior optional segments are accepted
//! and match greedily.

use crate::utils::path::normalize_path;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors raised while compiling or matching route patterns.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    /// The pattern contains malformed syntax (bad parameter name, empty
    /// capture, unsupported construct).
    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The same parameter name appears more than once in one pattern.
    #[error("Duplicate parameter ':{name}' in pattern '{pattern}'")]
    DuplicateParam { pattern: String, name: String },

    /// The generated regex failed to compile; indicates a conversion bug.
    #[error("Regex compilation failed: {0}")]
    Regex(String),
}

/// A pattern compiled to a regex with named capture groups.
///
/// The regex is wrapped in an `Arc` so cloned routes share the compiled
/// machine across worker threads.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: String,
    regex: Arc<Regex>,
    param_names: Vec<String>,
    literal_prefix: String,
}

impl CompiledPattern {
    /// Compiles a pattern string, validating parameter names and rejecting
    /// duplicates.
    pub fn compile(pattern: &str) -> Result<Self, MatchError> {
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        let mut regex_str = String::with_capacity(pattern.len() * 2 + 2);
        regex_str.push('^');

        let mut param_names: Vec<String> = Vec::new();
        let mut literal_prefix = String::new();
        let mut prefix_open = true;
        let mut saw_dynamic = false;

        if segments.is_empty() {
            // Root pattern.
            regex_str.push('/');
        }

        for (i, segment) in segments.iter().enumerate() {
            let is_tail = i == segments.len() - 1;

            if let Some(raw_name) = segment.strip_prefix(':') {
                let (name, optional) = match raw_name.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (raw_name, false),
                };

                if name.is_empty() {
                    return Err(MatchError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "empty parameter name".to_string(),
                    });
                }
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(MatchError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: format!("invalid parameter name ':{}'", name),
                    });
                }
                if param_names.iter().any(|p| p == name) {
                    return Err(MatchError::DuplicateParam {
                        pattern: pattern.to_string(),
                        name: name.to_string(),
                    });
                }

                if optional {
                    regex_str.push_str(&format!("(?:/(?P<{}>[^/]+))?", name));
                } else {
                    regex_str.push_str(&format!("/(?P<{}>[^/]+)", name));
                }
                param_names.push(name.to_string());
                prefix_open = false;
                saw_dynamic = true;
            } else if *segment == "*" {
                if is_tail {
                    // `/api/*` behaves as a prefix match on `/api/`.
                    regex_str.push_str("/.*");
                } else {
                    regex_str.push_str("/[^/]+");
                }
                prefix_open = false;
                saw_dynamic = true;
            } else if *segment == "**" {
                regex_str.push_str("(?:/.*)?");
                prefix_open = false;
                saw_dynamic = true;
            } else {
                regex_str.push('/');
                regex_str.push_str(&regex::escape(segment));
                if prefix_open {
                    literal_prefix.push('/');
                    literal_prefix.push_str(segment);
                }
            }
        }

        regex_str.push('$');

        let regex = Regex::new(&regex_str).map_err(|e| MatchError::Regex(e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex: Arc::new(regex),
            param_names,
            // Stripping only applies to patterns with a dynamic tail; a
            // fully literal pattern forwards its path unchanged.
            literal_prefix: if saw_dynamic { literal_prefix } else { String::new() },
        })
    }

    /// The original pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Names of captures in pattern order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Literal segments preceding the first dynamic segment, as a path
    /// prefix. Empty for fully literal patterns.
    ///
    /// The forwarder strips this prefix so `/api/:id` sends `/42` upstream
    /// for an inbound `/api/42`.
    pub fn literal_prefix(&self) -> &str {
        &self.literal_prefix
    }

    /// The upstream path for a matched request path: the literal prefix is
    /// removed, falling back to `/` when nothing remains.
    pub fn upstream_path(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        if self.literal_prefix.is_empty() {
            return normalized;
        }
        match normalized.strip_prefix(self.literal_prefix.as_str()) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => normalized,
        }
    }

    /// True if the canonicalized path matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(&normalize_path(path))
    }

    /// Extracts captured parameters, or `None` when the path does not match.
    ///
    /// Optional parameters that matched nothing are absent from the map.
    pub fn extract(&self, path: &str) -> Option<HashMap<String, String>> {
        let normalized = normalize_path(path);
        let captures = self.regex.captures(&normalized)?;

        let mut params = HashMap::with_capacity(self.param_names.len());
        for name in &self.param_names {
            if let Some(value) = captures.name(name) {
                params.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(params)
    }
}

/// Caching facade over [`CompiledPattern`] for call sites that match ad-hoc
/// pattern strings (ACL resources, skip lists) rather than registered routes.
#[derive(Debug, Default)]
pub struct PathMatcher {
    cache: RwLock<AHashMap<String, CompiledPattern>>,
}

impl PathMatcher {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(AHashMap::new()),
        }
    }

    /// Checks whether `path` matches `pattern`, compiling and caching on
    /// first use.
    pub fn matches(&self, pattern: &str, path: &str) -> Result<bool, MatchError> {
        self.with_compiled(pattern, |compiled| compiled.matches(path))
    }

    /// Extracts parameters from `path` against `pattern`.
    pub fn extract(
        &self,
        pattern: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, String>>, MatchError> {
        self.with_compiled(pattern, |compiled| compiled.extract(path))
    }

    fn with_compiled<T>(
        &self,
        pattern: &str,
        f: impl FnOnce(&CompiledPattern) -> T,
    ) -> Result<T, MatchError> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(compiled) = cache.get(pattern) {
                return Ok(f(compiled));
            }
        }

        let compiled = CompiledPattern::compile(pattern)?;
        let result = f(&compiled);
        self.cache
            .write()
            .unwrap()
            .insert(pattern.to_string(), compiled);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let p = CompiledPattern::compile("/users").unwrap();
        assert!(p.matches("/users"));
        assert!(p.matches("/users/"));
        assert!(!p.matches("/users/42"));
        assert!(!p.matches("/user"));
    }

    #[test]
    fn root_pattern() {
        let p = CompiledPattern::compile("/").unwrap();
        assert!(p.matches("/"));
        assert!(!p.matches("/x"));
    }

    #[test]
    fn required_param_capture() {
        let p = CompiledPattern::compile("/users/:id").unwrap();
        let params = p.extract("/users/42").unwrap();
        assert_eq!(params["id"], "42");
        assert!(p.extract("/users").is_none());
        assert!(p.extract("/users/42/posts").is_none());
    }

    #[test]
    fn multiple_params() {
        let p = CompiledPattern::compile("/users/:user_id/posts/:post_id").unwrap();
        let params = p.extract("/users/7/posts/99").unwrap();
        assert_eq!(params["user_id"], "7");
        assert_eq!(params["post_id"], "99");
    }

    #[test]
    fn optional_param_matches_both_forms() {
        let p = CompiledPattern::compile("/users/:id?").unwrap();

        let with = p.extract("/users/42").unwrap();
        assert_eq!(with["id"], "42");

        let without = p.extract("/users").unwrap();
        assert!(!without.contains_key("id"));
    }

    #[test]
    fn tail_wildcard_is_prefix_match() {
        let p = CompiledPattern::compile("/api/*").unwrap();
        assert!(p.matches("/api/users"));
        assert!(p.matches("/api/users/42/posts"));
        assert!(p.matches("/api/"));
        assert!(!p.matches("/api"));
        assert!(!p.matches("/other"));
    }

    #[test]
    fn double_wildcard_matches_zero_or_more_segments() {
        let p = CompiledPattern::compile("/static/**").unwrap();
        assert!(p.matches("/static"));
        assert!(p.matches("/static/css"));
        assert!(p.matches("/static/css/site.css"));
        assert!(!p.matches("/media/css"));
    }

    #[test]
    fn interior_wildcard_is_single_segment() {
        let p = CompiledPattern::compile("/files/*/meta").unwrap();
        assert!(p.matches("/files/abc/meta"));
        assert!(!p.matches("/files/a/b/meta"));
    }

    #[test]
    fn literal_with_colon_in_the_middle() {
        // Only a leading ':' marks a capture; embedded colons are literal.
        let p = CompiledPattern::compile("/rpc/v1:batch").unwrap();
        assert!(p.matches("/rpc/v1:batch"));
        assert!(!p.matches("/rpc/v1"));
        assert!(p.param_names().is_empty());
    }

    #[test]
    fn duplicate_param_rejected() {
        let err = CompiledPattern::compile("/a/:id/b/:id").unwrap_err();
        assert!(matches!(err, MatchError::DuplicateParam { .. }));
    }

    #[test]
    fn invalid_param_name_rejected() {
        let err = CompiledPattern::compile("/a/:bad-name").unwrap_err();
        assert!(matches!(err, MatchError::InvalidPattern { .. }));
    }

    #[test]
    fn matching_canonicalizes_path() {
        let p = CompiledPattern::compile("/users/:id").unwrap();
        assert_eq!(p.extract("//users//42/").unwrap()["id"], "42");
    }

    #[test]
    fn upstream_path_strips_literal_prefix() {
        let p = CompiledPattern::compile("/api/:id").unwrap();
        assert_eq!(p.literal_prefix(), "/api");
        assert_eq!(p.upstream_path("/api/42"), "/42");
        assert_eq!(p.upstream_path("/api"), "/");

        let wild = CompiledPattern::compile("/files/*").unwrap();
        assert_eq!(wild.upstream_path("/files/a/b"), "/a/b");

        // Fully literal patterns forward the path unchanged.
        let literal = CompiledPattern::compile("/status").unwrap();
        assert_eq!(literal.literal_prefix(), "");
        assert_eq!(literal.upstream_path("/status"), "/status");
    }

    #[test]
    fn path_matcher_caches_patterns() {
        let matcher = PathMatcher::new();
        assert!(matcher.matches("/users/:id", "/users/1").unwrap());
        assert!(matcher.matches("/users/:id", "/users/2").unwrap());
        assert_eq!(matcher.cache.read().unwrap().len(), 1);
    }
}
