//! Access control: roles, policies and the deny-override decision engine.
//!
//! Resources are matched with shell-style globs (`*`, `?`). The decision
//! for `(user, resource, action, context)` scans policies first - any
//! matching Deny short-circuits to false - then grants on a matching Allow
//! policy or a transitive role permission, defaulting to deny.

use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Policy/permission effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// Cached shell-style glob matching (`*` any run, `?` one char).
fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    static CACHE: Lazy<RwLock<AHashMap<String, Regex>>> =
        Lazy::new(|| RwLock::new(AHashMap::new()));

    {
        let cache = CACHE.read().unwrap();
        if let Some(regex) = cache.get(pattern) {
            return regex.is_match(value);
        }
    }

    let mut regex_str = String::with_capacity(pattern.len() * 2 + 2);
    regex_str.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            _ => regex_str.push_str(&regex::escape(&ch.to_string())),
        }
    }
    regex_str.push('$');

    match Regex::new(&regex_str) {
        Ok(regex) => {
            let matched = regex.is_match(value);
            CACHE.write().unwrap().insert(pattern.to_string(), regex);
            matched
        }
        Err(_) => false,
    }
}

/// A single permission grant or denial on a resource pattern.
#[derive(Debug, Clone)]
pub struct Permission {
    pub resource: String,
    pub action: String,
    pub effect: Effect,
}

impl Permission {
    pub fn allow(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            effect: Effect::Allow,
        }
    }

    pub fn deny(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            effect: Effect::Deny,
        }
    }

    /// Whether this permission covers `(resource, action)`.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        if !glob_match(&self.resource, resource) {
            return false;
        }
        self.action == "*" || self.action == action
    }
}

/// A role: direct permissions plus inherited parent roles.
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<Permission>,
    pub parent_roles: Vec<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
            parent_roles: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_roles.push(parent.into());
        self
    }
}

/// Condition operators over the request context.
#[derive(Debug, Clone)]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    /// Substring match on the stringified context value.
    Contains(String),
}

impl Condition {
    fn evaluate(&self, actual: Option<&Value>) -> bool {
        match self {
            Condition::Equals(expected) => actual == Some(expected),
            Condition::NotEquals(expected) => actual != Some(expected),
            Condition::In(allowed) => actual.map(|a| allowed.contains(a)).unwrap_or(false),
            Condition::NotIn(denied) => actual.map(|a| !denied.contains(a)).unwrap_or(true),
            Condition::Contains(needle) => {
                let haystack = match actual {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => return false,
                };
                haystack.contains(needle)
            }
        }
    }
}

/// A policy binding principals, resources and actions to an effect, with
/// optional contextual conditions.
#[derive(Debug, Clone)]
pub struct Policy {
    pub name: String,
    pub effect: Effect,
    pub principals: HashSet<String>,
    pub resources: HashSet<String>,
    pub actions: HashSet<String>,
    pub conditions: HashMap<String, Condition>,
}

impl Policy {
    pub fn new(name: impl Into<String>, effect: Effect) -> Self {
        Self {
            name: name.into(),
            effect,
            principals: HashSet::new(),
            resources: HashSet::new(),
            actions: HashSet::new(),
            conditions: HashMap::new(),
        }
    }

    pub fn principals<I, S>(mut self, principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.principals = principals.into_iter().map(Into::into).collect();
        self
    }

    pub fn resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn condition(mut self, key: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(key.into(), condition);
        self
    }

    /// Returns the policy effect when the request matches, `None`
    /// otherwise.
    pub fn matches(
        &self,
        principal: &str,
        resource: &str,
        action: &str,
        context: Option<&HashMap<String, Value>>,
    ) -> Option<Effect> {
        let principal_match = self
            .principals
            .iter()
            .any(|p| p == "*" || glob_match(p, principal));
        if !principal_match {
            return None;
        }

        let resource_match = self
            .resources
            .iter()
            .any(|r| r == "*" || glob_match(r, resource));
        if !resource_match {
            return None;
        }

        if !self.actions.contains("*") && !self.actions.contains(action) {
            return None;
        }

        if !self.conditions.is_empty() {
            let context = context?;
            for (key, condition) in &self.conditions {
                if !condition.evaluate(context.get(key)) {
                    return None;
                }
            }
        }

        Some(self.effect)
    }
}

/// The access control engine.
///
/// # Examples
///
/// ```
/// use tollgate_rs::security::acl::{AccessControl, Permission, Role};
///
/// let acl = AccessControl::new();
/// acl.add_role(Role::new("reader").with_permission(Permission::allow("docs/*", "read")));
/// acl.assign_role("alice", "reader");
///
/// assert!(acl.is_allowed("alice", "docs/guide", "read", None));
/// assert!(!acl.is_allowed("alice", "docs/guide", "delete", None));
/// ```
#[derive(Default)]
pub struct AccessControl {
    roles: RwLock<HashMap<String, Role>>,
    policies: RwLock<Vec<Policy>>,
    user_roles: RwLock<HashMap<String, HashSet<String>>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&self, role: Role) -> &Self {
        self.roles.write().unwrap().insert(role.name.clone(), role);
        self
    }

    pub fn remove_role(&self, name: &str) -> bool {
        self.roles.write().unwrap().remove(name).is_some()
    }

    pub fn add_policy(&self, policy: Policy) -> &Self {
        self.policies.write().unwrap().push(policy);
        self
    }

    pub fn assign_role(&self, user: impl Into<String>, role: impl Into<String>) -> &Self {
        self.user_roles
            .write()
            .unwrap()
            .entry(user.into())
            .or_default()
            .insert(role.into());
        self
    }

    pub fn revoke_role(&self, user: &str, role: &str) -> bool {
        self.user_roles
            .write()
            .unwrap()
            .get_mut(user)
            .map(|roles| roles.remove(role))
            .unwrap_or(false)
    }

    pub fn user_roles(&self, user: &str) -> HashSet<String> {
        self.user_roles
            .read()
            .unwrap()
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// Deny-override decision: any matching Deny policy wins; otherwise a
    /// matching Allow policy or a transitive role permission grants.
    pub fn is_allowed(
        &self,
        user: &str,
        resource: &str,
        action: &str,
        context: Option<&HashMap<String, Value>>,
    ) -> bool {
        let mut allow_found = false;

        {
            let policies = self.policies.read().unwrap();
            for policy in policies.iter() {
                match policy.matches(user, resource, action, context) {
                    Some(Effect::Deny) => return false,
                    Some(Effect::Allow) => allow_found = true,
                    None => {}
                }
            }
        }

        if !allow_found {
            let roles = self.roles.read().unwrap();
            let user_roles = self.user_roles.read().unwrap();
            if let Some(assigned) = user_roles.get(user) {
                let mut visited = HashSet::new();
                for role_name in assigned {
                    if Self::role_grants(&roles, role_name, resource, action, &mut visited) {
                        allow_found = true;
                        break;
                    }
                }
            }
        }

        allow_found
    }

    /// Transitive permission check through role inheritance. The visited
    /// set guards against inheritance cycles.
    fn role_grants(
        roles: &HashMap<String, Role>,
        role_name: &str,
        resource: &str,
        action: &str,
        visited: &mut HashSet<String>,
    ) -> bool {
        if !visited.insert(role_name.to_string()) {
            return false;
        }

        let Some(role) = roles.get(role_name) else {
            return false;
        };

        for permission in &role.permissions {
            if permission.matches(resource, action) {
                return permission.effect == Effect::Allow;
            }
        }

        role.parent_roles
            .iter()
            .any(|parent| Self::role_grants(roles, parent, resource, action, visited))
    }

    /// Canned admin role: everything allowed.
    pub fn create_admin_role(&self) -> &Self {
        self.add_role(Role::new("admin").with_permission(Permission::allow("*", "*")))
    }

    /// Canned read-only role.
    pub fn create_readonly_role(&self, name: &str) -> &Self {
        self.add_role(
            Role::new(name)
                .with_permission(Permission::allow("*", "read"))
                .with_permission(Permission::allow("*", "list")),
        )
    }
}

/// Policy allowing everything for everyone.
pub fn allow_all_policy() -> Policy {
    Policy::new("allow_all", Effect::Allow)
        .principals(["*"])
        .resources(["*"])
        .actions(["*"])
}

/// Policy denying everything for everyone.
pub fn deny_all_policy() -> Policy {
    Policy::new("deny_all", Effect::Deny)
        .principals(["*"])
        .resources(["*"])
        .actions(["*"])
}

/// Policy admitting only the given client IPs (checked against the
/// `client_ip` context key).
pub fn ip_whitelist_policy(name: impl Into<String>, allowed_ips: &[&str]) -> Policy {
    Policy::new(name, Effect::Allow)
        .principals(["*"])
        .resources(["*"])
        .actions(["*"])
        .condition(
            "client_ip",
            Condition::In(allowed_ips.iter().map(|ip| Value::from(*ip)).collect()),
        )
}
