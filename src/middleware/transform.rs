//! Header transform middleware.
//!
//! Declarative add/remove/rename/replace rules applied to request headers
//! before forwarding and to response headers before the reply is written.

use crate::middleware::Middleware;
use crate::models::http::{GatewayRequest, GatewayResponse, Headers};

/// One transformation rule.
#[derive(Debug, Clone)]
pub enum TransformRule {
    Add { name: String, value: String },
    Remove { name: String },
    Rename { from: String, to: String },
    /// Sets the value only when the header is already present.
    Replace { name: String, value: String },
}

impl TransformRule {
    fn apply(&self, headers: &mut Headers) {
        match self {
            TransformRule::Add { name, value } => headers.set(name.clone(), value.clone()),
            TransformRule::Remove { name } => {
                headers.remove(name);
            }
            TransformRule::Rename { from, to } => headers.rename(from, to),
            TransformRule::Replace { name, value } => {
                if headers.contains(name) {
                    headers.set(name.clone(), value.clone());
                }
            }
        }
    }
}

#[derive(Default)]
pub struct TransformMiddleware {
    request_rules: Vec<TransformRule>,
    response_rules: Vec<TransformRule>,
}

impl TransformMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_rule(mut self, rule: TransformRule) -> Self {
        self.request_rules.push(rule);
        self
    }

    pub fn response_rule(mut self, rule: TransformRule) -> Self {
        self.response_rules.push(rule);
        self
    }

    /// Shorthand for adding a static request header.
    pub fn add_request_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_rule(TransformRule::Add {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Shorthand for adding a static response header.
    pub fn add_response_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_rule(TransformRule::Add {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Shorthand for stripping a response header (e.g. `Server`).
    pub fn remove_response_header(self, name: impl Into<String>) -> Self {
        self.response_rule(TransformRule::Remove { name: name.into() })
    }
}

impl Middleware for TransformMiddleware {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        for rule in &self.request_rules {
            rule.apply(&mut request.headers);
        }
        None
    }

    fn post_request(&self, _request: &GatewayRequest, response: &mut GatewayResponse) {
        for rule in &self.response_rules {
            rule.apply(&mut response.headers);
        }
    }
}
