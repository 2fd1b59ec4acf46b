//! Authentication and authorization middleware.
//!
//! Wraps an [`AuthProvider`] (typically a composite) and optionally an
//! [`AccessControl`] engine. Unauthenticated requests short-circuit with
//! 401; ACL denials with 403. On success the identity and claims are
//! placed into the request context for downstream middleware and plugins.

use crate::middleware::Middleware;
use crate::models::http::{GatewayRequest, GatewayResponse};
use crate::security::acl::AccessControl;
use crate::security::auth::{AuthProvider, AuthStatus};
use crate::utils::path::extract_client_ip;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct AuthMiddleware {
    provider: Arc<dyn AuthProvider>,
    acl: Option<Arc<AccessControl>>,
    /// Path prefixes that bypass authentication entirely.
    skip_paths: Vec<String>,
}

impl AuthMiddleware {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider,
            acl: None,
            skip_paths: Vec::new(),
        }
    }

    /// Enables ACL enforcement after authentication. The resource is the
    /// request path with the leading slash stripped, the action is the
    /// lowercased method.
    pub fn with_acl(mut self, acl: Arc<AccessControl>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_skip_paths(mut self, paths: Vec<String>) -> Self {
        self.skip_paths = paths;
        self
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        if self.skip_paths.iter().any(|p| request.path.starts_with(p)) {
            return None;
        }

        let result = self.provider.authenticate(request);

        if !result.is_authenticated() {
            let message = match result.status {
                AuthStatus::Expired => "Token has expired".to_string(),
                AuthStatus::Missing => "Authentication required".to_string(),
                _ => result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Authentication failed".to_string()),
            };
            warn!(
                "Authentication failed ({:?}) for {} {}",
                result.status, request.method, request.path
            );
            return Some(GatewayResponse::json(&json!({ "error": message }), 401));
        }

        let identity = result.identity.clone().unwrap_or_default();
        debug!("Authenticated '{}' via {}", identity, self.provider.name());
        request.set_context("identity", json!(identity.clone()));
        request.set_context("claims", Value::Object(result.claims.clone()));

        if let Some(acl) = &self.acl {
            let resource = request.path.trim_start_matches('/').to_string();
            let action = request.method.to_lowercase();

            let mut context = HashMap::new();
            context.insert("client_ip".to_string(), json!(extract_client_ip(request)));
            for (key, value) in result.claims.iter() {
                context.insert(key.clone(), value.clone());
            }

            if !acl.is_allowed(&identity, &resource, &action, Some(&context)) {
                warn!(
                    "ACL denied '{}' {} on '{}'",
                    identity, action, resource
                );
                return Some(GatewayResponse::json(
                    &json!({ "error": "Access denied" }),
                    403,
                ));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::acl::{Effect, Permission, Policy, Role};
    use crate::security::auth::ApiKeyAuth;

    fn middleware_with_acl() -> AuthMiddleware {
        let provider = ApiKeyAuth::new();
        provider.add_key("k", "alice");

        let acl = AccessControl::new();
        acl.add_role(Role::new("reader").with_permission(Permission::allow("api/*", "get")));
        acl.assign_role("alice", "reader");

        AuthMiddleware::new(Arc::new(provider)).with_acl(Arc::new(acl))
    }

    fn keyed_request(method: &str, path: &str) -> GatewayRequest {
        let mut req = GatewayRequest::new(method, path);
        req.set_header("X-API-Key", "k");
        req
    }

    #[test]
    fn unauthenticated_is_401() {
        let mw = middleware_with_acl();
        let mut req = GatewayRequest::new("GET", "/api/x");
        let response = mw.pre_request(&mut req).unwrap();
        assert_eq!(response.status, 401);
    }

    #[test]
    fn authenticated_and_authorized_passes() {
        let mw = middleware_with_acl();
        let mut req = keyed_request("GET", "/api/x");
        assert!(mw.pre_request(&mut req).is_none());
        assert_eq!(req.context("identity").unwrap(), "alice");
    }

    #[test]
    fn acl_denial_is_403() {
        let mw = middleware_with_acl();
        let mut req = keyed_request("DELETE", "/api/x");
        let response = mw.pre_request(&mut req).unwrap();
        assert_eq!(response.status, 403);
    }

    #[test]
    fn deny_policy_overrides_role() {
        let provider = ApiKeyAuth::new();
        provider.add_key("k", "alice");

        let acl = AccessControl::new();
        acl.create_admin_role();
        acl.assign_role("alice", "admin");
        acl.add_policy(
            Policy::new("lockdown", Effect::Deny)
                .principals(["*"])
                .resources(["api/secret*"])
                .actions(["*"]),
        );

        let mw = AuthMiddleware::new(Arc::new(provider)).with_acl(Arc::new(acl));

        let mut req = keyed_request("GET", "/api/ok");
        assert!(mw.pre_request(&mut req).is_none());

        let mut req = keyed_request("GET", "/api/secret/x");
        assert_eq!(mw.pre_request(&mut req).unwrap().status, 403);
    }

    #[test]
    fn skip_paths_bypass_auth() {
        let mw = middleware_with_acl().with_skip_paths(vec!["/public".to_string()]);
        let mut req = GatewayRequest::new("GET", "/public/x");
        assert!(mw.pre_request(&mut req).is_none());
    }
}
