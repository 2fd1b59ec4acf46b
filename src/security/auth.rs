//! Authentication provider contract and the built-in providers.
//!
//! A provider inspects a request for its credential shape and yields an
//! [`AuthResult`]. Providers compose through [`CompositeAuth`]: a missing
//! credential moves on to the next provider, while an explicit failure
//! (bad password, expired token) short-circuits.

use crate::models::http::GatewayRequest;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Authentication outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    /// Credentials were presented and rejected.
    Failed,
    /// Credentials were valid once but have expired.
    Expired,
    /// Credentials are malformed or fail validation.
    Invalid,
    /// No credentials of this provider's shape were presented.
    Missing,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub status: AuthStatus,
    pub identity: Option<String>,
    pub claims: Map<String, Value>,
    /// Unix seconds.
    pub expires_at: Option<u64>,
    pub error: Option<String>,
}

impl AuthResult {
    pub fn success(identity: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Success,
            identity: Some(identity.into()),
            claims: Map::new(),
            expires_at: None,
            error: None,
        }
    }

    pub fn failure(status: AuthStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            identity: None,
            claims: Map::new(),
            expires_at: None,
            error: Some(error.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Success
    }
}

/// An authentication provider.
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Authenticates the request.
    fn authenticate(&self, request: &GatewayRequest) -> AuthResult;

    /// Extracts this provider's raw credential from the request, if
    /// present.
    fn credentials(&self, request: &GatewayRequest) -> Option<String>;
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generates a urlsafe-base64 token carrying 256 bits of entropy.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PBKDF2-HMAC-SHA256, single 32-byte output block (RFC 2898).
fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(password).expect("HMAC accepts any key length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u: [u8; 32] = mac.finalize().into_bytes().into();

    let mut output = u;
    for _ in 1..iterations {
        let mut mac =
            HmacSha256::new_from_slice(password).expect("HMAC accepts any key length");
        mac.update(&u);
        u = mac.finalize().into_bytes().into();
        for (out_byte, u_byte) in output.iter_mut().zip(u.iter()) {
            *out_byte ^= u_byte;
        }
    }
    output
}

/// Constant-time byte-slice equality.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

const PBKDF2_ITERATIONS: u32 = 100_000;

/// HTTP Basic authentication.
///
/// Passwords are stored as `salt:PBKDF2-HMAC-SHA256(password, salt, 100000)`
/// in hex; verification uses constant-time equality.
pub struct BasicAuth {
    users: RwLock<HashMap<String, String>>,
}

impl BasicAuth {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a user, hashing the password for storage.
    pub fn add_user(&self, username: impl Into<String>, password: &str) -> &Self {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = hex::encode(salt_bytes);

        let hash = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS);
        let stored = format!("{}:{}", salt, hex::encode(hash));
        self.users.write().unwrap().insert(username.into(), stored);
        self
    }

    pub fn remove_user(&self, username: &str) -> bool {
        self.users.write().unwrap().remove(username).is_some()
    }

    fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt, hash_hex)) = stored.split_once(':') else {
            return false;
        };
        let Ok(expected) = hex::decode(hash_hex) else {
            return false;
        };
        let computed = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS);
        constant_time_eq(&computed, &expected)
    }
}

impl Default for BasicAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for BasicAuth {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn authenticate(&self, request: &GatewayRequest) -> AuthResult {
        let Some(encoded) = self.credentials(request) else {
            return AuthResult::failure(AuthStatus::Missing, "No credentials provided");
        };

        let decoded = match STANDARD.decode(&encoded) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(_) => {
                    return AuthResult::failure(AuthStatus::Invalid, "Invalid Basic auth format")
                }
            },
            Err(_) => return AuthResult::failure(AuthStatus::Invalid, "Invalid Basic auth format"),
        };

        let Some((username, password)) = decoded.split_once(':') else {
            return AuthResult::failure(AuthStatus::Invalid, "Invalid Basic auth format");
        };

        let stored = self.users.read().unwrap().get(username).cloned();
        match stored {
            Some(stored) if self.verify_password(password, &stored) => {
                AuthResult::success(username)
            }
            _ => AuthResult::failure(AuthStatus::Failed, "Invalid credentials"),
        }
    }

    fn credentials(&self, request: &GatewayRequest) -> Option<String> {
        request
            .header("Authorization")?
            .strip_prefix("Basic ")
            .map(|s| s.to_string())
    }
}

/// API-key authentication from a header (default `X-API-Key`) or query
/// parameter (default `api_key`).
pub struct ApiKeyAuth {
    keys: RwLock<HashMap<String, String>>,
    header_name: String,
    query_param: String,
}

impl ApiKeyAuth {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            header_name: "X-API-Key".to_string(),
            query_param: "api_key".to_string(),
        }
    }

    pub fn with_header(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    pub fn with_query_param(mut self, query_param: impl Into<String>) -> Self {
        self.query_param = query_param.into();
        self
    }

    pub fn add_key(&self, key: impl Into<String>, identity: impl Into<String>) -> &Self {
        self.keys.write().unwrap().insert(key.into(), identity.into());
        self
    }

    /// Issues a fresh 256-bit key for `identity` and registers it.
    pub fn generate_key(&self, identity: impl Into<String>) -> String {
        let key = generate_token();
        self.keys.write().unwrap().insert(key.clone(), identity.into());
        key
    }

    pub fn revoke_key(&self, key: &str) -> bool {
        self.keys.write().unwrap().remove(key).is_some()
    }
}

impl Default for ApiKeyAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for ApiKeyAuth {
    fn name(&self) -> &'static str {
        "api_key"
    }

    fn authenticate(&self, request: &GatewayRequest) -> AuthResult {
        let Some(key) = self.credentials(request) else {
            return AuthResult::failure(AuthStatus::Missing, "No API key provided");
        };

        match self.keys.read().unwrap().get(&key) {
            Some(identity) => AuthResult::success(identity.clone()),
            None => AuthResult::failure(AuthStatus::Failed, "Invalid API key"),
        }
    }

    fn credentials(&self, request: &GatewayRequest) -> Option<String> {
        if let Some(key) = request.header(&self.header_name) {
            return Some(key.to_string());
        }
        request.query_param(&self.query_param).map(|v| v.to_string())
    }
}

struct BearerToken {
    identity: String,
    claims: Map<String, Value>,
    expires_at: Option<u64>,
}

/// Opaque bearer-token authentication with optional expiry and revocation.
pub struct BearerTokenAuth {
    tokens: RwLock<HashMap<String, BearerToken>>,
}

impl BearerTokenAuth {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_token(
        &self,
        token: impl Into<String>,
        identity: impl Into<String>,
        claims: Map<String, Value>,
        expires_at: Option<u64>,
    ) -> &Self {
        self.tokens.write().unwrap().insert(
            token.into(),
            BearerToken {
                identity: identity.into(),
                claims,
                expires_at,
            },
        );
        self
    }

    /// Issues a token for `identity`, valid for `ttl_secs`.
    pub fn generate_token(&self, identity: impl Into<String>, ttl_secs: u64) -> String {
        let token = generate_token();
        self.add_token(
            token.clone(),
            identity,
            Map::new(),
            Some(unix_now() + ttl_secs),
        );
        token
    }

    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.write().unwrap().remove(token).is_some()
    }
}

impl Default for BearerTokenAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for BearerTokenAuth {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn authenticate(&self, request: &GatewayRequest) -> AuthResult {
        let Some(token) = self.credentials(request) else {
            return AuthResult::failure(AuthStatus::Missing, "No bearer token provided");
        };

        let tokens = self.tokens.read().unwrap();
        match tokens.get(&token) {
            Some(data) => {
                if let Some(expires_at) = data.expires_at {
                    if unix_now() > expires_at {
                        return AuthResult::failure(AuthStatus::Expired, "Token expired");
                    }
                }
                AuthResult {
                    status: AuthStatus::Success,
                    identity: Some(data.identity.clone()),
                    claims: data.claims.clone(),
                    expires_at: data.expires_at,
                    error: None,
                }
            }
            None => AuthResult::failure(AuthStatus::Failed, "Invalid token"),
        }
    }

    fn credentials(&self, request: &GatewayRequest) -> Option<String> {
        request
            .header("Authorization")?
            .strip_prefix("Bearer ")
            .map(|s| s.to_string())
    }
}

/// Composite provider: tries each provider in order.
///
/// Missing credentials are not fatal; the first explicit failure
/// (Failed/Expired/Invalid) short-circuits so a bad password is never
/// papered over by a later provider.
pub struct CompositeAuth {
    providers: Vec<Box<dyn AuthProvider>>,
}

impl CompositeAuth {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn add_provider(mut self, provider: Box<dyn AuthProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

impl Default for CompositeAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for CompositeAuth {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn authenticate(&self, request: &GatewayRequest) -> AuthResult {
        for provider in &self.providers {
            let result = provider.authenticate(request);
            match result.status {
                AuthStatus::Success => return result,
                AuthStatus::Missing => continue,
                // Explicit failure with a presented credential.
                _ => return result,
            }
        }
        AuthResult::failure(AuthStatus::Failed, "No provider authenticated the request")
    }

    fn credentials(&self, request: &GatewayRequest) -> Option<String> {
        self.providers
            .iter()
            .find_map(|provider| provider.credentials(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_header(name: &str, value: &str) -> GatewayRequest {
        let mut req = GatewayRequest::new("GET", "/");
        req.set_header(name, value);
        req
    }

    fn basic_header(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
    }

    #[test]
    fn basic_auth_accepts_valid_credentials() {
        let auth = BasicAuth::new();
        auth.add_user("admin", "password123");

        let req = request_with_header("Authorization", &basic_header("admin", "password123"));
        let result = auth.authenticate(&req);
        assert!(result.is_authenticated());
        assert_eq!(result.identity.as_deref(), Some("admin"));
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let auth = BasicAuth::new();
        auth.add_user("admin", "password123");

        let req = request_with_header("Authorization", &basic_header("admin", "nope"));
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Failed);
    }

    #[test]
    fn basic_auth_missing_and_malformed() {
        let auth = BasicAuth::new();
        let req = GatewayRequest::new("GET", "/");
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Missing);

        let req = request_with_header("Authorization", "Basic !!!notb64!!!");
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Invalid);
    }

    #[test]
    fn stored_password_is_salted_hash() {
        let auth = BasicAuth::new();
        auth.add_user("u", "secret");
        let stored = auth.users.read().unwrap()["u"].clone();
        assert!(stored.contains(':'));
        assert!(!stored.contains("secret"));
    }

    #[test]
    fn api_key_header_and_query() {
        let auth = ApiKeyAuth::new();
        auth.add_key("key-1", "alice");

        let req = request_with_header("X-API-Key", "key-1");
        assert!(auth.authenticate(&req).is_authenticated());

        let mut req = GatewayRequest::new("GET", "/");
        req.query.push(("api_key".into(), "key-1".into()));
        assert!(auth.authenticate(&req).is_authenticated());

        let req = request_with_header("X-API-Key", "bogus");
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Failed);
    }

    #[test]
    fn generated_keys_authenticate() {
        let auth = ApiKeyAuth::new();
        let key = auth.generate_key("bob");
        let req = request_with_header("X-API-Key", &key);
        let result = auth.authenticate(&req);
        assert_eq!(result.identity.as_deref(), Some("bob"));

        assert!(auth.revoke_key(&key));
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Failed);
    }

    #[test]
    fn bearer_token_expiry() {
        let auth = BearerTokenAuth::new();
        auth.add_token("live", "alice", Map::new(), Some(unix_now() + 60));
        auth.add_token("dead", "bob", Map::new(), Some(unix_now().saturating_sub(10)));

        let req = request_with_header("Authorization", "Bearer live");
        assert!(auth.authenticate(&req).is_authenticated());

        let req = request_with_header("Authorization", "Bearer dead");
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Expired);
    }

    #[test]
    fn composite_skips_missing_but_stops_on_failure() {
        let basic = BasicAuth::new();
        basic.add_user("admin", "pw");
        let api = ApiKeyAuth::new();
        api.add_key("k", "svc");

        let composite = CompositeAuth::new()
            .add_provider(Box::new(basic))
            .add_provider(Box::new(api));

        // Basic credential missing, API key present: succeeds via second.
        let req = request_with_header("X-API-Key", "k");
        assert!(composite.authenticate(&req).is_authenticated());

        // Explicit basic failure short-circuits; the API provider is not
        // consulted even though it would also fail.
        let req = request_with_header("Authorization", &basic_header("admin", "wrong"));
        let result = composite.authenticate(&req);
        assert_eq!(result.status, AuthStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Invalid credentials"));
    }

    #[test]
    fn token_generation_is_urlsafe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // 256 bits -> 43 base64url chars unpadded.
        assert_eq!(a.len(), 43);
    }
}
