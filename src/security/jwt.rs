//! JWT authentication provider.
//!
//! Validation runs on `jsonwebtoken`: the configured algorithm is pinned
//! (a token carrying a different `alg` is rejected), `exp`/`nbf`/`iat` are
//! checked with the configured leeway, and `iss`/`aud` are enforced when
//! configured. Expired tokens yield [`AuthStatus::Expired`]; every other
//! validation failure yields [`AuthStatus::Invalid`]. A revocation
//! blacklist is consulted before any cryptographic work.

use crate::models::http::GatewayRequest;
use crate::security::auth::{unix_now, AuthProvider, AuthResult, AuthStatus};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::RwLock;

/// JWT provider configuration.
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Seconds of clock leeway for `exp`/`nbf`/`iat`.
    pub leeway: u64,
    pub required_claims: HashSet<String>,
    pub validate_exp: bool,
    pub validate_nbf: bool,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            issuer: None,
            audience: None,
            leeway: 0,
            required_claims: HashSet::new(),
            validate_exp: true,
            validate_nbf: true,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn with_required_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_claims = claims.into_iter().map(Into::into).collect();
        self
    }
}

/// JWT authentication provider.
///
/// # Examples
///
/// ```
/// use tollgate_rs::models::http::GatewayRequest;
/// use tollgate_rs::security::auth::AuthProvider;
/// use tollgate_rs::security::jwt::{JwtAuth, JwtConfig};
///
/// let auth = JwtAuth::new(JwtConfig::new("secret"));
/// let token = auth.create_token("user-1", 3600, None).unwrap();
///
/// let mut req = GatewayRequest::new("GET", "/");
/// req.set_header("Authorization", format!("Bearer {}", token));
/// assert!(auth.authenticate(&req).is_authenticated());
/// ```
pub struct JwtAuth {
    config: JwtConfig,
    blacklist: RwLock<HashSet<String>>,
}

impl JwtAuth {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            config,
            blacklist: RwLock::new(HashSet::new()),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.config.algorithm);
        validation.leeway = self.config.leeway;
        validation.validate_exp = self.config.validate_exp;
        validation.validate_nbf = self.config.validate_nbf;
        // Only enforce aud when configured; otherwise tokens carrying an
        // audience would fail spuriously.
        validation.validate_aud = self.config.audience.is_some();
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &self.config.audience {
            validation.set_audience(&[audience]);
        }
        // `sub` is optional; required claims are checked separately.
        validation.required_spec_claims = if self.config.validate_exp {
            ["exp".to_string()].into_iter().collect()
        } else {
            HashSet::new()
        };
        validation
    }

    /// Decodes and validates a token into its claims map.
    pub fn decode_claims(&self, token: &str) -> Result<Map<String, Value>, jsonwebtoken::errors::Error> {
        let key = DecodingKey::from_secret(self.config.secret.as_bytes());
        let data = decode::<Map<String, Value>>(token, &key, &self.validation())?;
        Ok(data.claims)
    }

    /// Adds a token to the revocation blacklist.
    pub fn blacklist(&self, token: impl Into<String>) {
        self.blacklist.write().unwrap().insert(token.into());
    }

    /// Mints a signed token for `subject`, expiring in `expires_in`
    /// seconds, optionally merging extra claims.
    pub fn create_token(
        &self,
        subject: &str,
        expires_in: i64,
        extra_claims: Option<Map<String, Value>>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = unix_now() as i64;
        let mut claims = extra_claims.unwrap_or_default();
        claims.insert("sub".to_string(), Value::from(subject));
        claims.insert("iat".to_string(), Value::from(now));
        claims.insert("exp".to_string(), Value::from(now + expires_in));
        if let Some(issuer) = &self.config.issuer {
            claims.entry("iss".to_string()).or_insert(Value::from(issuer.clone()));
        }
        if let Some(audience) = &self.config.audience {
            claims.entry("aud".to_string()).or_insert(Value::from(audience.clone()));
        }

        let header = Header::new(self.config.algorithm);
        let key = EncodingKey::from_secret(self.config.secret.as_bytes());
        encode(&header, &claims, &key)
    }
}

impl AuthProvider for JwtAuth {
    fn name(&self) -> &'static str {
        "jwt"
    }

    fn authenticate(&self, request: &GatewayRequest) -> AuthResult {
        let Some(token) = self.credentials(request) else {
            return AuthResult::failure(AuthStatus::Missing, "No JWT token provided");
        };

        if self.blacklist.read().unwrap().contains(&token) {
            return AuthResult::failure(AuthStatus::Failed, "Token has been revoked");
        }

        let claims = match self.decode_claims(&token) {
            Ok(claims) => claims,
            Err(error) => {
                use jsonwebtoken::errors::ErrorKind;
                return match error.kind() {
                    ErrorKind::ExpiredSignature => {
                        AuthResult::failure(AuthStatus::Expired, "Token has expired")
                    }
                    ErrorKind::ImmatureSignature => {
                        AuthResult::failure(AuthStatus::Invalid, "Token not yet valid")
                    }
                    ErrorKind::InvalidAlgorithm => {
                        AuthResult::failure(AuthStatus::Invalid, "Algorithm mismatch")
                    }
                    ErrorKind::InvalidIssuer => {
                        AuthResult::failure(AuthStatus::Invalid, "Invalid issuer")
                    }
                    ErrorKind::InvalidAudience => {
                        AuthResult::failure(AuthStatus::Invalid, "Invalid audience")
                    }
                    _ => AuthResult::failure(
                        AuthStatus::Invalid,
                        format!("Token validation failed: {}", error),
                    ),
                };
            }
        };

        for required in &self.config.required_claims {
            if !claims.contains_key(required) {
                return AuthResult::failure(
                    AuthStatus::Invalid,
                    format!("Missing required claim: {}", required),
                );
            }
        }

        let identity = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let expires_at = claims.get("exp").and_then(|v| v.as_u64());

        AuthResult {
            status: AuthStatus::Success,
            identity,
            claims,
            expires_at,
            error: None,
        }
    }

    fn credentials(&self, request: &GatewayRequest) -> Option<String> {
        request
            .header("Authorization")?
            .strip_prefix("Bearer ")
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer_request(token: &str) -> GatewayRequest {
        let mut req = GatewayRequest::new("GET", "/");
        req.set_header("Authorization", format!("Bearer {}", token));
        req
    }

    #[test]
    fn round_trip_succeeds() {
        let auth = JwtAuth::new(JwtConfig::new("secret"));
        let token = auth.create_token("user-1", 3600, None).unwrap();

        let result = auth.authenticate(&bearer_request(&token));
        assert!(result.is_authenticated());
        assert_eq!(result.identity.as_deref(), Some("user-1"));
        assert!(result.expires_at.unwrap() > unix_now());
    }

    #[test]
    fn expired_token_maps_to_expired() {
        let auth = JwtAuth::new(JwtConfig::new("secret"));
        // exp = now - 10, leeway 0.
        let token = auth.create_token("user-1", -10, None).unwrap();

        let result = auth.authenticate(&bearer_request(&token));
        assert_eq!(result.status, AuthStatus::Expired);
        assert_eq!(result.error.as_deref(), Some("Token has expired"));
    }

    #[test]
    fn leeway_tolerates_recent_expiry() {
        let auth = JwtAuth::new(JwtConfig::new("secret").with_leeway(60));
        let token = auth.create_token("user-1", -10, None).unwrap();
        assert!(auth.authenticate(&bearer_request(&token)).is_authenticated());
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let minter = JwtAuth::new(JwtConfig::new("secret-a"));
        let verifier = JwtAuth::new(JwtConfig::new("secret-b"));
        let token = minter.create_token("user-1", 3600, None).unwrap();
        assert_eq!(
            verifier.authenticate(&bearer_request(&token)).status,
            AuthStatus::Invalid
        );
    }

    #[test]
    fn algorithm_mismatch_rejected() {
        let minter = JwtAuth::new(JwtConfig::new("secret").with_algorithm(Algorithm::HS384));
        let verifier = JwtAuth::new(JwtConfig::new("secret"));
        let token = minter.create_token("user-1", 3600, None).unwrap();
        assert_eq!(
            verifier.authenticate(&bearer_request(&token)).status,
            AuthStatus::Invalid
        );
    }

    #[test]
    fn issuer_and_audience_enforced() {
        let auth = JwtAuth::new(
            JwtConfig::new("secret")
                .with_issuer("tollgate")
                .with_audience("api"),
        );
        let token = auth.create_token("user-1", 3600, None).unwrap();
        assert!(auth.authenticate(&bearer_request(&token)).is_authenticated());

        let other = JwtAuth::new(
            JwtConfig::new("secret")
                .with_issuer("someone-else")
                .with_audience("api"),
        );
        let result = other.authenticate(&bearer_request(&token));
        assert_eq!(result.status, AuthStatus::Invalid);
    }

    #[test]
    fn required_claims_enforced() {
        let auth = JwtAuth::new(JwtConfig::new("secret").with_required_claims(["roles"]));
        let token = auth.create_token("user-1", 3600, None).unwrap();
        let result = auth.authenticate(&bearer_request(&token));
        assert_eq!(result.status, AuthStatus::Invalid);
        assert!(result.error.unwrap().contains("roles"));

        let mut claims = Map::new();
        claims.insert("roles".to_string(), serde_json::json!(["admin"]));
        let token = auth.create_token("user-1", 3600, Some(claims)).unwrap();
        assert!(auth.authenticate(&bearer_request(&token)).is_authenticated());
    }

    #[test]
    fn blacklisted_token_rejected() {
        let auth = JwtAuth::new(JwtConfig::new("secret"));
        let token = auth.create_token("user-1", 3600, None).unwrap();
        auth.blacklist(token.clone());
        let result = auth.authenticate(&bearer_request(&token));
        assert_eq!(result.status, AuthStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Token has been revoked"));
    }

    #[test]
    fn missing_token() {
        let auth = JwtAuth::new(JwtConfig::new("secret"));
        let req = GatewayRequest::new("GET", "/");
        assert_eq!(auth.authenticate(&req).status, AuthStatus::Missing);
    }
}
