//! OAuth2 authorization server.
//!
//! Implements the Authorization-Code grant (with optional PKCE `S256`),
//! Client-Credentials and Refresh-Token grants over in-memory stores.
//! Authorization codes expire after ten minutes, are single-use and bound
//! to both the issuing client and the redirect URI; the refresh grant
//! rotates both tokens.

use crate::models::http::GatewayRequest;
use crate::security::auth::{generate_token, unix_now, AuthProvider, AuthResult, AuthStatus};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Authorization-code lifetime in seconds.
const CODE_TTL: u64 = 600;

/// OAuth2 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "authorization_code" => Some(Self::AuthorizationCode),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

/// A registered OAuth2 client.
#[derive(Debug, Clone)]
pub struct OAuth2Client {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: HashSet<GrantType>,
    pub scopes: HashSet<String>,
}

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub token_expiry: u64,
    pub refresh_token_expiry: u64,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            token_expiry: 3600,
            refresh_token_expiry: 86_400 * 30,
        }
    }
}

/// Issued token pair.
#[derive(Debug, Clone)]
pub struct OAuth2Token {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl OAuth2Token {
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "access_token": self.access_token,
            "token_type": self.token_type,
            "expires_in": self.expires_in,
            "scope": self.scope,
        });
        if let Some(refresh) = &self.refresh_token {
            body["refresh_token"] = Value::from(refresh.clone());
        }
        body
    }
}

/// Standard OAuth2 error (`error` + `error_description`).
#[derive(Debug, thiserror::Error)]
#[error("{error}: {description}")]
pub struct OAuth2Error {
    pub error: &'static str,
    pub description: String,
}

impl OAuth2Error {
    fn new(error: &'static str, description: impl Into<String>) -> Self {
        Self {
            error,
            description: description.into(),
        }
    }
}

struct AuthorizationCode {
    client_id: String,
    redirect_uri: String,
    scope: String,
    user_id: String,
    expires_at: u64,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

struct IssuedToken {
    client_id: String,
    user_id: String,
    scope: String,
    expires_at: u64,
}

/// Token request parameters, independent of transport encoding.
#[derive(Debug, Default, Clone)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub code_verifier: Option<String>,
}

/// In-memory OAuth2 provider.
///
/// Doubles as an [`AuthProvider`]: bearer access tokens issued here
/// authenticate requests against the gateway.
pub struct OAuth2Provider {
    config: OAuth2Config,
    clients: Mutex<HashMap<String, OAuth2Client>>,
    codes: Mutex<HashMap<String, AuthorizationCode>>,
    tokens: Mutex<HashMap<String, IssuedToken>>,
    refresh_tokens: Mutex<HashMap<String, IssuedToken>>,
}

impl OAuth2Provider {
    pub fn new(config: OAuth2Config) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
            codes: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            refresh_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_client(&self, client: OAuth2Client) {
        self.clients
            .lock()
            .unwrap()
            .insert(client.client_id.clone(), client);
    }

    /// Handles an authorization request for the code flow, returning the
    /// redirect URI carrying the code.
    pub fn authorize(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        state: &str,
        user_id: &str,
        code_challenge: Option<&str>,
        code_challenge_method: Option<&str>,
    ) -> Result<String, OAuth2Error> {
        {
            let clients = self.clients.lock().unwrap();
            let client = clients
                .get(client_id)
                .ok_or_else(|| OAuth2Error::new("invalid_client", "Unknown client"))?;
            if !client.redirect_uris.iter().any(|uri| uri == redirect_uri) {
                return Err(OAuth2Error::new(
                    "invalid_redirect_uri",
                    "Redirect URI not registered",
                ));
            }
        }

        let code = generate_token();
        self.codes.lock().unwrap().insert(
            code.clone(),
            AuthorizationCode {
                client_id: client_id.to_string(),
                redirect_uri: redirect_uri.to_string(),
                scope: scope.to_string(),
                user_id: user_id.to_string(),
                expires_at: unix_now() + CODE_TTL,
                code_challenge: code_challenge.map(|s| s.to_string()),
                code_challenge_method: code_challenge_method.map(|s| s.to_string()),
            },
        );

        Ok(format!("{}?code={}&state={}", redirect_uri, code, state))
    }

    /// Handles a token request for any supported grant.
    pub fn token(&self, request: &TokenRequest) -> Result<OAuth2Token, OAuth2Error> {
        let grant_type = GrantType::parse(&request.grant_type)
            .ok_or_else(|| OAuth2Error::new("unsupported_grant_type", "Grant type not supported"))?;

        let client = {
            let clients = self.clients.lock().unwrap();
            let client = clients
                .get(&request.client_id)
                .ok_or_else(|| OAuth2Error::new("invalid_client", "Unknown client"))?;

            if let Some(secret) = &request.client_secret {
                if &client.client_secret != secret {
                    return Err(OAuth2Error::new("invalid_client", "Invalid client secret"));
                }
            }
            if !client.grant_types.contains(&grant_type) {
                return Err(OAuth2Error::new(
                    "unauthorized_client",
                    "Grant type not allowed for client",
                ));
            }
            client.clone()
        };

        match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(&client, request),
            GrantType::ClientCredentials => Ok(self.issue(
                &client.client_id,
                &client.client_id,
                &request
                    .scope
                    .clone()
                    .unwrap_or_else(|| client.scopes.iter().cloned().collect::<Vec<_>>().join(" ")),
            )),
            GrantType::RefreshToken => self.refresh(&client, request),
        }
    }

    fn exchange_code(
        &self,
        client: &OAuth2Client,
        request: &TokenRequest,
    ) -> Result<OAuth2Token, OAuth2Error> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| OAuth2Error::new("invalid_request", "Code required"))?;

        let auth_code = {
            let mut codes = self.codes.lock().unwrap();
            // Single use: the code leaves the store on first exchange.
            codes
                .remove(code)
                .ok_or_else(|| OAuth2Error::new("invalid_grant", "Invalid code"))?
        };

        if unix_now() > auth_code.expires_at {
            return Err(OAuth2Error::new("invalid_grant", "Code expired"));
        }
        if auth_code.client_id != client.client_id {
            return Err(OAuth2Error::new("invalid_grant", "Client mismatch"));
        }
        if Some(auth_code.redirect_uri.as_str()) != request.redirect_uri.as_deref() {
            return Err(OAuth2Error::new("invalid_grant", "Redirect URI mismatch"));
        }

        if let Some(challenge) = &auth_code.code_challenge {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuth2Error::new("invalid_request", "Code verifier required"))?;

            let computed = match auth_code.code_challenge_method.as_deref() {
                Some("S256") => {
                    let digest = Sha256::digest(verifier.as_bytes());
                    URL_SAFE_NO_PAD.encode(digest)
                }
                _ => verifier.to_string(),
            };

            if &computed != challenge {
                return Err(OAuth2Error::new("invalid_grant", "Invalid code verifier"));
            }
        }

        Ok(self.issue(&client.client_id, &auth_code.user_id, &auth_code.scope))
    }

    fn refresh(
        &self,
        client: &OAuth2Client,
        request: &TokenRequest,
    ) -> Result<OAuth2Token, OAuth2Error> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuth2Error::new("invalid_request", "Refresh token required"))?;

        let data = {
            let mut refresh_tokens = self.refresh_tokens.lock().unwrap();
            // Rotation: the presented refresh token is consumed.
            refresh_tokens
                .remove(refresh_token)
                .ok_or_else(|| OAuth2Error::new("invalid_grant", "Invalid refresh token"))?
        };

        if unix_now() > data.expires_at {
            return Err(OAuth2Error::new("invalid_grant", "Refresh token expired"));
        }
        if data.client_id != client.client_id {
            return Err(OAuth2Error::new("invalid_grant", "Client mismatch"));
        }

        Ok(self.issue(&client.client_id, &data.user_id, &data.scope))
    }

    fn issue(&self, client_id: &str, user_id: &str, scope: &str) -> OAuth2Token {
        let access_token = generate_token();
        let refresh_token = generate_token();
        let now = unix_now();

        self.tokens.lock().unwrap().insert(
            access_token.clone(),
            IssuedToken {
                client_id: client_id.to_string(),
                user_id: user_id.to_string(),
                scope: scope.to_string(),
                expires_at: now + self.config.token_expiry,
            },
        );
        self.refresh_tokens.lock().unwrap().insert(
            refresh_token.clone(),
            IssuedToken {
                client_id: client_id.to_string(),
                user_id: user_id.to_string(),
                scope: scope.to_string(),
                expires_at: now + self.config.refresh_token_expiry,
            },
        );

        OAuth2Token {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.token_expiry,
            refresh_token: Some(refresh_token),
            scope: scope.to_string(),
        }
    }

    /// Revokes an access or refresh token.
    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.lock().unwrap().remove(token).is_some()
            || self.refresh_tokens.lock().unwrap().remove(token).is_some()
    }
}

impl AuthProvider for OAuth2Provider {
    fn name(&self) -> &'static str {
        "oauth2"
    }

    fn authenticate(&self, request: &GatewayRequest) -> AuthResult {
        let Some(token) = self.credentials(request) else {
            return AuthResult::failure(AuthStatus::Missing, "No access token provided");
        };

        let tokens = self.tokens.lock().unwrap();
        match tokens.get(&token) {
            Some(data) => {
                if unix_now() > data.expires_at {
                    return AuthResult::failure(AuthStatus::Expired, "Access token expired");
                }
                let mut claims = Map::new();
                claims.insert("client_id".to_string(), Value::from(data.client_id.clone()));
                claims.insert("scope".to_string(), Value::from(data.scope.clone()));
                AuthResult {
                    status: AuthStatus::Success,
                    identity: Some(data.user_id.clone()),
                    claims,
                    expires_at: Some(data.expires_at),
                    error: None,
                }
            }
            None => AuthResult::failure(AuthStatus::Invalid, "Invalid access token"),
        }
    }

    fn credentials(&self, request: &GatewayRequest) -> Option<String> {
        request
            .header("Authorization")?
            .strip_prefix("Bearer ")
            .map(|s| s.to_string())
    }
}
