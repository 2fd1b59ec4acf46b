//! Central gateway error type.
//!
//! Every pipeline failure is expressed as a [`GatewayError`] kind which maps
//! onto exactly one HTTP status. The actix integration renders errors as
//! `{"error": "<message>"}` JSON bodies; the internal pipeline uses
//! [`GatewayError::to_response`] for the same mapping.

use crate::models::http::GatewayResponse;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// No configured route matches the request path.
    #[error("No route matches path: {path}")]
    NoRoute { path: String },

    /// A route matched but does not allow the request method.
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Authentication missing or invalid.
    #[error("{0}")]
    Unauthorized(String),

    /// The ACL engine denied the request.
    #[error("{0}")]
    Forbidden(String),

    /// The rate limiter denied the request.
    #[error("Too many requests")]
    RateLimited {
        /// Seconds the client should wait before retrying.
        retry_after: u64,
    },

    /// The pool had no available backend for the matched route.
    #[error("No backend available")]
    NoBackend,

    /// The circuit breaker for the target is open or half-open saturated.
    #[error("Circuit breaker open for {target}")]
    CircuitOpen { target: String },

    /// Upstream connect/read/write exceeded its deadline.
    #[error("Upstream timeout after {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// Upstream I/O failure or malformed response.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Invalid route or gateway configuration discovered at runtime.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything unexpected.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status this error kind produces.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::NoRoute { .. } => 404,
            GatewayError::MethodNotAllowed { .. } => 405,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::NoBackend => 502,
            GatewayError::CircuitOpen { .. } => 503,
            GatewayError::UpstreamTimeout { .. } => 504,
            GatewayError::Upstream(_) => 502,
            GatewayError::Config(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Short machine-readable kind tag, used in error bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoRoute { .. } => "no_route",
            GatewayError::MethodNotAllowed { .. } => "method_not_allowed",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::NoBackend => "no_backend",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::Config(_) => "config",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Renders the error as a pipeline response per the status table.
    ///
    /// Rate-limit denials additionally carry a `Retry-After` header.
    pub fn to_response(&self) -> GatewayResponse {
        let mut resp = GatewayResponse::error(self.status(), self.to_string());
        if let GatewayError::RateLimited { retry_after } = self {
            resp.headers.set("Retry-After", retry_after.to_string());
        }
        resp
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let GatewayError::RateLimited { retry_after } = self {
            builder.insert_header(("Retry-After", retry_after.to_string()));
        }
        builder.json(json!({
            "error": self.to_string(),
            "type": self.kind(),
        }))
    }
}
