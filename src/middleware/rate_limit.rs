//! Rate limiting middleware.
//!
//! Extracts the limiter key from the request (a custom extractor when
//! configured, else the first `X-Forwarded-For` entry, `X-Real-IP`, or the
//! remote address), consults the shared [`RateLimiter`] and short-circuits
//! denials with 429 plus quota headers. Allowed requests get the quota
//! headers stamped onto the eventual response.

use crate::middleware::Middleware;
use crate::models::http::{GatewayRequest, GatewayResponse};
use crate::services::rate_limit::{RateLimiter, RateLimitResult};
use crate::utils::path::extract_client_ip;
use log::warn;
use serde_json::json;
use std::sync::Arc;

pub type KeyExtractor = Box<dyn Fn(&GatewayRequest) -> Option<String> + Send + Sync>;

pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    key_extractor: Option<KeyExtractor>,
    include_headers: bool,
    skip_paths: Vec<String>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            key_extractor: None,
            include_headers: true,
            skip_paths: Vec::new(),
        }
    }

    /// Uses a caller-supplied key extractor (e.g. the authenticated user
    /// id) in place of the client IP.
    pub fn with_key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    pub fn with_skip_paths(mut self, paths: Vec<String>) -> Self {
        self.skip_paths = paths;
        self
    }

    pub fn with_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }

    fn key_for(&self, request: &GatewayRequest) -> String {
        if let Some(extractor) = &self.key_extractor {
            if let Some(key) = extractor(request) {
                return key;
            }
        }
        extract_client_ip(request)
    }

    fn apply_headers(result: &RateLimitResult, response: &mut GatewayResponse) {
        for (name, value) in result.headers() {
            response.headers.set(name, value);
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        if self.skip_paths.iter().any(|p| request.path.starts_with(p)) {
            return None;
        }

        let key = self.key_for(request);
        let result = self.limiter.check(&key);

        if !result.allowed {
            warn!("Rate limit exceeded for key: {}", key);
            let mut response =
                GatewayResponse::json(&json!({ "error": "Too many requests" }), 429);
            if self.include_headers {
                Self::apply_headers(&result, &mut response);
            }
            return Some(response);
        }

        // Stash the result so post_request can stamp quota headers.
        request.set_context(
            "rate_limit",
            json!({
                "remaining": result.remaining,
                "limit": result.limit,
                "reset_after": result.reset_after,
            }),
        );
        None
    }

    fn post_request(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        if !self.include_headers {
            return;
        }
        let Some(state) = request.context("rate_limit") else {
            return;
        };

        if let (Some(remaining), Some(limit)) =
            (state["remaining"].as_u64(), state["limit"].as_u64())
        {
            response
                .headers
                .set("X-RateLimit-Limit", limit.to_string());
            response
                .headers
                .set("X-RateLimit-Remaining", remaining.to_string());
            if let Some(reset_after) = state["reset_after"].as_f64() {
                let reset_at = crate::security::auth::unix_now() + reset_after.ceil() as u64;
                response.headers.set("X-RateLimit-Reset", reset_at.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(ip: &str) -> GatewayRequest {
        let mut req = GatewayRequest::new("GET", "/api");
        req.remote_addr = ip.to_string();
        req
    }

    #[test]
    fn denies_after_quota() {
        // capacity 2, no refill worth mentioning in-test
        let limiter = Arc::new(RateLimiter::new(1.0));
        let mw = RateLimitMiddleware::new(limiter);

        let mut req = request_from("1.1.1.1");
        assert!(mw.pre_request(&mut req).is_none());
        assert!(mw.pre_request(&mut req).is_none());

        let denied = mw.pre_request(&mut req).unwrap();
        assert_eq!(denied.status, 429);
        assert_eq!(denied.headers.get("X-RateLimit-Remaining"), Some("0"));
        assert!(denied.headers.contains("Retry-After"));
    }

    #[test]
    fn keys_are_per_client() {
        let limiter = Arc::new(RateLimiter::new(0.5));
        let mw = RateLimitMiddleware::new(limiter);

        assert!(mw.pre_request(&mut request_from("1.1.1.1")).is_none());
        assert!(mw.pre_request(&mut request_from("1.1.1.1")).is_some());
        assert!(mw.pre_request(&mut request_from("2.2.2.2")).is_none());
    }

    #[test]
    fn forwarded_for_drives_key() {
        let limiter = Arc::new(RateLimiter::new(0.5));
        let mw = RateLimitMiddleware::new(limiter);

        let mut req = request_from("9.9.9.9");
        req.set_header("X-Forwarded-For", "7.7.7.7, 8.8.8.8");
        assert!(mw.pre_request(&mut req).is_none());

        // Same forwarded client via another proxy hop is the same bucket.
        let mut req2 = request_from("6.6.6.6");
        req2.set_header("X-Forwarded-For", "7.7.7.7");
        assert!(mw.pre_request(&mut req2).is_some());
    }

    #[test]
    fn custom_key_extractor() {
        let limiter = Arc::new(RateLimiter::new(0.5));
        let mw = RateLimitMiddleware::new(limiter).with_key_extractor(Box::new(|req| {
            req.context("user_id")
                .and_then(|v| v.as_str())
                .map(|s| format!("user:{}", s))
        }));

        let mut req = request_from("1.1.1.1");
        req.set_context("user_id", json!("u1"));
        assert!(mw.pre_request(&mut req).is_none());
        assert!(mw.pre_request(&mut req).is_some());

        // Different user from the same IP has its own bucket.
        let mut req2 = request_from("1.1.1.1");
        req2.set_context("user_id", json!("u2"));
        assert!(mw.pre_request(&mut req2).is_none());
    }

    #[test]
    fn skip_paths_bypass_limiter() {
        let limiter = Arc::new(RateLimiter::new(0.5));
        let mw = RateLimitMiddleware::new(limiter)
            .with_skip_paths(vec!["/health".to_string()]);

        let mut req = GatewayRequest::new("GET", "/health");
        req.remote_addr = "1.1.1.1".to_string();
        for _ in 0..10 {
            assert!(mw.pre_request(&mut req).is_none());
        }
    }

    #[test]
    fn allowed_requests_get_headers_on_response() {
        let limiter = Arc::new(RateLimiter::new(5.0));
        let mw = RateLimitMiddleware::new(limiter);

        let mut req = request_from("1.1.1.1");
        assert!(mw.pre_request(&mut req).is_none());

        let mut response = GatewayResponse::new(200);
        mw.post_request(&req, &mut response);
        assert_eq!(response.headers.get("X-RateLimit-Limit"), Some("10"));
        assert!(response.headers.contains("X-RateLimit-Remaining"));
        assert!(response.headers.contains("X-RateLimit-Reset"));
    }
}
