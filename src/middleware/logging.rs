//! Request/response logging middleware.
//!
//! Tags each request with a short id, logs the inbound line on pre and the
//! status + latency line on post. [`AccessLogMiddleware`] additionally
//! emits combined-format access log lines.

use crate::middleware::Middleware;
use crate::models::http::{GatewayRequest, GatewayResponse};
use log::info;
use serde_json::json;
use uuid::Uuid;

/// Configuration for the request logger.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub log_headers: bool,
    pub log_query: bool,
    /// Path prefixes that are not logged (health probes, metrics scrapes).
    pub skip_paths: Vec<String>,
}

pub struct LoggingMiddleware {
    config: LoggingConfig,
}

impl LoggingMiddleware {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    fn skipped(&self, path: &str) -> bool {
        self.config.skip_paths.iter().any(|p| path.starts_with(p))
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        if self.skipped(&request.path) {
            return None;
        }

        let request_id = Uuid::new_v4().to_string()[..8].to_string();
        request.set_context("request_id", json!(request_id.clone()));

        let mut line = format!("[{}] --> {} {}", request_id, request.method, request.path);
        if self.config.log_query && !request.query.is_empty() {
            let query: Vec<String> = request
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            line.push_str(&format!(" ?{}", query.join("&")));
        }
        if self.config.log_headers {
            let names: Vec<&str> = request.headers.iter().map(|(k, _)| k).collect();
            line.push_str(&format!(" headers={:?}", names));
        }
        info!("{}", line);
        None
    }

    fn post_request(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        if self.skipped(&request.path) {
            return;
        }

        let request_id = request
            .context("request_id")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        let elapsed_ms = request.received_at.elapsed().as_secs_f64() * 1000.0;
        info!("[{}] <-- {} ({:.2}ms)", request_id, response.status, elapsed_ms);
    }
}

/// Combined-format access logging.
pub struct AccessLogMiddleware;

impl Middleware for AccessLogMiddleware {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn post_request(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        let referer = request.header("Referer").unwrap_or("-");
        let user_agent = request.header("User-Agent").unwrap_or("-");
        info!(
            "{} - - \"{} {} {}\" {} {} \"{}\" \"{}\"",
            request.remote_addr,
            request.method,
            request.path,
            request.protocol,
            response.status,
            response.body.len(),
            referer,
            user_agent,
        );
    }
}
