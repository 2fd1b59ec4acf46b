//! CORS middleware.
//!
//! Preflight `OPTIONS` requests are answered directly (204, no backend
//! contact) with the `Access-Control-Allow-*` headers; actual cross-origin
//! responses get `Access-Control-Allow-Origin` and, when configured,
//! `-Expose-Headers` and `-Allow-Credentials`.

use crate::middleware::Middleware;
use crate::models::http::{GatewayRequest, GatewayResponse};
use crate::models::settings::CorsSettings;

pub struct CorsMiddleware {
    config: CorsSettings,
}

impl CorsMiddleware {
    pub fn new(config: CorsSettings) -> Self {
        Self { config }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.config.allow_origins.iter().any(|o| o == "*")
            || self.config.allow_origins.iter().any(|o| o == origin)
    }

    fn allow_origin_value(&self, origin: &str) -> String {
        if self.config.allow_origins.iter().any(|o| o == "*") {
            "*".to_string()
        } else {
            origin.to_string()
        }
    }

    fn preflight_response(&self, request: &GatewayRequest) -> GatewayResponse {
        let origin = request.header("Origin").unwrap_or("").to_string();
        let mut response = GatewayResponse::new(204);

        if self.origin_allowed(&origin) {
            response
                .headers
                .set("Access-Control-Allow-Origin", self.allow_origin_value(&origin));
            response.headers.set(
                "Access-Control-Allow-Methods",
                self.config.allow_methods.join(", "),
            );
            response.headers.set(
                "Access-Control-Allow-Headers",
                self.config.allow_headers.join(", "),
            );
            response.headers.set(
                "Access-Control-Max-Age",
                self.config.max_age_secs.to_string(),
            );
            if self.config.allow_credentials {
                response
                    .headers
                    .set("Access-Control-Allow-Credentials", "true");
            }
        }

        response
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        if request.method == "OPTIONS" {
            return Some(self.preflight_response(request));
        }
        None
    }

    fn post_request(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        let Some(origin) = request.header("Origin") else {
            return;
        };
        if origin.is_empty() || !self.origin_allowed(origin) {
            return;
        }

        let allow_origin = self.allow_origin_value(origin);
        response
            .headers
            .set("Access-Control-Allow-Origin", allow_origin);

        if self.config.allow_credentials {
            response
                .headers
                .set("Access-Control-Allow-Credentials", "true");
        }
        if !self.config.expose_headers.is_empty() {
            response.headers.set(
                "Access-Control-Expose-Headers",
                self.config.expose_headers.join(", "),
            );
        }
    }
}
