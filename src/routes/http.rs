//! The proxy entry point.
//!
//! A catch-all actix handler converts the inbound request into the
//! gateway's model types, drives [`Gateway::handle`] and converts the
//! resulting response back. Registered as the app's default service so
//! every path not claimed by the admin surface flows through the pipeline.

use crate::models::http::{GatewayRequest, GatewayResponse};
use crate::services::gateway::Gateway;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;

/// Parses a raw query string into ordered pairs, duplicates preserved.
fn parse_query(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Builds a [`GatewayRequest`] from the actix request parts.
pub fn to_gateway_request(req: &HttpRequest, body: &web::Bytes) -> GatewayRequest {
    let mut request = GatewayRequest::new(req.method().as_str(), req.path());

    request.query = parse_query(req.query_string());
    request.protocol = format!("{:?}", req.version());
    request.remote_addr = req
        .connection_info()
        .peer_addr()
        .unwrap_or("")
        .to_string();
    request.body = body.to_vec();

    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request.headers.append(name.as_str(), value);
        }
    }

    request
}

/// Converts a pipeline response back to actix.
pub fn to_http_response(response: GatewayResponse) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers.iter() {
        builder.append_header((name, value));
    }
    builder.body(response.body)
}

/// The catch-all proxy handler.
pub async fn proxy_entry(
    req: HttpRequest,
    body: web::Bytes,
    gateway: web::Data<Arc<Gateway>>,
) -> HttpResponse {
    let request = to_gateway_request(&req, &body);
    let response = gateway.handle(request).await;
    to_http_response(response)
}

/// Registers the proxy entry as the default service.
pub fn configure_proxy(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::route().to(proxy_entry));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_preserves_order_and_duplicates() {
        let query = parse_query("a=1&b=2&a=3&flag");
        assert_eq!(
            query,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "3".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn response_conversion_keeps_headers_and_body() {
        let response = GatewayResponse::text("hello", 201).set_header("X-Custom", "v");
        let http = to_http_response(response);
        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers().get("X-Custom").unwrap(), "v");
    }
}
