//! Path, address and request-inspection helpers shared across the gateway.

use crate::models::http::GatewayRequest;

/// Canonicalizes a URL path: collapses `//`, enforces a leading `/` and
/// strips the trailing `/` except for the root.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut result = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        result.push('/');
    }

    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        result.push(ch);
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Splits a `host:port` address. Defaults to port 80 when absent.
///
/// Only the last `:` is treated as the separator so IPv6-ish hosts with
/// embedded colons keep their head intact.
pub fn split_address(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), 80),
        },
        None => (address.to_string(), 80),
    }
}

/// Builds a target URL from scheme, address and path.
pub fn format_target(scheme: &str, address: &str, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("{}://{}{}", scheme, address, path)
}

/// Extracts the real client IP: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the connection's remote address.
pub fn extract_client_ip(request: &GatewayRequest) -> String {
    if let Some(xff) = request.header("X-Forwarded-For") {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = request.header("X-Real-IP") {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    request.remote_addr.clone()
}

/// Detects a WebSocket upgrade request. The gateway only passes these
/// through; it does not speak the protocol itself.
pub fn is_websocket_upgrade(request: &GatewayRequest) -> bool {
    let upgrade = request
        .header("Upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection = request
        .header("Connection")
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    upgrade && connection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_trims() {
        assert_eq!(normalize_path("//api//users/"), "/api/users");
        assert_eq!(normalize_path("api"), "/api");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn split_address_defaults_port() {
        assert_eq!(split_address("backend:8080"), ("backend".to_string(), 8080));
        assert_eq!(split_address("backend"), ("backend".to_string(), 80));
    }

    #[test]
    fn client_ip_prefers_forwarded_chain() {
        let mut req = GatewayRequest::new("GET", "/");
        req.remote_addr = "9.9.9.9".into();
        assert_eq!(extract_client_ip(&req), "9.9.9.9");

        req.set_header("X-Real-IP", "8.8.8.8");
        assert_eq!(extract_client_ip(&req), "8.8.8.8");

        req.set_header("X-Forwarded-For", "1.1.1.1, 2.2.2.2");
        assert_eq!(extract_client_ip(&req), "1.1.1.1");
    }

    #[test]
    fn websocket_upgrade_detection() {
        let mut req = GatewayRequest::new("GET", "/ws");
        assert!(!is_websocket_upgrade(&req));
        req.set_header("Upgrade", "websocket");
        req.set_header("Connection", "keep-alive, Upgrade");
        assert!(is_websocket_upgrade(&req));
    }
}
