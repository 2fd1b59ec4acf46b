//! Gateway request and response types.
//!
//! The pipeline operates on its own HTTP representation rather than on the
//! host framework's types: middleware and plugins mutate a [`GatewayRequest`]
//! before forwarding and a [`GatewayResponse`] after, and the actix handler
//! layer converts at the boundary. Headers are case-insensitive for lookups
//! while preserving the original spelling for round-trips, and query pairs
//! keep their order and duplicates.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Case-insensitive header multimap preserving original casing.
///
/// Lookups compare names ASCII case-insensitively; iteration and conversion
/// back to wire form yield the names exactly as they were inserted.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value for `name`, comparing case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values for `name` in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces any existing values for `name` with a single value.
    ///
    /// The new entry keeps the spelling passed here, not the spelling of the
    /// entry it replaces.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Appends a value without removing existing ones (e.g. `Set-Cookie`).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Removes all values for `name`. Returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// Renames a header, keeping its values. No-op when absent.
    pub fn rename(&mut self, from: &str, to: &str) {
        for (k, _) in self.entries.iter_mut() {
            if k.eq_ignore_ascii_case(from) {
                *k = to.to_string();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// An inbound HTTP request as seen by the gateway pipeline.
///
/// Created once on accept and owned by the request task. Middleware and
/// plugins may mutate headers, body and the [`context`](Self::context)
/// scratch map before the request is forwarded; after the response is
/// flushed the request is dropped.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    /// Query pairs in wire order; duplicate keys are preserved.
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub remote_addr: String,
    pub protocol: String,
    /// Monotonic arrival timestamp, used for latency accounting.
    pub received_at: Instant,
    /// Path parameters captured by the matched route.
    pub params: HashMap<String, String>,
    /// Opaque per-request scratch space for middleware and plugins.
    context: HashMap<String, Value>,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Headers::new(),
            body: Vec::new(),
            remote_addr: String::new(),
            protocol: "HTTP/1.1".to_string(),
            received_at: Instant::now(),
            params: HashMap::new(),
            context: HashMap::new(),
        }
    }

    /// First query value for `key`, if any.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or("")
    }

    pub fn content_length(&self) -> usize {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_json(&self) -> bool {
        self.content_type().contains("application/json")
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Stores a value in the per-request context.
    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    /// Reads a value from the per-request context.
    pub fn context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn take_context(&mut self, key: &str) -> Option<Value> {
        self.context.remove(key)
    }
}

/// An HTTP response produced by the forwarder or a short-circuiting
/// middleware/plugin.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Canonical reason phrase for the status code.
    pub fn status_message(&self) -> &'static str {
        status_message(self.status)
    }

    /// 2xx classification.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 3xx classification.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// 4xx/5xx classification.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// JSON response with `Content-Type: application/json`.
    pub fn json(data: &Value, status: u16) -> Self {
        let body = serde_json::to_vec(data).unwrap_or_default();
        Self {
            status,
            headers: [("Content-Type", "application/json")].into_iter().collect(),
            body,
        }
    }

    /// Plain-text response.
    pub fn text(text: impl Into<String>, status: u16) -> Self {
        Self {
            status,
            headers: [("Content-Type", "text/plain")].into_iter().collect(),
            body: text.into().into_bytes(),
        }
    }

    /// HTML response.
    pub fn html(html: impl Into<String>, status: u16) -> Self {
        Self {
            status,
            headers: [("Content-Type", "text/html")].into_iter().collect(),
            body: html.into().into_bytes(),
        }
    }

    /// Redirect response with a `Location` header.
    pub fn redirect(location: impl Into<String>, status: u16) -> Self {
        let mut headers = Headers::new();
        headers.set("Location", location);
        Self {
            status,
            headers,
            body: Vec::new(),
        }
    }

    /// Error response with the default `{"error": message}` body.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(&serde_json::json!({ "error": message.into() }), status)
    }
}

/// Reason phrase lookup for the statuses the gateway produces.
pub fn status_message(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn header_set_replaces_but_keeps_new_spelling() {
        let mut headers = Headers::new();
        headers.set("x-api-key", "a");
        headers.set("X-Api-Key", "b");
        assert_eq!(headers.len(), 1);
        let (name, value) = headers.iter().next().unwrap();
        assert_eq!(name, "X-Api-Key");
        assert_eq!(value, "b");
    }

    #[test]
    fn header_append_preserves_duplicates() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Set-Cookie", "b=2");
        assert_eq!(headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn query_duplicates_preserved_in_order() {
        let mut req = GatewayRequest::new("GET", "/search");
        req.query.push(("q".into(), "one".into()));
        req.query.push(("q".into(), "two".into()));
        assert_eq!(req.query_param("q"), Some("one"));
        assert_eq!(req.query.len(), 2);
    }

    #[test]
    fn response_classification() {
        assert!(GatewayResponse::new(204).is_success());
        assert!(GatewayResponse::new(302).is_redirect());
        assert!(GatewayResponse::new(404).is_error());
        assert!(GatewayResponse::new(503).is_error());
        assert!(!GatewayResponse::new(200).is_error());
    }

    #[test]
    fn error_response_body_shape() {
        let resp = GatewayResponse::error(404, "Not Found");
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], "Not Found");
        assert_eq!(resp.status_message(), "Not Found");
    }

    #[test]
    fn request_context_round_trip() {
        let mut req = GatewayRequest::new("GET", "/");
        req.set_context("user_id", serde_json::json!("u-1"));
        assert_eq!(req.context("user_id").unwrap(), "u-1");
        assert!(req.context("missing").is_none());
    }
}
