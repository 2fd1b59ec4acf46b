//! The proxy forwarder: builds and issues upstream requests.
//!
//! Responsibilities: parse the target URL, copy request headers minus the
//! hop-by-hop set, manage `Host`/`X-Forwarded-For`/`X-Real-IP`, send the
//! request over the pooled client, and produce a [`ProxyResult`]. An
//! internal retry loop re-issues the request on configured gateway-ish
//! status codes with a linear `0.1·attempt` second backoff; the
//! higher-level retry policy may wrap this again.
//!
//! A streaming variant yields the response head and then body chunks
//! without accumulating the full body.

use crate::models::http::Headers;
use futures_util::Stream;
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::collections::HashSet;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Headers meaningful only for a single transport hop; never forwarded.
pub static HOP_BY_HOP_HEADERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ]
    .into_iter()
    .collect()
});

/// Forwarder configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Internal status-code retry budget.
    pub max_retries: u32,
    pub retry_on_status: Vec<u16>,
    /// Keep the inbound `Host` header when present.
    pub preserve_host: bool,
    /// Append the client IP to `X-Forwarded-For` and set `X-Real-IP`.
    pub add_forwarded_headers: bool,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_on_status: vec![502, 503, 504],
            preserve_host: true,
            add_forwarded_headers: true,
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one proxied exchange.
#[derive(Debug, Clone)]
pub struct ProxyResult {
    pub success: bool,
    pub status_code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub latency_ms: f64,
    pub backend_address: String,
    pub error: Option<String>,
    /// Whether the failure was a timeout (drives 504 vs 502 mapping).
    pub timed_out: bool,
    /// Internal status-retry attempts consumed.
    pub retries: u32,
}

impl ProxyResult {
    fn failure(error: String, timed_out: bool, backend_address: String, retries: u32) -> Self {
        Self {
            success: false,
            status_code: 0,
            headers: Headers::new(),
            body: Vec::new(),
            latency_ms: 0.0,
            backend_address,
            error: Some(error),
            timed_out,
            retries,
        }
    }
}

/// Streaming response: head plus a chunked body source.
pub struct ProxyStream {
    pub status_code: u16,
    pub headers: Headers,
    pub backend_address: String,
    pub body: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
}

/// HTTP forwarder over a pooled client.
///
/// The proxy owns no per-request state; a single instance serves every
/// worker.
#[derive(Clone)]
pub struct Proxy {
    config: ProxyConfig,
    client: Client,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .expect("Failed to create proxy HTTP client");

        Self { config, client }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Prepares outbound headers: strips the hop-by-hop set, resolves the
    /// `Host` header and appends forwarding headers.
    pub fn prepare_headers(
        &self,
        headers: &Headers,
        target_host: &str,
        client_ip: Option<&str>,
    ) -> Headers {
        let mut prepared = Headers::new();

        for (name, value) in headers.iter() {
            if HOP_BY_HOP_HEADERS.contains(name.to_ascii_lowercase().as_str()) {
                continue;
            }
            prepared.append(name, value);
        }

        if !self.config.preserve_host || !prepared.contains("Host") {
            prepared.set("Host", target_host);
        }

        if self.config.add_forwarded_headers {
            if let Some(ip) = client_ip {
                match prepared.get("X-Forwarded-For").map(|v| v.to_string()) {
                    Some(existing) if !existing.is_empty() => {
                        prepared.set("X-Forwarded-For", format!("{}, {}", existing, ip));
                    }
                    _ => prepared.set("X-Forwarded-For", ip),
                }
                prepared.set("X-Real-IP", ip);
            }
        }

        prepared
    }

    /// Forwards a request to `url` and collects the full response.
    ///
    /// Retries on the configured status codes up to `max_retries`, sleeping
    /// `0.1 · attempt` seconds between attempts.
    pub async fn forward(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: &[u8],
        client_ip: Option<&str>,
    ) -> ProxyResult {
        let start = Instant::now();

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                return ProxyResult::failure(format!("Invalid target URL '{}': {}", url, e), false, String::new(), 0)
            }
        };
        let backend_address = format!(
            "{}:{}",
            parsed.host_str().unwrap_or(""),
            parsed.port_or_known_default().unwrap_or(80)
        );

        let reqwest_method = match Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return ProxyResult::failure(
                    format!("Invalid method '{}'", method),
                    false,
                    backend_address,
                    0,
                )
            }
        };

        let prepared = self.prepare_headers(headers, parsed.host_str().unwrap_or(""), client_ip);
        let header_map = to_reqwest_headers(&prepared);

        let mut retries = 0u32;
        let mut last_error: Option<(String, bool)> = None;

        loop {
            let request = self
                .client
                .request(reqwest_method.clone(), parsed.clone())
                .headers(header_map.clone())
                .body(body.to_vec());

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if self.config.retry_on_status.contains(&status)
                        && retries < self.config.max_retries
                    {
                        retries += 1;
                        debug!(
                            "Upstream {} returned {}; retry {}/{}",
                            backend_address, status, retries, self.config.max_retries
                        );
                        tokio::time::sleep(Duration::from_secs_f64(0.1 * retries as f64)).await;
                        continue;
                    }

                    let mut result_headers = Headers::new();
                    for (name, value) in response.headers() {
                        if let Ok(value) = value.to_str() {
                            result_headers.append(name.as_str(), value);
                        }
                    }

                    return match response.bytes().await {
                        Ok(bytes) => ProxyResult {
                            success: true,
                            status_code: status,
                            headers: result_headers,
                            body: bytes.to_vec(),
                            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                            backend_address,
                            error: None,
                            timed_out: false,
                            retries,
                        },
                        Err(e) => {
                            let mut failure = ProxyResult::failure(
                                format!("Failed reading upstream body: {}", e),
                                e.is_timeout(),
                                backend_address,
                                retries,
                            );
                            failure.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                            failure
                        }
                    };
                }
                Err(e) => {
                    let timed_out = e.is_timeout() || e.is_connect() && e.to_string().contains("timed out");
                    last_error = Some((e.to_string(), timed_out));
                    retries += 1;
                    if retries <= self.config.max_retries {
                        warn!(
                            "Forward to {} failed ({}); retry {}/{}",
                            backend_address, e, retries, self.config.max_retries
                        );
                        tokio::time::sleep(Duration::from_secs_f64(0.1 * retries as f64)).await;
                        continue;
                    }
                    break;
                }
            }
        }

        let (message, timed_out) =
            last_error.unwrap_or_else(|| ("Max retries exceeded".to_string(), false));
        let mut failure = ProxyResult::failure(message, timed_out, backend_address, retries);
        failure.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        failure
    }

    /// Forwards a request and hands back the response head plus a body
    /// stream. No internal status retry: by the time the head is yielded
    /// the exchange is committed.
    pub async fn forward_streaming(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: &[u8],
        client_ip: Option<&str>,
    ) -> Result<ProxyStream, ProxyResult> {
        let parsed =
            Url::parse(url).map_err(|e| ProxyResult::failure(e.to_string(), false, String::new(), 0))?;
        let backend_address = format!(
            "{}:{}",
            parsed.host_str().unwrap_or(""),
            parsed.port_or_known_default().unwrap_or(80)
        );

        let reqwest_method = Method::from_bytes(method.as_bytes()).map_err(|_| {
            ProxyResult::failure(
                format!("Invalid method '{}'", method),
                false,
                backend_address.clone(),
                0,
            )
        })?;

        let prepared = self.prepare_headers(headers, parsed.host_str().unwrap_or(""), client_ip);

        let response = self
            .client
            .request(reqwest_method, parsed)
            .headers(to_reqwest_headers(&prepared))
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                ProxyResult::failure(e.to_string(), e.is_timeout(), backend_address.clone(), 0)
            })?;

        let status_code = response.status().as_u16();
        let mut result_headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                result_headers.append(name.as_str(), value);
            }
        }

        Ok(ProxyStream {
            status_code,
            headers: result_headers,
            backend_address,
            body: Box::pin(response.bytes_stream()),
        })
    }
}

fn to_reqwest_headers(headers: &Headers) -> ReqwestHeaderMap {
    let mut map = ReqwestHeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}
