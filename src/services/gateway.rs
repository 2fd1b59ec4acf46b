//! Per-request orchestration.
//!
//! [`Gateway::handle`] drives one request through the full pipeline:
//!
//! ```text
//! plugins pre → middleware pre → route match → plugins on_route_match
//!   → pool select → plugins on_backend_select
//!   → circuit.call(retry.execute(proxy.forward))
//!   → plugins post_request → middleware post (reverse) → plugins pre_response
//! ```
//!
//! Pipeline errors dispatch the plugins' `on_error` hook; a plugin-supplied
//! response replaces the default error mapping, and either way the
//! post-processing chain still runs so short-circuited and failed requests
//! get the same response treatment (CORS headers, logging) as proxied ones.

use crate::middleware::MiddlewareChain;
use crate::models::error::GatewayError;
use crate::models::http::{GatewayRequest, GatewayResponse};
use crate::plugins::PluginManager;
use crate::routing::router::Router;
use crate::services::backend_pool::BackendPool;
use crate::services::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::services::metrics::GatewayMetrics;
use crate::services::proxy::{Proxy, HOP_BY_HOP_HEADERS};
use crate::services::retry::{RetryError, RetryPolicy};
use crate::utils::path::extract_client_ip;
use log::debug;
use std::sync::Arc;

/// The data-plane core: owns the router, middleware chain, plugin manager,
/// backend pool, forwarder and the protection layers around it.
pub struct Gateway {
    router: Arc<Router>,
    pool: BackendPool,
    proxy: Proxy,
    middleware: MiddlewareChain,
    plugins: Arc<PluginManager>,
    retry: RetryPolicy,
    circuits: Arc<CircuitBreakerRegistry>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl Gateway {
    pub fn new(
        router: Arc<Router>,
        pool: BackendPool,
        proxy: Proxy,
        retry: RetryPolicy,
        circuits: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            router,
            pool,
            proxy,
            middleware: MiddlewareChain::new(),
            plugins: Arc::new(PluginManager::new()),
            retry,
            circuits,
            metrics: None,
        }
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_plugins(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Runs one request through the pipeline and returns the response to
    /// write.
    pub async fn handle(&self, mut request: GatewayRequest) -> GatewayResponse {
        if let Some(metrics) = &self.metrics {
            metrics.active_connections.add(1.0, &[]);
        }

        let response = self.run_pipeline(&mut request).await;
        let response = self.finalize(&request, response);

        if let Some(metrics) = &self.metrics {
            let latency = request.received_at.elapsed().as_secs_f64();
            let status = response.status.to_string();
            metrics.requests_total.inc_labeled(&[
                ("method", request.method.as_str()),
                ("status", status.as_str()),
            ]);
            metrics
                .request_duration_seconds
                .observe(latency, &[("method", request.method.as_str())]);
            metrics.active_connections.sub(1.0, &[]);
            self.plugins
                .on_metrics(&request, &response, latency * 1000.0);
        }

        response
    }

    /// Everything up to (but not including) response post-processing.
    async fn run_pipeline(&self, request: &mut GatewayRequest) -> GatewayResponse {
        if let Some(response) = self.plugins.pre_request(request) {
            return response;
        }

        if let Some(response) = self.middleware.process_request(request) {
            return response;
        }

        // Route resolution; distinguishes 405 from 404.
        let (route, params) = match self.router.match_route(&request.path, &request.method) {
            Some(matched) => matched,
            None => {
                let error = if self.router.path_known(&request.path) {
                    GatewayError::MethodNotAllowed {
                        method: request.method.clone(),
                        path: request.path.clone(),
                    }
                } else {
                    GatewayError::NoRoute {
                        path: request.path.clone(),
                    }
                };
                return self.error_response(request, error);
            }
        };
        request.params = params;
        self.plugins.on_route_match(request, &route);

        let client_ip = extract_client_ip(request);
        let backend = match self
            .pool
            .select_from(&route.targets, Some(client_ip.as_str()))
        {
            Some(backend) => backend,
            None => return self.error_response(request, GatewayError::NoBackend),
        };
        let backend_address = backend.address();
        self.plugins.on_backend_select(request, &backend_address);

        if !self.pool.connect(&backend) {
            return self.error_response(request, GatewayError::NoBackend);
        }

        let scheme = route
            .metadata
            .get("scheme")
            .and_then(|v| v.as_str())
            .unwrap_or("http");
        let upstream_path = route.upstream_path(&request.path);
        let target_url = build_target_url(scheme, &backend_address, &upstream_path, request);
        debug!("Forwarding {} {} -> {}", request.method, request.path, target_url);

        let circuit = self.circuits.get_or_create(&backend_address);
        let call_result = circuit
            .call(async {
                let outcome = self
                    .retry
                    .execute(|| async {
                        let result = self
                            .proxy
                            .forward(
                                &request.method,
                                &target_url,
                                &request.headers,
                                &request.body,
                                Some(client_ip.as_str()),
                            )
                            .await;
                        if result.success {
                            Ok(result)
                        } else {
                            let kind = if result.timed_out {
                                "upstream_timeout"
                            } else {
                                "upstream_error"
                            };
                            let message = result
                                .error
                                .clone()
                                .unwrap_or_else(|| "upstream failure".to_string());
                            Err(RetryError::new(kind, message))
                        }
                    })
                    .await;

                match (outcome.value, outcome.error) {
                    (Some(result), _) => Ok(result),
                    (None, Some(error)) => Err((error.kind, error.message)),
                    (None, None) => Err(("upstream_error", "no attempts made".to_string())),
                }
            })
            .await;

        let response = match call_result {
            Ok(result) => {
                let latency_ms = result.latency_ms;
                self.pool.record_request(
                    &backend,
                    result.status_code < 500,
                    latency_ms,
                    request.body.len() as u64,
                    result.body.len() as u64,
                );
                if let Some(metrics) = &self.metrics {
                    let status = result.status_code.to_string();
                    metrics.backend_requests_total.inc_labeled(&[
                        ("backend", backend_address.as_str()),
                        ("status", status.as_str()),
                    ]);
                    metrics
                        .backend_latency_seconds
                        .observe(latency_ms / 1000.0, &[("backend", backend_address.as_str())]);
                }

                let mut response = GatewayResponse::new(result.status_code);
                for (name, value) in result.headers.iter() {
                    if HOP_BY_HOP_HEADERS.contains(name.to_ascii_lowercase().as_str()) {
                        continue;
                    }
                    response.headers.append(name, value);
                }
                response.body = result.body;
                response
            }
            Err(error) => {
                self.pool.record_request(&backend, false, 0.0, request.body.len() as u64, 0);
                let gateway_error = match error {
                    CircuitBreakerError::CircuitOpen(name)
                    | CircuitBreakerError::HalfOpenSaturated(name) => {
                        GatewayError::CircuitOpen { target: name }
                    }
                    CircuitBreakerError::OperationFailed((kind, message)) => {
                        if kind == "upstream_timeout" {
                            GatewayError::UpstreamTimeout {
                                timeout_ms: self.proxy.config().read_timeout.as_millis() as u64,
                            }
                        } else {
                            GatewayError::Upstream(message)
                        }
                    }
                };
                self.error_response(request, gateway_error)
            }
        };

        self.pool.disconnect(&backend);
        response
    }

    /// Maps an error to a response, giving `on_error` plugins the first
    /// word.
    fn error_response(&self, request: &GatewayRequest, error: GatewayError) -> GatewayResponse {
        if let Some(metrics) = &self.metrics {
            metrics.errors_total.inc_labeled(&[("type", error.kind())]);
        }
        if let Some(response) = self.plugins.on_error(request, &error) {
            return response;
        }
        error.to_response()
    }

    /// Response post-processing shared by every outcome.
    fn finalize(&self, request: &GatewayRequest, response: GatewayResponse) -> GatewayResponse {
        let mut response = match self.plugins.post_request(request, &response) {
            Some(replacement) => replacement,
            None => response,
        };
        self.middleware.process_response(request, &mut response);
        self.plugins.pre_response(request, &mut response);
        self.plugins.post_response(request, &response);
        response
    }
}

/// Builds the upstream URL for a request, preserving the raw query string.
fn build_target_url(
    scheme: &str,
    backend_address: &str,
    path: &str,
    request: &GatewayRequest,
) -> String {
    let mut url = format!("{}://{}{}", scheme, backend_address, path);
    if !request.query.is_empty() {
        let query: Vec<String> = request
            .query
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backend::{Backend, HealthStatus};
    use crate::models::route::Route;
    use crate::services::circuit_breaker::CircuitBreakerConfig;
    use crate::services::load_balancer::BalancerKind;
    use crate::services::proxy::ProxyConfig;
    use crate::services::retry::RetryConfig;
    use std::time::Duration;

    fn test_gateway(targets: Vec<String>) -> Gateway {
        let router = Arc::new(Router::new());
        router.add(
            Route::new("/api/:id")
                .unwrap()
                .with_methods(["GET"])
                .with_targets(targets.clone()),
        );

        let pool = BackendPool::new(BalancerKind::RoundRobin.create());
        for target in &targets {
            let (host, port) = crate::utils::path::split_address(target);
            let backend = Backend::new(host, port);
            backend.set_health_status(HealthStatus::Healthy);
            pool.add_backend(backend);
        }

        Gateway::new(
            router,
            pool,
            Proxy::new(ProxyConfig {
                connect_timeout: Duration::from_millis(200),
                read_timeout: Duration::from_millis(200),
                max_retries: 0,
                ..Default::default()
            }),
            RetryPolicy::new(RetryConfig {
                max_retries: 0,
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            }),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        )
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let gateway = test_gateway(vec!["127.0.0.1:1".to_string()]);
        let response = gateway.handle(GatewayRequest::new("GET", "/nope")).await;
        assert_eq!(response.status, 404);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("/nope"));
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let gateway = test_gateway(vec!["127.0.0.1:1".to_string()]);
        let response = gateway.handle(GatewayRequest::new("POST", "/api/42")).await;
        assert_eq!(response.status, 405);
    }

    #[tokio::test]
    async fn no_backend_is_502() {
        let gateway = test_gateway(vec![]);
        let response = gateway.handle(GatewayRequest::new("GET", "/api/42")).await;
        assert_eq!(response.status, 502);
    }

    #[tokio::test]
    async fn unreachable_backend_is_upstream_error() {
        // Port 1 refuses connections.
        let gateway = test_gateway(vec!["127.0.0.1:1".to_string()]);
        let response = gateway.handle(GatewayRequest::new("GET", "/api/42")).await;
        assert_eq!(response.status, 502);
    }

    #[test]
    fn target_url_preserves_query() {
        let mut request = GatewayRequest::new("GET", "/search");
        request.query.push(("q".into(), "rust".into()));
        request.query.push(("q".into(), "gateway".into()));
        request.query.push(("flag".into(), "".into()));

        let url = build_target_url("http", "b:8080", "/search", &request);
        assert_eq!(url, "http://b:8080/search?q=rust&q=gateway&flag");
    }
}
