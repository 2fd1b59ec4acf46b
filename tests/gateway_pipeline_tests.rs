//! End-to-end pipeline tests: routing, middleware, protection layers and
//! forwarding against a minimal local upstream.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tollgate_rs::middleware::cors::CorsMiddleware;
use tollgate_rs::middleware::rate_limit::RateLimitMiddleware;
use tollgate_rs::middleware::MiddlewareChain;
use tollgate_rs::models::backend::{Backend, HealthStatus};
use tollgate_rs::models::http::GatewayRequest;
use tollgate_rs::models::route::Route;
use tollgate_rs::models::settings::CorsSettings;
use tollgate_rs::plugins::{PluginManager, RequestIdPlugin};
use tollgate_rs::routing::router::Router;
use tollgate_rs::services::backend_pool::BackendPool;
use tollgate_rs::services::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use tollgate_rs::services::gateway::Gateway;
use tollgate_rs::services::load_balancer::BalancerKind;
use tollgate_rs::services::proxy::{Proxy, ProxyConfig};
use tollgate_rs::services::rate_limit::RateLimiter;
use tollgate_rs::services::retry::{RetryConfig, RetryPolicy};
use tollgate_rs::utils::path::split_address;

/// One-shot upstream: captures the request head and replies 200.
async fn spawn_upstream(body: &'static str) -> (String, tokio::sync::oneshot::Receiver<String>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut head = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        head.extend_from_slice(&buf[..n]);
                        if head.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = tx.send(String::from_utf8_lossy(&head).to_string());
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(reply.as_bytes()).await;
        }
    });

    (address, rx)
}

struct GatewayBuilder {
    routes: Vec<Route>,
    backends: Vec<String>,
    middleware: MiddlewareChain,
    plugins: Arc<PluginManager>,
}

impl GatewayBuilder {
    fn new() -> Self {
        Self {
            routes: Vec::new(),
            backends: Vec::new(),
            middleware: MiddlewareChain::new(),
            plugins: Arc::new(PluginManager::new()),
        }
    }

    fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    fn backend(mut self, address: &str) -> Self {
        self.backends.push(address.to_string());
        self
    }

    fn middleware(mut self, chain: MiddlewareChain) -> Self {
        self.middleware = chain;
        self
    }

    fn build(self) -> Gateway {
        let router = Arc::new(Router::new());
        for route in self.routes {
            router.add(route);
        }

        let pool = BackendPool::new(BalancerKind::RoundRobin.create());
        for address in &self.backends {
            let (host, port) = split_address(address);
            let backend = Backend::new(host, port);
            backend.set_health_status(HealthStatus::Healthy);
            pool.add_backend(backend);
        }

        Gateway::new(
            router,
            pool,
            Proxy::new(ProxyConfig {
                connect_timeout: Duration::from_secs(2),
                read_timeout: Duration::from_secs(2),
                max_retries: 0,
                ..Default::default()
            }),
            RetryPolicy::new(RetryConfig {
                max_retries: 1,
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            }),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        )
        .with_middleware(self.middleware)
        .with_plugins(self.plugins)
    }
}

/// Route `/api/:id` to a live upstream: the upstream sees `GET /42` with
/// the client IP in `X-Forwarded-For`; the client gets the upstream body.
#[tokio::test]
async fn basic_route_and_forward() {
    let (address, head_rx) = spawn_upstream("hello from upstream").await;

    let gateway = GatewayBuilder::new()
        .route(
            Route::new("/api/:id")
                .unwrap()
                .with_methods(["GET"])
                .with_targets([address.clone()]),
        )
        .backend(&address)
        .build();

    let mut request = GatewayRequest::new("GET", "/api/42");
    request.remote_addr = "198.51.100.7".to_string();

    let response = gateway.handle(request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"hello from upstream");

    let head = head_rx.await.unwrap();
    assert!(head.starts_with("GET /42 HTTP/1.1"), "head: {}", head);
    assert!(head.to_ascii_lowercase().contains("x-forwarded-for: 198.51.100.7"));
}

/// Limiter rps=1 (burst 2): two requests pass, the third is denied with
/// 429, `Retry-After: 1` and `X-RateLimit-Remaining: 0`, and no backend is
/// contacted for it.
#[tokio::test]
async fn rate_limit_denial() {
    let (address, _head_rx) = spawn_upstream("ok").await;

    let limiter = Arc::new(RateLimiter::new(1.0)); // capacity 2·rps = 2
    let mut chain = MiddlewareChain::new();
    chain.add(Arc::new(RateLimitMiddleware::new(limiter)));

    let gateway = GatewayBuilder::new()
        .route(Route::new("/api/*").unwrap().with_targets([address.clone()]))
        .backend(&address)
        .middleware(chain)
        .build();

    let request = || {
        let mut req = GatewayRequest::new("GET", "/api/x");
        req.remote_addr = "203.0.113.5".to_string();
        req
    };

    // Two requests spend the burst; only the first hits our one-shot
    // upstream, the second gets an upstream error - either way the limiter
    // admitted both.
    let first = gateway.handle(request()).await;
    assert_ne!(first.status, 429);
    let second = gateway.handle(request()).await;
    assert_ne!(second.status, 429);

    let third = gateway.handle(request()).await;
    assert_eq!(third.status, 429);
    assert_eq!(third.headers.get("Retry-After"), Some("1"));
    assert_eq!(third.headers.get("X-RateLimit-Remaining"), Some("0"));
}

/// CORS preflight is answered by the middleware: 204 with the
/// `Access-Control-*` headers and no backend contact.
#[tokio::test]
async fn cors_preflight_short_circuits() {
    let mut chain = MiddlewareChain::new();
    chain.add(Arc::new(CorsMiddleware::new(CorsSettings {
        allow_origins: vec!["https://a.example".to_string()],
        ..Default::default()
    })));

    // No backends at all: a forwarded request would 502.
    let gateway = GatewayBuilder::new()
        .route(Route::new("/x").unwrap())
        .middleware(chain)
        .build();

    let mut request = GatewayRequest::new("OPTIONS", "/x");
    request.set_header("Origin", "https://a.example");
    request.set_header("Access-Control-Request-Method", "PUT");

    let response = gateway.handle(request).await;
    assert_eq!(response.status, 204);
    assert_eq!(
        response.headers.get("Access-Control-Allow-Origin"),
        Some("https://a.example")
    );
    assert!(response.headers.get("Access-Control-Allow-Methods").unwrap().contains("PUT"));
    assert!(response.headers.contains("Access-Control-Allow-Headers"));
    assert!(response.headers.contains("Access-Control-Max-Age"));
}

#[tokio::test]
async fn unmatched_method_and_path() {
    let gateway = GatewayBuilder::new()
        .route(Route::new("/only-get").unwrap().with_methods(["GET"]))
        .build();

    let response = gateway.handle(GatewayRequest::new("POST", "/only-get")).await;
    assert_eq!(response.status, 405);

    let response = gateway.handle(GatewayRequest::new("GET", "/missing")).await;
    assert_eq!(response.status, 404);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn request_id_plugin_round_trips() {
    let (address, head_rx) = spawn_upstream("ok").await;

    let plugins = Arc::new(PluginManager::new());
    plugins.register(Arc::new(RequestIdPlugin));

    let router = Arc::new(Router::new());
    router.add(Route::new("/api/*").unwrap().with_targets([address.clone()]));
    let pool = BackendPool::new(BalancerKind::RoundRobin.create());
    let (host, port) = split_address(&address);
    let backend = Backend::new(host, port);
    backend.set_health_status(HealthStatus::Healthy);
    pool.add_backend(backend);

    let gateway = Gateway::new(
        router,
        pool,
        Proxy::new(ProxyConfig::default()),
        RetryPolicy::new(RetryConfig::default()),
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
    )
    .with_plugins(plugins);

    let response = gateway.handle(GatewayRequest::new("GET", "/api/x")).await;
    assert_eq!(response.status, 200);
    // The id is stamped on the response and was sent upstream.
    let id = response.headers.get("X-Request-ID").unwrap().to_string();
    assert_eq!(id.len(), 36);
    let head = head_rx.await.unwrap().to_ascii_lowercase();
    assert!(head.contains("x-request-id:"));
}

#[tokio::test]
async fn circuit_opens_after_repeated_upstream_failures() {
    // Dead backend, aggressive breaker via a custom registry.
    let router = Arc::new(Router::new());
    router.add(Route::new("/api/*").unwrap().with_targets(["127.0.0.1:1".to_string()]));

    let pool = BackendPool::new(BalancerKind::RoundRobin.create());
    let backend = Backend::new("127.0.0.1", 1);
    backend.set_health_status(HealthStatus::Healthy);
    pool.add_backend(backend);

    let circuits = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        success_threshold: 1,
        timeout: Duration::from_secs(60),
        half_open_max_calls: 1,
        exclude_kinds: Vec::new(),
    }));

    let gateway = Gateway::new(
        router,
        pool,
        Proxy::new(ProxyConfig {
            connect_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_millis(100),
            max_retries: 0,
            ..Default::default()
        }),
        RetryPolicy::new(RetryConfig {
            max_retries: 0,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        }),
        circuits,
    );

    // Two failures trip the breaker.
    assert_eq!(gateway.handle(GatewayRequest::new("GET", "/api/x")).await.status, 502);
    assert_eq!(gateway.handle(GatewayRequest::new("GET", "/api/x")).await.status, 502);

    // Now the circuit rejects before dialing: 503.
    let response = gateway.handle(GatewayRequest::new("GET", "/api/x")).await;
    assert_eq!(response.status, 503);
}
