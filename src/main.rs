//! Tollgate API Gateway server.
//!
//! Binary entry point: loads and validates configuration, wires the
//! gateway (router, pool, balancer, health checker, limiter, middleware,
//! plugins), starts the background tasks and serves HTTP until shutdown.

use tollgate_rs::config::settings::load_settings;
use tollgate_rs::logs::logger::configure_logger;
use tollgate_rs::middleware::auth::AuthMiddleware;
use tollgate_rs::middleware::cors::CorsMiddleware;
use tollgate_rs::middleware::logging::{LoggingConfig, LoggingMiddleware};
use tollgate_rs::middleware::rate_limit::RateLimitMiddleware;
use tollgate_rs::middleware::MiddlewareChain;
use tollgate_rs::models::backend::Backend;
use tollgate_rs::models::route::Route;
use tollgate_rs::models::settings::Settings;
use tollgate_rs::plugins::{PluginManager, RequestIdPlugin};
use tollgate_rs::routes::health::HealthState;
use tollgate_rs::routes::{health, http, metrics};
use tollgate_rs::routing::router::Router;
use tollgate_rs::security::jwt::{JwtAuth, JwtConfig};
use tollgate_rs::services::backend_pool::BackendPool;
use tollgate_rs::services::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use tollgate_rs::services::gateway::Gateway;
use tollgate_rs::services::health_check::{CheckType, HealthCheckConfig, HealthChecker};
use tollgate_rs::services::load_balancer::BalancerKind;
use tollgate_rs::services::metrics::{GatewayMetrics, MetricsCollector};
use tollgate_rs::services::probes::{
    HealthRegistry, HealthResult, LivenessProbe, ProbeConfig, ReadinessProbe,
};
use tollgate_rs::services::proxy::{Proxy, ProxyConfig};
use tollgate_rs::services::rate_limit::{
    spawn_eviction_task, RateLimiter, RateLimiterConfig,
};
use tollgate_rs::services::retry::{RetryConfig, RetryPolicy};

use actix_web::{web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

fn build_router(config: &Settings) -> Arc<Router> {
    let router = Arc::new(Router::new());
    for route in &config.routes {
        match Route::new(&route.pattern) {
            Ok(compiled) => {
                router.add(
                    compiled
                        .with_targets(route.targets.clone())
                        .with_methods(route.methods.clone())
                        .with_name(route.name.clone())
                        .with_priority(route.priority),
                );
            }
            Err(e) => error!("Skipping route '{}': {}", route.pattern, e),
        }
    }
    router
}

fn build_pool(config: &Settings) -> BackendPool {
    let kind = BalancerKind::parse(&config.balancer).unwrap_or_else(|| {
        error!("Unknown balancer '{}'; using round_robin", config.balancer);
        BalancerKind::RoundRobin
    });

    let pool = BackendPool::new(kind.create());
    for backend in &config.backends {
        pool.add_backend(
            Backend::new(backend.host.clone(), backend.port)
                .with_weight(backend.weight)
                .with_max_connections(backend.max_connections),
        );
    }
    pool
}

fn health_check_config(config: &Settings) -> HealthCheckConfig {
    HealthCheckConfig {
        check_type: match config.health.check_type.as_str() {
            "http" => CheckType::Http,
            "https" => CheckType::Https,
            _ => CheckType::Tcp,
        },
        interval: Duration::from_secs(config.health.interval_secs),
        timeout: Duration::from_secs(config.health.timeout_secs),
        healthy_threshold: config.health.healthy_threshold,
        unhealthy_threshold: config.health.unhealthy_threshold,
        http_path: config.health.http_path.clone(),
        http_method: "GET".to_string(),
        expected_codes: config.health.expected_codes.clone(),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config = load_settings().expect("Failed to load settings");
    info!("Starting tollgate-rs API Gateway v{}", env!("CARGO_PKG_VERSION"));

    let validation = config.validate();
    if !validation.is_valid() {
        error!("Configuration validation failed:");
        for problem in &validation.errors {
            error!("  - {}", problem);
        }
        std::process::exit(1);
    }
    for warning in &validation.warnings {
        info!("Config warning: {}", warning);
    }

    let router = build_router(&config);
    let mut pool = build_pool(&config);

    // Backend health checking.
    if config.health.enabled && !config.backends.is_empty() {
        let checker = Arc::new(HealthChecker::new(health_check_config(&config)));
        pool.attach_health_checker(checker.clone());
        let _ = tokio::spawn(checker.run());
        info!("Health checker enabled every {}s", config.health.interval_secs);
    } else {
        // Without active checking, trust configured backends.
        for backend in pool.backends() {
            backend.set_health_status(tollgate_rs::models::backend::HealthStatus::Healthy);
        }
    }

    // Middleware chain: logging first, CORS, then rate limiting.
    let mut chain = MiddlewareChain::new();
    chain.add(Arc::new(LoggingMiddleware::new(LoggingConfig {
        log_query: true,
        skip_paths: vec!["/health".into(), "/ready".into(), "/live".into()],
        ..Default::default()
    })));
    if let Some(cors) = config.cors.clone() {
        chain.add(Arc::new(CorsMiddleware::new(cors)));
        info!("CORS middleware enabled");
    }
    if let Some(jwt) = config.jwt.clone() {
        let algorithm = match jwt.algorithm.as_str() {
            "HS384" => jsonwebtoken::Algorithm::HS384,
            "HS512" => jsonwebtoken::Algorithm::HS512,
            _ => jsonwebtoken::Algorithm::HS256,
        };
        let mut jwt_config = JwtConfig::new(jwt.secret)
            .with_algorithm(algorithm)
            .with_leeway(jwt.leeway_secs)
            .with_required_claims(jwt.required_claims);
        if let Some(issuer) = jwt.issuer {
            jwt_config = jwt_config.with_issuer(issuer);
        }
        if let Some(audience) = jwt.audience {
            jwt_config = jwt_config.with_audience(audience);
        }
        chain.add(Arc::new(
            AuthMiddleware::new(Arc::new(JwtAuth::new(jwt_config))).with_skip_paths(vec![
                "/health".into(),
                "/ready".into(),
                "/live".into(),
                config.metrics.path.clone(),
            ]),
        ));
        info!("JWT authentication enabled");
    }
    if let Some(rate_limit) = config.rate_limit.clone() {
        let limiter = Arc::new(RateLimiter::with_config(RateLimiterConfig {
            requests_per_second: rate_limit.requests_per_second,
            bucket_ttl: Duration::from_secs(rate_limit.bucket_ttl_secs),
            ..Default::default()
        }));
        let _ = spawn_eviction_task(limiter.clone());
        chain.add(Arc::new(
            RateLimitMiddleware::new(limiter)
                .with_headers(rate_limit.include_headers)
                .with_skip_paths(rate_limit.skip_paths.clone()),
        ));
        info!(
            "Rate limiting enabled at {} req/s",
            rate_limit.requests_per_second
        );
    }

    let plugins = Arc::new(PluginManager::new());
    plugins.register(Arc::new(RequestIdPlugin));

    let proxy = Proxy::new(ProxyConfig {
        connect_timeout: Duration::from_secs(config.proxy.connect_timeout_secs),
        read_timeout: Duration::from_secs(config.proxy.read_timeout_secs),
        max_retries: config.proxy.max_retries,
        retry_on_status: config.proxy.retry_on_status.clone(),
        preserve_host: config.proxy.preserve_host,
        add_forwarded_headers: config.proxy.add_forwarded_headers,
        pool_max_idle_per_host: config.proxy.pool_max_idle_per_host,
        pool_idle_timeout: Duration::from_secs(config.proxy.pool_idle_timeout_secs),
    });

    let collector = Arc::new(MetricsCollector::default());
    let gateway_metrics = Arc::new(GatewayMetrics::register(&collector));

    let circuits = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let gateway = Arc::new(
        Gateway::new(
            router,
            pool.clone(),
            proxy,
            RetryPolicy::new(RetryConfig::default()),
            circuits,
        )
        .with_middleware(chain)
        .with_plugins(plugins.clone())
        .with_metrics(gateway_metrics),
    );

    // Gateway-level health: the pool must have at least one available
    // backend when backends are configured at all.
    let registry = Arc::new(HealthRegistry::new());
    {
        let pool = pool.clone();
        registry.add_check(
            "backend_pool",
            true,
            Box::new(move || {
                let stats = pool.stats();
                let total = stats["total_backends"].as_u64().unwrap_or(0);
                let available = stats["available_backends"].as_u64().unwrap_or(0);
                if total == 0 || available > 0 {
                    HealthResult::healthy(
                        "backend_pool",
                        format!("{}/{} backends available", available, total),
                    )
                } else {
                    HealthResult::unhealthy("backend_pool", "no available backends")
                }
            }),
        );
    }
    let health_state = web::Data::new(HealthState {
        registry,
        readiness: Arc::new(ReadinessProbe::new(ProbeConfig::default())),
        liveness: Arc::new(LivenessProbe::new(ProbeConfig::default())),
    });

    plugins.startup();

    let host = config.server.host.clone();
    let port = config.server.port;
    let workers = config.server.workers.max(1);
    let metrics_path = config.metrics.path.clone();
    let metrics_enabled = config.metrics.enabled;

    info!("Listening on {}:{} with {} workers", host, port, workers);

    let server = {
        let gateway = gateway.clone();
        let collector = collector.clone();
        HttpServer::new(move || {
            let mut app = App::new()
                .app_data(web::Data::new(gateway.clone()))
                .app_data(health_state.clone())
                .configure(health::configure_health);
            if metrics_enabled {
                let path = metrics_path.clone();
                app = app
                    .app_data(web::Data::new(collector.clone()))
                    .configure(|cfg| metrics::configure_metrics(cfg, &path));
            }
            app.configure(http::configure_proxy)
        })
        .workers(workers)
        .shutdown_timeout(config.server.drain_timeout_secs)
        .bind((host.as_str(), port))?
        .run()
    };

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => error!("Server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping server...");
        }
    }

    plugins.shutdown();
    Ok(())
}
