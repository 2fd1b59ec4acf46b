//! Configuration schema for the gateway.
//!
//! Deserialized from a JSON or YAML file and then overridden by `GATEWAY_`
//! environment variables (see [`crate::config::settings`]). Every section is
//! optional with sensible defaults so a minimal config only lists routes and
//! backends.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: u32,
    pub server: ServerSettings,
    pub routes: Vec<RouteSettings>,
    pub backends: Vec<BackendSettings>,
    /// Balancer policy name: round_robin, weighted_round_robin,
    /// least_connections, weighted_least_connections, random,
    /// weighted_random, ip_hash, least_response_time, resource_based.
    pub balancer: String,
    pub rate_limit: Option<RateLimitSettings>,
    pub cors: Option<CorsSettings>,
    pub jwt: Option<JwtSettings>,
    pub health: HealthSettings,
    pub proxy: ProxySettings,
    pub metrics: MetricsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSettings::default(),
            routes: Vec::new(),
            backends: Vec::new(),
            balancer: "round_robin".to_string(),
            rate_limit: None,
            cors: None,
            jwt: None,
            health: HealthSettings::default(),
            proxy: ProxySettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Settings {
    /// Validates the whole tree, collecting every problem instead of
    /// stopping at the first.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.server.port == 0 {
            report.error("server.port must be non-zero");
        }
        if self.server.workers == 0 {
            report.warn("server.workers is 0; the runtime default will be used");
        }

        if self.routes.is_empty() {
            report.warn("no routes configured; only the admin surface will respond");
        }
        for route in &self.routes {
            if !route.pattern.starts_with('/') {
                report.error(format!("route pattern '{}' must start with '/'", route.pattern));
            }
            if route.targets.is_empty() {
                report.error(format!("route '{}' has no targets", route.pattern));
            }
        }

        for backend in &self.backends {
            if backend.host.is_empty() {
                report.error("backend host must not be empty");
            }
            if backend.port == 0 {
                report.error(format!("backend '{}' port must be non-zero", backend.host));
            }
            if backend.weight == 0 {
                report.warn(format!(
                    "backend '{}:{}' weight 0 coerced to 1",
                    backend.host, backend.port
                ));
            }
        }

        if let Some(rl) = &self.rate_limit {
            if rl.requests_per_second <= 0.0 {
                report.error("rate_limit.requests_per_second must be positive");
            }
            if rl.bucket_ttl_secs == 0 {
                report.error("rate_limit.bucket_ttl_secs must be positive");
            }
        }

        if let Some(jwt) = &self.jwt {
            if jwt.secret.is_empty() {
                report.error("jwt.secret must not be empty");
            }
        }

        if self.health.interval_secs == 0 {
            report.error("health.interval_secs must be positive");
        }
        if self.health.healthy_threshold == 0 || self.health.unhealthy_threshold == 0 {
            report.error("health thresholds must be positive");
        }

        if self.proxy.connect_timeout_secs == 0 {
            report.error("proxy.connect_timeout_secs must be positive");
        }

        report
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Seconds allowed for in-flight requests during shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
            drain_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    pub pattern: String,
    pub targets: Vec<String>,
    pub methods: Vec<String>,
    pub name: String,
    pub priority: i32,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            targets: Vec::new(),
            methods: vec!["*".to_string()],
            name: String::new(),
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            weight: 1,
            max_connections: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub burst_size: u32,
    /// Buckets idle longer than this are evicted.
    pub bucket_ttl_secs: u64,
    pub include_headers: bool,
    pub skip_paths: Vec<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 20,
            bucket_ttl_secs: 300,
            include_headers: true,
            skip_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u32,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_headers: ["Content-Type", "Authorization", "X-Requested-With"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: 86400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    pub secret: String,
    pub algorithm: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_secs: u64,
    pub required_claims: Vec<String>,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            algorithm: "HS256".to_string(),
            issuer: None,
            audience: None,
            leeway_secs: 0,
            required_claims: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    /// "tcp", "http" or "https".
    pub check_type: String,
    pub http_path: String,
    pub expected_codes: Vec<u16>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            check_type: "tcp".to_string(),
            http_path: "/health".to_string(),
            expected_codes: vec![200, 201, 204],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_on_status: Vec<u16>,
    pub preserve_host: bool,
    pub add_forwarded_headers: bool,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_retries: 3,
            retry_on_status: vec![502, 503, 504],
            preserve_host: true,
            add_forwarded_headers: true,
            pool_max_idle_per_host: 32,
            pool_idle_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Outcome of configuration validation: hard errors and advisory warnings.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}
