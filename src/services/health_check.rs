//! Backend health checking with hysteresis.
//!
//! Each monitored address carries its own check configuration, consecutive
//! healthy/unhealthy counters and a bounded result history. Status only
//! transitions after the configured number of *consecutive* same-signal
//! observations, so a target oscillating faster than the threshold window
//! keeps its current status. Listeners are notified exactly once per
//! transition; listener ordering is per-target.
//!
//! The run loop performs at most one outstanding probe per target: probes
//! for one tick run sequentially before the loop sleeps.

pub use crate::models::backend::HealthStatus;
use crate::utils::path::split_address;
use log::{debug, error, info};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Probe transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    /// Open-then-close TCP connect within the timeout.
    Tcp,
    /// HTTP request; classification by status code.
    Http,
    /// HTTPS request; classification by status code.
    Https,
}

/// Per-target health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub check_type: CheckType,
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive healthy results required to become Healthy.
    pub healthy_threshold: u32,
    /// Consecutive non-healthy results required to become Unhealthy.
    pub unhealthy_threshold: u32,
    pub http_path: String,
    pub http_method: String,
    pub expected_codes: Vec<u16>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_type: CheckType::Tcp,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            http_path: "/health".to_string(),
            http_method: "GET".to_string(),
            expected_codes: vec![200, 201, 204],
        }
    }
}

/// Result of a single probe.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub latency_ms: f64,
    pub checked_at: Instant,
    pub message: String,
}

/// History ring bounds: keep at most 100 results, trimming to the last 50.
const HISTORY_MAX: usize = 100;
const HISTORY_KEEP: usize = 50;

pub type HealthListener = Box<dyn Fn(&str, HealthStatus) + Send + Sync>;

struct TargetState {
    config: HealthCheckConfig,
    status: HealthStatus,
    healthy_count: u32,
    unhealthy_count: u32,
    history: VecDeque<HealthCheckResult>,
}

/// Health checker for backend addresses.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tollgate_rs::services::health_check::{HealthChecker, HealthCheckConfig};
///
/// # async fn example() {
/// let checker = Arc::new(HealthChecker::new(HealthCheckConfig::default()));
/// checker.add_target("10.0.0.1:8080");
/// let result = checker.check("10.0.0.1:8080").await;
/// println!("{:?}: {}", result.status, result.message);
/// # }
/// ```
pub struct HealthChecker {
    default_config: HealthCheckConfig,
    targets: RwLock<HashMap<String, TargetState>>,
    listeners: RwLock<Vec<HealthListener>>,
    running: AtomicBool,
    http_client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(default_config: HealthCheckConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(default_config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            default_config,
            targets: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            http_client,
        }
    }

    /// Adds a monitoring target with the checker's default configuration.
    pub fn add_target(&self, address: &str) -> &Self {
        self.add_target_with(address, self.default_config.clone())
    }

    /// Adds a monitoring target with its own configuration.
    pub fn add_target_with(&self, address: &str, config: HealthCheckConfig) -> &Self {
        let mut targets = self.targets.write().unwrap();
        targets.entry(address.to_string()).or_insert_with(|| TargetState {
            config,
            status: HealthStatus::Unknown,
            healthy_count: 0,
            unhealthy_count: 0,
            history: VecDeque::new(),
        });
        self
    }

    pub fn remove_target(&self, address: &str) -> bool {
        self.targets.write().unwrap().remove(address).is_some()
    }

    /// Registers a status-change listener.
    pub fn on_status_change(&self, listener: HealthListener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Current aggregated status of a target.
    pub fn status(&self, address: &str) -> HealthStatus {
        self.targets
            .read()
            .unwrap()
            .get(address)
            .map(|t| t.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn all_statuses(&self) -> HashMap<String, HealthStatus> {
        self.targets
            .read()
            .unwrap()
            .iter()
            .map(|(addr, t)| (addr.clone(), t.status))
            .collect()
    }

    /// Recent probe history for a target, oldest first.
    pub fn history(&self, address: &str) -> Vec<HealthCheckResult> {
        self.targets
            .read()
            .unwrap()
            .get(address)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Probes a target once and folds the result into its status.
    pub async fn check(&self, address: &str) -> HealthCheckResult {
        let config = {
            let targets = self.targets.read().unwrap();
            match targets.get(address) {
                Some(target) => target.config.clone(),
                None => {
                    return HealthCheckResult {
                        status: HealthStatus::Unknown,
                        latency_ms: 0.0,
                        checked_at: Instant::now(),
                        message: "Target not found".to_string(),
                    }
                }
            }
        };

        let start = Instant::now();
        let (status, message) = match config.check_type {
            CheckType::Tcp => self.probe_tcp(address, &config).await,
            CheckType::Http => self.probe_http(address, &config, false).await,
            CheckType::Https => self.probe_http(address, &config, true).await,
        };

        let result = HealthCheckResult {
            status,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            checked_at: Instant::now(),
            message,
        };

        self.process_result(address, result.clone());
        result
    }

    async fn probe_tcp(
        &self,
        address: &str,
        config: &HealthCheckConfig,
    ) -> (HealthStatus, String) {
        let (host, port) = split_address(address);
        match tokio::time::timeout(
            config.timeout,
            tokio::net::TcpStream::connect((host.as_str(), port)),
        )
        .await
        {
            Ok(Ok(_stream)) => (HealthStatus::Healthy, "TCP connection successful".to_string()),
            Ok(Err(e)) => (HealthStatus::Unhealthy, format!("TCP check failed: {}", e)),
            Err(_) => (HealthStatus::Unhealthy, "Connection timeout".to_string()),
        }
    }

    async fn probe_http(
        &self,
        address: &str,
        config: &HealthCheckConfig,
        secure: bool,
    ) -> (HealthStatus, String) {
        let scheme = if secure { "https" } else { "http" };
        let url = format!("{}://{}{}", scheme, address, config.http_path);

        let method = reqwest::Method::from_bytes(config.http_method.as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let request = self
            .http_client
            .request(method, &url)
            .header("Connection", "close")
            .timeout(config.timeout);

        match request.send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                if config.expected_codes.contains(&code) {
                    (HealthStatus::Healthy, format!("HTTP {}", code))
                } else if (200..300).contains(&code) {
                    (HealthStatus::Degraded, format!("Unexpected status: {}", code))
                } else {
                    (HealthStatus::Unhealthy, format!("Unexpected status: {}", code))
                }
            }
            Err(e) => (HealthStatus::Unhealthy, format!("HTTP check failed: {}", e)),
        }
    }

    /// Applies hysteresis and fires listeners on transition.
    fn process_result(&self, address: &str, result: HealthCheckResult) {
        let transition = {
            let mut targets = self.targets.write().unwrap();
            let target = match targets.get_mut(address) {
                Some(target) => target,
                None => return,
            };

            target.history.push_back(result.clone());
            if target.history.len() > HISTORY_MAX {
                while target.history.len() > HISTORY_KEEP {
                    target.history.pop_front();
                }
            }

            let old_status = target.status;

            if result.status == HealthStatus::Healthy {
                target.healthy_count += 1;
                target.unhealthy_count = 0;
                if target.healthy_count >= target.config.healthy_threshold {
                    target.status = HealthStatus::Healthy;
                }
            } else {
                target.unhealthy_count += 1;
                target.healthy_count = 0;
                if target.unhealthy_count >= target.config.unhealthy_threshold {
                    target.status = HealthStatus::Unhealthy;
                }
            }

            if target.status != old_status {
                Some(target.status)
            } else {
                None
            }
        };

        if let Some(new_status) = transition {
            debug!("Health transition for {}: {:?}", address, new_status);
            let listeners = self.listeners.read().unwrap();
            for listener in listeners.iter() {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    listener(address, new_status)
                }));
                if outcome.is_err() {
                    error!("Health listener panicked for {}", address);
                }
            }
        }
    }

    /// Feeds a synthetic probe result through the hysteresis machinery.
    /// Used by tests and by adapters that probe out-of-band.
    pub fn record_result(&self, address: &str, status: HealthStatus, message: &str) {
        self.process_result(
            address,
            HealthCheckResult {
                status,
                latency_ms: 0.0,
                checked_at: Instant::now(),
                message: message.to_string(),
            },
        );
    }

    /// Periodic check loop. Runs until [`stop`](Self::stop).
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Health checker started (interval {:?})",
            self.default_config.interval
        );

        while self.running.load(Ordering::SeqCst) {
            let addresses: Vec<String> = {
                let targets = self.targets.read().unwrap();
                targets.keys().cloned().collect()
            };

            for address in addresses {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                self.check(&address).await;
            }

            tokio::time::sleep(self.default_config.interval).await;
        }

        info!("Health checker stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Summary counts by status.
    pub fn stats(&self) -> serde_json::Value {
        let targets = self.targets.read().unwrap();
        let mut healthy = 0;
        let mut unhealthy = 0;
        let mut unknown = 0;
        for target in targets.values() {
            match target.status {
                HealthStatus::Healthy => healthy += 1,
                HealthStatus::Unhealthy => unhealthy += 1,
                _ => unknown += 1,
            }
        }
        serde_json::json!({
            "targets": targets.len(),
            "healthy": healthy,
            "unhealthy": unhealthy,
            "unknown": unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn checker(healthy_threshold: u32, unhealthy_threshold: u32) -> HealthChecker {
        HealthChecker::new(HealthCheckConfig {
            healthy_threshold,
            unhealthy_threshold,
            ..Default::default()
        })
    }

    #[test]
    fn transitions_need_consecutive_results() {
        let checker = checker(2, 3);
        checker.add_target("a:80");

        checker.record_result("a:80", HealthStatus::Healthy, "ok");
        assert_eq!(checker.status("a:80"), HealthStatus::Unknown);
        checker.record_result("a:80", HealthStatus::Healthy, "ok");
        assert_eq!(checker.status("a:80"), HealthStatus::Healthy);

        // Two failures are not enough to flip with threshold 3.
        checker.record_result("a:80", HealthStatus::Unhealthy, "down");
        checker.record_result("a:80", HealthStatus::Unhealthy, "down");
        assert_eq!(checker.status("a:80"), HealthStatus::Healthy);
        checker.record_result("a:80", HealthStatus::Unhealthy, "down");
        assert_eq!(checker.status("a:80"), HealthStatus::Unhealthy);
    }

    #[test]
    fn oscillation_below_threshold_keeps_status() {
        let checker = checker(2, 3);
        checker.add_target("a:80");
        checker.record_result("a:80", HealthStatus::Healthy, "ok");
        checker.record_result("a:80", HealthStatus::Healthy, "ok");

        // up/down alternation never reaches 3 consecutive failures.
        for _ in 0..10 {
            checker.record_result("a:80", HealthStatus::Unhealthy, "blip");
            checker.record_result("a:80", HealthStatus::Healthy, "ok");
        }
        assert_eq!(checker.status("a:80"), HealthStatus::Healthy);
    }

    #[test]
    fn listener_fires_exactly_once_per_transition() {
        let checker = Arc::new(checker(1, 1));
        checker.add_target("a:80");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        checker.on_status_change(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        checker.record_result("a:80", HealthStatus::Healthy, "ok");
        checker.record_result("a:80", HealthStatus::Healthy, "ok"); // no transition
        checker.record_result("a:80", HealthStatus::Unhealthy, "down");
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn degraded_counts_toward_unhealthy() {
        let checker = checker(1, 2);
        checker.add_target("a:80");
        checker.record_result("a:80", HealthStatus::Degraded, "2xx not expected");
        checker.record_result("a:80", HealthStatus::Degraded, "2xx not expected");
        assert_eq!(checker.status("a:80"), HealthStatus::Unhealthy);
    }

    #[test]
    fn history_is_bounded() {
        let checker = checker(1, 1);
        checker.add_target("a:80");
        for _ in 0..150 {
            checker.record_result("a:80", HealthStatus::Healthy, "ok");
        }
        let history = checker.history("a:80");
        assert!(history.len() <= HISTORY_MAX);
        assert!(history.len() >= HISTORY_KEEP);
    }

    #[tokio::test]
    async fn tcp_probe_against_closed_port_is_unhealthy() {
        let checker = HealthChecker::new(HealthCheckConfig {
            timeout: Duration::from_millis(200),
            ..Default::default()
        });
        // Reserved port that nothing listens on.
        checker.add_target("127.0.0.1:1");
        let result = checker.check("127.0.0.1:1").await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn https_probe_fails_at_the_connection_not_the_scheme() {
        let checker = HealthChecker::new(HealthCheckConfig {
            check_type: CheckType::Https,
            timeout: Duration::from_millis(300),
            unhealthy_threshold: 1,
            ..Default::default()
        });
        checker.add_target("127.0.0.1:1");

        let result = checker.check("127.0.0.1:1").await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        // A TLS-capable client dies dialing the closed port; a client with
        // no TLS backend would instead report an unsupported scheme before
        // ever connecting.
        let message = result.message.to_ascii_lowercase();
        assert!(
            !message.contains("scheme") && !message.contains("builder"),
            "unexpected probe failure: {}",
            message
        );
    }

    #[tokio::test]
    async fn tcp_probe_against_listener_is_healthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let checker = HealthChecker::new(HealthCheckConfig::default());
        checker.add_target(&address);
        let result = checker.check(&address).await;
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[test]
    fn unknown_target_check_stats() {
        let checker = checker(1, 1);
        checker.add_target("a:80");
        checker.record_result("a:80", HealthStatus::Healthy, "ok");
        let stats = checker.stats();
        assert_eq!(stats["targets"], 1);
        assert_eq!(stats["healthy"], 1);
    }
}
