//! Gateway-level health aggregation and Kubernetes-style probes.
//!
//! [`HealthRegistry`] holds named checks (backend pool reachability, memory,
//! custom user checks) and aggregates them into the `/health` summary:
//! a critical unhealthy check makes the gateway Unhealthy; non-critical
//! failures degrade it.
//!
//! The three probes gate different behaviors: readiness gates traffic,
//! liveness signals that the process should be restarted on sustained
//! failure, and startup must pass (within its failure budget) before the
//! other two take effect. Each probe composes user checks with its own
//! hysteresis counters.

use crate::models::backend::HealthStatus;
use log::warn;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// Result of one named health check.
#[derive(Debug, Clone)]
pub struct HealthResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub latency_ms: f64,
}

impl HealthResult {
    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: message.into(),
            latency_ms: 0.0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: message.into(),
            latency_ms: 0.0,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: message.into(),
            latency_ms: 0.0,
        }
    }
}

pub type CheckFn = Box<dyn Fn() -> HealthResult + Send + Sync>;

struct RegisteredCheck {
    check: CheckFn,
    critical: bool,
}

/// Registry of named gateway health checks with status aggregation.
#[derive(Default)]
pub struct HealthRegistry {
    checks: RwLock<HashMap<String, RegisteredCheck>>,
    results: RwLock<HashMap<String, HealthResult>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a check. Critical checks force overall Unhealthy when
    /// they fail; non-critical failures only degrade.
    pub fn add_check(&self, name: impl Into<String>, critical: bool, check: CheckFn) -> &Self {
        self.checks
            .write()
            .unwrap()
            .insert(name.into(), RegisteredCheck { check, critical });
        self
    }

    pub fn remove_check(&self, name: &str) -> bool {
        let removed = self.checks.write().unwrap().remove(name).is_some();
        self.results.write().unwrap().remove(name);
        removed
    }

    /// Runs a single check and caches its result.
    pub fn check(&self, name: &str) -> HealthResult {
        let start = Instant::now();
        let result = {
            let checks = self.checks.read().unwrap();
            match checks.get(name) {
                Some(registered) => {
                    let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        (registered.check)()
                    }));
                    match run {
                        Ok(mut result) => {
                            result.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                            result
                        }
                        Err(_) => {
                            warn!("Health check '{}' panicked", name);
                            HealthResult::unhealthy(name, "check panicked")
                        }
                    }
                }
                None => HealthResult {
                    name: name.to_string(),
                    status: HealthStatus::Unknown,
                    message: "Check not found".to_string(),
                    latency_ms: 0.0,
                },
            }
        };

        self.results
            .write()
            .unwrap()
            .insert(name.to_string(), result.clone());
        result
    }

    /// Runs every registered check.
    pub fn check_all(&self) -> Vec<HealthResult> {
        let names: Vec<String> = self.checks.read().unwrap().keys().cloned().collect();
        names.iter().map(|name| self.check(name)).collect()
    }

    /// Aggregated status over cached results.
    pub fn overall_status(&self) -> HealthStatus {
        let results = self.results.read().unwrap();
        if results.is_empty() {
            return HealthStatus::Unknown;
        }

        let checks = self.checks.read().unwrap();
        let mut impaired = false;
        for (name, result) in results.iter() {
            match result.status {
                HealthStatus::Unhealthy => {
                    let critical = checks.get(name).map(|c| c.critical).unwrap_or(true);
                    if critical {
                        return HealthStatus::Unhealthy;
                    }
                    impaired = true;
                }
                HealthStatus::Degraded => impaired = true,
                _ => {}
            }
        }

        if impaired {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// The `/health` summary body.
    pub fn summary(&self) -> serde_json::Value {
        let status = self.overall_status();
        let results = self.results.read().unwrap();

        let mut healthy = 0;
        let mut unhealthy = 0;
        let mut degraded = 0;
        for result in results.values() {
            match result.status {
                HealthStatus::Healthy => healthy += 1,
                HealthStatus::Unhealthy => unhealthy += 1,
                HealthStatus::Degraded => degraded += 1,
                HealthStatus::Unknown => {}
            }
        }

        json!({
            "status": format!("{:?}", status).to_lowercase(),
            "checks": {
                "total": self.checks.read().unwrap().len(),
                "healthy": healthy,
                "unhealthy": unhealthy,
                "degraded": degraded,
            },
            "details": results.iter().map(|(name, r)| {
                (name.clone(), json!({
                    "status": format!("{:?}", r.status).to_lowercase(),
                    "message": r.message,
                    "latency_ms": r.latency_ms,
                }))
            }).collect::<serde_json::Map<String, serde_json::Value>>(),
        })
    }
}

/// Probe timing and threshold configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub initial_delay: Duration,
    pub period: Duration,
    pub timeout: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            success_threshold: 1,
            failure_threshold: 3,
        }
    }
}

struct ProbeState {
    consecutive_successes: u32,
    consecutive_failures: u32,
    last_check: Option<Instant>,
}

/// Readiness probe: gates traffic acceptance.
///
/// Becomes ready after `success_threshold` consecutive passing rounds and
/// not-ready after `failure_threshold` consecutive failing rounds. With no
/// checks registered the probe reports ready.
pub struct ReadinessProbe {
    config: ProbeConfig,
    checks: RwLock<Vec<CheckFn>>,
    ready: std::sync::atomic::AtomicBool,
    state: Mutex<ProbeState>,
}

impl ReadinessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            checks: RwLock::new(Vec::new()),
            ready: std::sync::atomic::AtomicBool::new(false),
            state: Mutex::new(ProbeState {
                consecutive_successes: 0,
                consecutive_failures: 0,
                last_check: None,
            }),
        }
    }

    pub fn add_check(&self, check: CheckFn) -> &Self {
        self.checks.write().unwrap().push(check);
        self
    }

    /// Runs one probe round.
    pub fn check(&self) -> bool {
        let all_healthy = run_checks(&self.checks, |status| status == HealthStatus::Healthy);

        let mut state = self.state.lock().unwrap();
        state.last_check = Some(Instant::now());

        if all_healthy {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
            if state.consecutive_successes >= self.config.success_threshold {
                self.ready.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
            if state.consecutive_failures >= self.config.failure_threshold {
                self.ready.store(false, std::sync::atomic::Ordering::SeqCst);
            }
        }

        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn status(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        json!({
            "ready": self.is_ready(),
            "consecutive_successes": state.consecutive_successes,
            "consecutive_failures": state.consecutive_failures,
        })
    }
}

/// Liveness probe: signals whether the process should keep running.
///
/// Starts alive; only `failure_threshold` consecutive failing rounds mark
/// the process dead. Only `Unhealthy` results count as failures - a
/// degraded process is still alive.
pub struct LivenessProbe {
    config: ProbeConfig,
    checks: RwLock<Vec<CheckFn>>,
    alive: std::sync::atomic::AtomicBool,
    state: Mutex<ProbeState>,
}

impl LivenessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            checks: RwLock::new(Vec::new()),
            alive: std::sync::atomic::AtomicBool::new(true),
            state: Mutex::new(ProbeState {
                consecutive_successes: 0,
                consecutive_failures: 0,
                last_check: None,
            }),
        }
    }

    pub fn add_check(&self, check: CheckFn) -> &Self {
        self.checks.write().unwrap().push(check);
        self
    }

    pub fn check(&self) -> bool {
        let all_alive = run_checks(&self.checks, |status| status != HealthStatus::Unhealthy);

        let mut state = self.state.lock().unwrap();
        state.last_check = Some(Instant::now());

        if all_alive {
            state.consecutive_failures = 0;
            self.alive.store(true, std::sync::atomic::Ordering::SeqCst);
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.config.failure_threshold {
                self.alive.store(false, std::sync::atomic::Ordering::SeqCst);
            }
        }

        self.is_alive()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn status(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        json!({
            "alive": self.is_alive(),
            "consecutive_failures": state.consecutive_failures,
        })
    }
}

/// Startup probe: single-shot gate with its own failure budget.
///
/// Once started it stays started; after `failure_threshold` attempts
/// without success the probe gives up and reports failure permanently.
pub struct StartupProbe {
    checks: RwLock<Vec<CheckFn>>,
    started: std::sync::atomic::AtomicBool,
    attempts: Mutex<u32>,
    max_attempts: u32,
}

impl StartupProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            checks: RwLock::new(Vec::new()),
            started: std::sync::atomic::AtomicBool::new(false),
            attempts: Mutex::new(0),
            max_attempts: config.failure_threshold,
        }
    }

    pub fn add_check(&self, check: CheckFn) -> &Self {
        self.checks.write().unwrap().push(check);
        self
    }

    pub fn check(&self) -> bool {
        if self.is_started() {
            return true;
        }

        let mut attempts = self.attempts.lock().unwrap();
        if *attempts >= self.max_attempts {
            return false;
        }
        *attempts += 1;

        if run_checks(&self.checks, |status| status == HealthStatus::Healthy) {
            self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        self.is_started()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn status(&self) -> serde_json::Value {
        json!({
            "started": self.is_started(),
            "attempts": *self.attempts.lock().unwrap(),
            "max_attempts": self.max_attempts,
        })
    }
}

/// Runs all checks; with no checks registered the round passes.
fn run_checks(checks: &RwLock<Vec<CheckFn>>, pass: impl Fn(HealthStatus) -> bool) -> bool {
    let checks = checks.read().unwrap();
    for check in checks.iter() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| check()));
        match result {
            Ok(result) if pass(result.status) => continue,
            _ => return false,
        }
    }
    true
}
