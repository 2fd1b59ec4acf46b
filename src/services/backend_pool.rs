//! Backend pool management.
//!
//! The pool owns the backend records and wires them to the load balancer
//! and the health checker. Selection filters the pool down to *available*
//! backends (Active ∧ Healthy ∧ spare capacity), snapshots them, and
//! delegates the pick to the configured policy.
//!
//! The health checker publishes transitions through a callback; the pool
//! subscribes with a weak back-reference so neither side keeps the other
//! alive.

use crate::models::backend::{Backend, BackendSnapshot, BackendStatus, HealthStatus};
use crate::services::health_check::HealthChecker;
use crate::services::load_balancer::BalancerPolicy;
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// Listener invoked synchronously on administrative status transitions.
pub type StatusListener = Box<dyn Fn(&str, BackendStatus) + Send + Sync>;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

struct PoolInner {
    config: PoolConfig,
    backends: RwLock<HashMap<String, Arc<Backend>>>,
    balancer: Box<dyn BalancerPolicy>,
    listeners: RwLock<Vec<StatusListener>>,
}

/// Backend server pool.
///
/// Cheap to clone (shared interior); the gateway, admin surface and the
/// health subscription all hold the same pool.
#[derive(Clone)]
pub struct BackendPool {
    inner: Arc<PoolInner>,
    health_checker: Option<Arc<HealthChecker>>,
}

impl BackendPool {
    pub fn new(balancer: Box<dyn BalancerPolicy>) -> Self {
        Self::with_config(PoolConfig::default(), balancer)
    }

    pub fn with_config(config: PoolConfig, balancer: Box<dyn BalancerPolicy>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                backends: RwLock::new(HashMap::new()),
                balancer,
                listeners: RwLock::new(Vec::new()),
            }),
            health_checker: None,
        }
    }

    /// Attaches a health checker: existing and future backends are
    /// registered as probe targets, and health transitions propagate back
    /// into backend health status.
    ///
    /// The subscription captures only a `Weak` pool reference, breaking the
    /// pool → checker → pool ownership cycle.
    pub fn attach_health_checker(&mut self, checker: Arc<HealthChecker>) {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        checker.on_status_change(Box::new(move |address, status| {
            if let Some(inner) = weak.upgrade() {
                let backends = inner.backends.read().unwrap();
                if let Some(backend) = backends.get(address) {
                    backend.set_health_status(status);
                    info!("Backend {} health -> {:?}", address, status);
                }
            }
        }));

        for backend in self.inner.backends.read().unwrap().values() {
            checker.add_target(&backend.address());
        }

        self.health_checker = Some(checker);
    }

    /// Registers a backend. Idempotent on address: re-adding an existing
    /// address leaves the live record untouched.
    pub fn add_backend(&self, backend: Backend) -> &Self {
        let address = backend.address();
        {
            let mut backends = self.inner.backends.write().unwrap();
            if backends.contains_key(&address) {
                warn!("Backend {} already registered; ignoring", address);
                return self;
            }
            backends.insert(address.clone(), Arc::new(backend));
        }

        if let Some(checker) = &self.health_checker {
            checker.add_target(&address);
        }

        info!("Added backend: {}", address);
        self
    }

    /// Unregisters a backend. In-flight connections to it are not touched.
    pub fn remove_backend(&self, address: &str) -> bool {
        let removed = self.inner.backends.write().unwrap().remove(address).is_some();
        if removed {
            if let Some(checker) = &self.health_checker {
                checker.remove_target(address);
            }
            info!("Removed backend: {}", address);
        }
        removed
    }

    pub fn get(&self, address: &str) -> Option<Arc<Backend>> {
        self.inner.backends.read().unwrap().get(address).cloned()
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.inner.backends.read().unwrap().values().cloned().collect()
    }

    /// Snapshots of all currently available backends, in stable
    /// (address-sorted) order so index-based policies see a consistent set.
    pub fn available_snapshots(&self) -> Vec<BackendSnapshot> {
        let backends = self.inner.backends.read().unwrap();
        let mut available: Vec<BackendSnapshot> = backends
            .values()
            .filter(|b| b.is_available())
            .map(|b| b.snapshot())
            .collect();
        available.sort_by(|a, b| a.address.cmp(&b.address));
        available
    }

    /// Selects an available backend through the balancer policy.
    pub fn select(&self, client_ip: Option<&str>) -> Option<Arc<Backend>> {
        let snapshots = self.available_snapshots();
        let chosen = self.inner.balancer.select(&snapshots, client_ip)?;
        self.get(&chosen.address)
    }

    /// Like [`select`](Self::select), but restricted to the given target
    /// addresses (a route's target list).
    pub fn select_from(&self, targets: &[String], client_ip: Option<&str>) -> Option<Arc<Backend>> {
        if targets.is_empty() {
            return self.select(client_ip);
        }
        let snapshots: Vec<BackendSnapshot> = self
            .available_snapshots()
            .into_iter()
            .filter(|s| targets.iter().any(|t| t == &s.address))
            .collect();
        let chosen = self.inner.balancer.select(&snapshots, client_ip)?;
        self.get(&chosen.address)
    }

    /// Sets the administrative status, notifying listeners on change.
    pub fn set_status(&self, address: &str, status: BackendStatus) -> bool {
        let backend = match self.get(address) {
            Some(backend) => backend,
            None => return false,
        };

        let old = backend.status();
        if old == status {
            return true;
        }
        backend.set_status(status);

        let listeners = self.inner.listeners.read().unwrap();
        for listener in listeners.iter() {
            // A failing listener must not block the pool.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(address, status)
            }));
            if result.is_err() {
                error!("Status listener panicked for backend {}", address);
            }
        }
        true
    }

    /// Stops selecting the backend while letting in-flight requests finish.
    pub fn drain(&self, address: &str) -> bool {
        self.set_status(address, BackendStatus::Draining)
    }

    pub fn enable(&self, address: &str) -> bool {
        self.set_status(address, BackendStatus::Active)
    }

    pub fn disable(&self, address: &str) -> bool {
        self.set_status(address, BackendStatus::Disabled)
    }

    /// Reserves a connection slot on the backend; fails when saturated.
    pub fn connect(&self, backend: &Backend) -> bool {
        backend.try_connect()
    }

    /// Releases a connection slot.
    pub fn disconnect(&self, backend: &Backend) {
        backend.disconnect();
    }

    /// Records the outcome of a forwarded request on the backend.
    pub fn record_request(
        &self,
        backend: &Backend,
        success: bool,
        latency_ms: f64,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        backend.record_request(success, latency_ms, bytes_in, bytes_out);
    }

    /// Registers an administrative status listener.
    pub fn on_status_change(&self, listener: StatusListener) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    pub fn len(&self) -> usize {
        self.inner.backends.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregated pool statistics for the admin surface.
    pub fn stats(&self) -> serde_json::Value {
        let backends = self.inner.backends.read().unwrap();
        let total = backends.len();
        let available = backends.values().filter(|b| b.is_available()).count();
        let connections: u64 = backends
            .values()
            .map(|b| b.active_connections() as u64)
            .sum();
        let requests: u64 = backends.values().map(|b| b.total_requests()).sum();
        let errors: u64 = backends.values().map(|b| b.total_errors()).sum();

        json!({
            "name": self.inner.config.name,
            "balancer": self.inner.balancer.name(),
            "total_backends": total,
            "available_backends": available,
            "total_connections": connections,
            "total_requests": requests,
            "total_errors": errors,
            "error_rate": errors as f64 / requests.max(1) as f64,
            "backends": backends.iter().map(|(addr, b)| {
                (addr.clone(), json!({
                    "status": format!("{:?}", b.status()),
                    "health": format!("{:?}", b.health_status()),
                    "connections": b.active_connections(),
                    "requests": b.total_requests(),
                    "errors": b.total_errors(),
                    "avg_latency_ms": b.avg_latency_ms(),
                }))
            }).collect::<serde_json::Map<String, serde_json::Value>>(),
        })
    }
}
