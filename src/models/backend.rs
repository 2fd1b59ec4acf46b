//! Backend server records and runtime counters.
//!
//! A [`Backend`] combines static configuration (address, weight, connection
//! cap) with runtime state split between an administrative status set by
//! operators and a health status driven by the health checker. Counters are
//! atomics so the request path can record traffic without taking the pool
//! lock; the EWMA latency sits behind its own lock because it is a float
//! read-modify-write.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Administrative backend status, controlled through the pool API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// Eligible for traffic.
    Active,
    /// Finishing in-flight requests; not selected for new ones.
    Draining,
    /// Held in reserve; not selected.
    Standby,
    /// Administratively removed from rotation.
    Disabled,
    /// Marked failed by an operator or automation.
    Failed,
}

/// Health status as observed by the health checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Responding, but not as expected (e.g. unexpected 2xx status).
    Degraded,
    /// Not yet probed.
    Unknown,
}

/// EWMA smoothing factor for latency: `l ← α·sample + (1−α)·l`.
const LATENCY_ALPHA: f64 = 0.1;

/// A backend server in the pool.
///
/// A backend is *available* iff it is administratively `Active`, its health
/// is `Healthy` and it has spare connection capacity. `total_requests` and
/// `total_errors` are monotone; `active_connections` never exceeds
/// `max_connections` (enforced by [`try_connect`](Self::try_connect)).
#[derive(Debug)]
pub struct Backend {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
    status: RwLock<BackendStatus>,
    health: RwLock<HealthStatus>,
    active_connections: AtomicU32,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    avg_latency_ms: RwLock<f64>,
    last_used: RwLock<Option<Instant>>,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1,
            max_connections: 1000,
            status: RwLock::new(BackendStatus::Active),
            health: RwLock::new(HealthStatus::Unknown),
            active_connections: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            avg_latency_ms: RwLock::new(0.0),
            last_used: RwLock::new(None),
        }
    }

    /// Weight must be at least 1; zero is coerced.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// `host:port` identity used as the pool key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.read().unwrap()
    }

    pub fn set_status(&self, status: BackendStatus) {
        *self.status.write().unwrap() = status;
    }

    pub fn health_status(&self) -> HealthStatus {
        *self.health.read().unwrap()
    }

    pub fn set_health_status(&self, health: HealthStatus) {
        *self.health.write().unwrap() = health;
    }

    /// Active ∧ Healthy ∧ below the connection cap.
    pub fn is_available(&self) -> bool {
        self.status() == BackendStatus::Active
            && self.health_status() == HealthStatus::Healthy
            && self.active_connections() < self.max_connections
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        *self.avg_latency_ms.read().unwrap()
    }

    /// Remaining connection capacity.
    pub fn available_capacity(&self) -> u32 {
        self.max_connections
            .saturating_sub(self.active_connections())
    }

    /// Reserves a connection slot. Fails when the backend is saturated.
    ///
    /// Uses a CAS loop so concurrent callers can never push the count past
    /// `max_connections`.
    pub fn try_connect(&self) -> bool {
        let mut current = self.active_connections.load(Ordering::Acquire);
        loop {
            if current >= self.max_connections {
                return false;
            }
            match self.active_connections.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    *self.last_used.write().unwrap() = Some(Instant::now());
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Releases a connection slot, saturating at zero.
    pub fn disconnect(&self) {
        let mut current = self.active_connections.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return;
            }
            match self.active_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Records the outcome of one forwarded request.
    pub fn record_request(&self, success: bool, latency_ms: f64, bytes_in: u64, bytes_out: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        if !success {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut avg = self.avg_latency_ms.write().unwrap();
        *avg = LATENCY_ALPHA * latency_ms + (1.0 - LATENCY_ALPHA) * *avg;
    }

    /// Immutable view of the backend for balancer policies.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            address: self.address(),
            host: self.host.clone(),
            port: self.port,
            weight: self.weight,
            max_connections: self.max_connections,
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            total_errors: self.total_errors(),
            avg_latency_ms: self.avg_latency_ms(),
        }
    }
}

/// Point-in-time copy of a backend's selection-relevant state.
///
/// Balancer policies operate on snapshots so selection never holds the pool
/// lock while computing.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSnapshot {
    pub address: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
    pub active_connections: u32,
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_latency_ms: f64,
}

impl BackendSnapshot {
    pub fn available_capacity(&self) -> u32 {
        self.max_connections.saturating_sub(self.active_connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_is_unknown_and_unavailable() {
        let backend = Backend::new("10.0.0.1", 8080);
        assert_eq!(backend.health_status(), HealthStatus::Unknown);
        assert!(!backend.is_available());
    }

    #[test]
    fn available_requires_active_healthy_and_capacity() {
        let backend = Backend::new("10.0.0.1", 8080).with_max_connections(1);
        backend.set_health_status(HealthStatus::Healthy);
        assert!(backend.is_available());

        assert!(backend.try_connect());
        assert!(!backend.is_available());

        backend.disconnect();
        assert!(backend.is_available());

        backend.set_status(BackendStatus::Draining);
        assert!(!backend.is_available());
    }

    #[test]
    fn try_connect_respects_cap() {
        let backend = Backend::new("10.0.0.1", 8080).with_max_connections(2);
        assert!(backend.try_connect());
        assert!(backend.try_connect());
        assert!(!backend.try_connect());
        assert_eq!(backend.active_connections(), 2);
    }

    #[test]
    fn disconnect_saturates_at_zero() {
        let backend = Backend::new("10.0.0.1", 8080);
        backend.disconnect();
        assert_eq!(backend.active_connections(), 0);
    }

    #[test]
    fn counters_are_monotone() {
        let backend = Backend::new("10.0.0.1", 8080);
        backend.record_request(true, 10.0, 100, 200);
        backend.record_request(false, 30.0, 50, 0);
        assert_eq!(backend.total_requests(), 2);
        assert_eq!(backend.total_errors(), 1);
        assert_eq!(backend.bytes_in(), 150);
        assert_eq!(backend.bytes_out(), 200);
    }

    #[test]
    fn ewma_latency_converges() {
        let backend = Backend::new("10.0.0.1", 8080);
        backend.record_request(true, 100.0, 0, 0);
        // First sample from zero: 0.1 * 100
        assert!((backend.avg_latency_ms() - 10.0).abs() < 1e-9);
        backend.record_request(true, 100.0, 0, 0);
        assert!((backend.avg_latency_ms() - 19.0).abs() < 1e-9);
    }

    #[test]
    fn weight_is_at_least_one() {
        let backend = Backend::new("10.0.0.1", 8080).with_weight(0);
        assert_eq!(backend.weight, 1);
    }
}
