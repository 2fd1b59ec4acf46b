//! Circuit breaker for upstream failure protection.
//!
//! One breaker per named target runs the Closed → Open → HalfOpen state
//! machine: consecutive failures trip the circuit, an open circuit rejects
//! calls until its timeout elapses, and a half-open circuit admits a
//! bounded number of concurrent probe calls. Every state read first runs
//! the timeout check so a stale Open is transparently promoted to HalfOpen.
//!
//! Circuits are indexed by a [`CircuitBreakerRegistry`]; a process-wide
//! registry is available for call sites without an injected one. Tests
//! construct their own registries to stay isolated.

use log::{error, info, warn};
use once_cell::sync::Lazy;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failing fast; calls are rejected until the timeout elapses.
    Open,
    /// Probing recovery with a bounded number of trial calls.
    HalfOpen,
}

/// Error classification for exclusion from failure counting.
///
/// Kinds listed in [`CircuitBreakerConfig::exclude_kinds`] do not count
/// toward opening the circuit (e.g. client-side 4xx mapped upstream
/// errors).
pub type ErrorKind = &'static str;

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that trip the circuit.
    pub failure_threshold: u32,
    /// Cumulative successes in HalfOpen that close the circuit.
    pub success_threshold: u32,
    /// Minimum time an Open circuit stays open before probing.
    pub timeout: Duration,
    /// Concurrent calls admitted in HalfOpen.
    pub half_open_max_calls: u32,
    /// Error kinds that do not count as failures.
    pub exclude_kinds: Vec<ErrorKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            exclude_kinds: Vec::new(),
        }
    }
}

/// Cumulative call statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit rejected the call without executing it.
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),
    /// The half-open probe quota is exhausted.
    #[error("Circuit breaker '{0}' half-open limit reached")]
    HalfOpenSaturated(String),
    /// The wrapped operation ran and failed.
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

pub type StateListener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure_time: Option<Instant>,
    stats: CircuitStats,
}

/// Per-target circuit breaker.
///
/// # Examples
///
/// ```
/// use tollgate_rs::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
///
/// # async fn example() {
/// let breaker = CircuitBreaker::new("users-api", CircuitBreakerConfig::default());
/// let result: Result<&str, _> = breaker
///     .call(async { Ok::<_, (&'static str, String)>("ok") })
///     .await;
/// assert!(result.is_ok());
/// # }
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    listeners: RwLock<Vec<StateListener>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure_time: None,
                stats: CircuitStats::default(),
            }),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, after promoting a timed-out Open to HalfOpen.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock().unwrap();
        self.check_state_timeout(&mut state);
        state.state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Executes `operation` under breaker protection.
    ///
    /// The error type is a pair `(kind, message)`; `kind` is matched
    /// against the configured exclusions.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: ErrorClass,
    {
        self.admit()?;

        match operation.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                if !self.config.exclude_kinds.contains(&error.kind()) {
                    self.on_failure();
                } else {
                    // Excluded kinds still release the half-open slot path
                    // through success accounting of the attempt count only.
                    self.on_excluded_failure();
                }
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    /// Admission decision; increments stats and the half-open counter.
    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut state = self.state.lock().unwrap();
        self.check_state_timeout(&mut state);
        state.stats.total_calls += 1;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                state.stats.rejected_calls += 1;
                Err(CircuitBreakerError::CircuitOpen(self.name.clone()))
            }
            CircuitState::HalfOpen => {
                if state.half_open_calls >= self.config.half_open_max_calls {
                    state.stats.rejected_calls += 1;
                    Err(CircuitBreakerError::HalfOpenSaturated(self.name.clone()))
                } else {
                    state.half_open_calls += 1;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.stats.successful_calls += 1;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            _ => {
                state.failure_count = 0;
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.stats.failed_calls += 1;
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                // One failed probe re-opens the circuit.
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_excluded_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.stats.failed_calls += 1;
    }

    /// Promotes a stale Open to HalfOpen once the timeout has elapsed.
    fn check_state_timeout(&self, state: &mut BreakerState) {
        if state.state == CircuitState::Open {
            if let Some(last_failure) = state.last_failure_time {
                if last_failure.elapsed() >= self.config.timeout {
                    self.transition(state, CircuitState::HalfOpen);
                }
            }
        }
    }

    fn transition(&self, state: &mut BreakerState, new_state: CircuitState) {
        let old_state = state.state;
        if old_state == new_state {
            return;
        }
        state.state = new_state;
        state.stats.state_changes += 1;

        match new_state {
            CircuitState::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
                info!("Circuit breaker '{}' closed - target recovered", self.name);
            }
            CircuitState::HalfOpen => {
                state.success_count = 0;
                state.half_open_calls = 0;
                info!("Circuit breaker '{}' half-open - probing recovery", self.name);
            }
            CircuitState::Open => {
                warn!("Circuit breaker '{}' opened", self.name);
            }
        }

        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(old_state, new_state)
            }));
            if outcome.is_err() {
                error!("Circuit listener panicked for '{}'", self.name);
            }
        }
    }

    /// Registers a transition listener. Listener failures never affect
    /// breaker state.
    pub fn on_state_change(&self, listener: StateListener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Forces the circuit back to Closed.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        self.transition(&mut state, CircuitState::Closed);
    }

    /// Forces the circuit to Open, stamping the failure time.
    pub fn force_open(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_failure_time = Some(Instant::now());
        self.transition(&mut state, CircuitState::Open);
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().unwrap().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.state.lock().unwrap().success_count
    }

    /// Statistics snapshot plus current state.
    pub fn stats(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        json!({
            "name": self.name,
            "state": format!("{:?}", state.state),
            "failure_count": state.failure_count,
            "success_count": state.success_count,
            "stats": {
                "total_calls": state.stats.total_calls,
                "successful_calls": state.stats.successful_calls,
                "failed_calls": state.stats.failed_calls,
                "rejected_calls": state.stats.rejected_calls,
                "state_changes": state.stats.state_changes,
            },
        })
    }
}

/// Error classification hook for [`CircuitBreaker::call`].
pub trait ErrorClass {
    fn kind(&self) -> ErrorKind;
}

impl ErrorClass for (ErrorKind, String) {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

impl ErrorClass for String {
    fn kind(&self) -> ErrorKind {
        "error"
    }
}

impl ErrorClass for &str {
    fn kind(&self) -> ErrorKind {
        "error"
    }
}

/// Registry indexing circuits by target name.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Fetches the breaker for `name`, creating it with the registry's
    /// default configuration on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap();
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, self.default_config.clone()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().unwrap().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.breakers.write().unwrap().remove(name).is_some()
    }

    pub fn all_stats(&self) -> serde_json::Value {
        let breakers = self.breakers.read().unwrap();
        breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.stats()))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into()
    }
}

/// Process-wide registry for call sites without an injected one.
static GLOBAL_REGISTRY: Lazy<CircuitBreakerRegistry> =
    Lazy::new(|| CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));

/// Fetches a breaker from the process-wide registry.
pub fn global_circuit_breaker(name: &str) -> Arc<CircuitBreaker> {
    GLOBAL_REGISTRY.get_or_create(name)
}
