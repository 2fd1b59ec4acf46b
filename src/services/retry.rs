//! Retry policy with pluggable backoff.
//!
//! [`RetryPolicy::execute`] drives an async operation factory through up to
//! `max_retries` re-attempts, sleeping a backoff-strategy-derived delay
//! between attempts and classifying errors through configurable kind and
//! status-code predicates.
//!
//! Each policy owns its own RNG seeded from entropy, so jittered delays are
//! decorrelated across policies and processes instead of marching in
//! lockstep off a shared seed.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// Backoff delay strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// `initial` every time.
    Constant,
    /// `initial · attempt`.
    Linear,
    /// `initial · multiplier^(attempt-1)`.
    Exponential,
    /// Exponential plus `U(0, exp · jitter_factor)`.
    ExponentialJitter,
    /// `U(initial, min(last_delay · 3, max_delay))`.
    DecorrelatedJitter,
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    /// Error kinds eligible for retry; empty means every kind retries.
    pub retryable_kinds: Vec<&'static str>,
    /// Response status codes treated as retryable failures.
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: BackoffStrategy::ExponentialJitter,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.5,
            retryable_kinds: Vec::new(),
            retryable_status_codes: vec![429, 502, 503, 504],
        }
    }
}

/// A retryable failure as seen by the policy: an error kind tag plus a
/// message, or a status code for upstream responses retried by code.
#[derive(Debug, Clone)]
pub struct RetryError {
    pub kind: &'static str,
    pub message: String,
    pub status_code: Option<u16>,
}

impl RetryError {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(status_code: u16) -> Self {
        Self {
            kind: "status",
            message: format!("retryable status {}", status_code),
            status_code: Some(status_code),
        }
    }
}

/// Outcome of a retried execution.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<RetryError>,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// Sum of backoff delays slept.
    pub total_delay: Duration,
}

pub type RetryCallback = Box<dyn Fn(u32, Duration, &RetryError) + Send + Sync>;

/// Retry policy.
///
/// # Examples
///
/// ```
/// use tollgate_rs::services::retry::{RetryConfig, RetryError, RetryPolicy};
///
/// # async fn example() {
/// let policy = RetryPolicy::new(RetryConfig::default());
/// let outcome = policy
///     .execute(|| async { Ok::<_, RetryError>(42) })
///     .await;
/// assert!(outcome.success);
/// assert_eq!(outcome.attempts, 1);
/// # }
/// ```
pub struct RetryPolicy {
    config: RetryConfig,
    rng: Mutex<StdRng>,
    callbacks: Vec<RetryCallback>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            callbacks: Vec::new(),
        }
    }

    /// Registers a callback invoked before each backoff sleep with
    /// `(attempt, delay, error)`.
    pub fn on_retry(mut self, callback: RetryCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Runs `make_op` until it succeeds, exhausts `max_retries`, or fails
    /// non-retryably.
    pub async fn execute<F, Fut, T>(&self, make_op: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RetryError>>,
    {
        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;
        let mut last_delay = self.config.initial_delay;
        let mut last_error: Option<RetryError> = None;

        while attempts <= self.config.max_retries {
            match make_op().await {
                Ok(value) => {
                    return RetryOutcome {
                        success: true,
                        value: Some(value),
                        error: None,
                        attempts: attempts + 1,
                        total_delay,
                    };
                }
                Err(error) => {
                    attempts += 1;
                    let retryable = self.is_retryable(&error);
                    let out_of_budget = attempts > self.config.max_retries;
                    if !retryable || out_of_budget {
                        last_error = Some(error);
                        break;
                    }

                    let delay = self.delay_for(attempts, last_delay);
                    last_delay = delay;
                    total_delay += delay;

                    for callback in &self.callbacks {
                        callback(attempts, delay, &error);
                    }

                    debug!(
                        "Retry {}/{} after {:?}: {}",
                        attempts, self.config.max_retries, delay, error.message
                    );

                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        RetryOutcome {
            success: false,
            value: None,
            error: last_error,
            attempts,
            total_delay,
        }
    }

    /// Whether an error qualifies for another attempt.
    pub fn is_retryable(&self, error: &RetryError) -> bool {
        if let Some(code) = error.status_code {
            return self.config.retryable_status_codes.contains(&code);
        }
        self.config.retryable_kinds.is_empty()
            || self.config.retryable_kinds.contains(&error.kind)
    }

    /// Computes the backoff delay for `attempt` (1-based), capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32, last_delay: Duration) -> Duration {
        let initial = self.config.initial_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();

        let delay = match self.config.strategy {
            BackoffStrategy::Constant => initial,
            BackoffStrategy::Linear => initial * attempt as f64,
            BackoffStrategy::Exponential => {
                initial * self.config.multiplier.powi(attempt.saturating_sub(1) as i32)
            }
            BackoffStrategy::ExponentialJitter => {
                let base = initial * self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
                let jitter: f64 = self.rng.lock().unwrap().gen::<f64>();
                base + base * self.config.jitter_factor * jitter
            }
            BackoffStrategy::DecorrelatedJitter => {
                let upper = (last_delay.as_secs_f64() * 3.0).min(max).max(initial);
                if upper <= initial {
                    initial
                } else {
                    self.rng.lock().unwrap().gen_range(initial..=upper)
                }
            }
        };

        Duration::from_secs_f64(delay.min(max))
    }
}
