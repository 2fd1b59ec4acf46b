//! Rate limiting: algorithms and the keyed limiter registry.
//!
//! Five interchangeable algorithms implement the [`Algorithm`] trait. Every
//! bucket carries its own mutex so concurrent callers on the same key are
//! serialized without a global lock; the registry itself uses a read/write
//! lock with the common path (existing bucket) taking only the read side.
//!
//! All time arithmetic uses the monotonic clock.

use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A rate-limiting algorithm instance for one key.
///
/// Implementations are internally locked; `allow` may be called from many
/// tasks at once.
pub trait Algorithm: Send + Sync {
    /// Consumes one unit of quota if available. Returns whether the request
    /// is admitted.
    fn allow(&self) -> bool;

    /// Resets the algorithm to its initial state.
    fn reset(&self);

    /// Best-effort remaining quota.
    fn remaining(&self) -> u32;

    /// The nominal ceiling of the algorithm (capacity or max requests).
    fn capacity(&self) -> u32;

    /// Seconds until one unit of quota is restored.
    fn reset_after(&self) -> f64;
}

/// Token bucket: tokens refill continuously at `refill_rate`/s up to
/// `capacity`; each admission consumes one token.
///
/// Allows bursts up to the capacity while holding the long-run average at
/// the refill rate.
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    state: Mutex<TokenBucketState>,
}

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(TokenBucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut TokenBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        state.last_refill = now;
    }
}

impl Algorithm for TokenBucket {
    fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.tokens = self.capacity as f64;
        state.last_refill = Instant::now();
    }

    fn remaining(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.tokens as u32
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn reset_after(&self) -> f64 {
        if self.refill_rate > 0.0 {
            1.0 / self.refill_rate
        } else {
            f64::INFINITY
        }
    }
}

/// Leaky bucket: the level drains at `leak_rate`/s; an admission raises the
/// level by one and overflow is denied.
pub struct LeakyBucket {
    capacity: u32,
    leak_rate: f64,
    state: Mutex<LeakyBucketState>,
}

struct LeakyBucketState {
    level: f64,
    last_leak: Instant,
}

impl LeakyBucket {
    pub fn new(capacity: u32, leak_rate: f64) -> Self {
        Self {
            capacity,
            leak_rate,
            state: Mutex::new(LeakyBucketState {
                level: 0.0,
                last_leak: Instant::now(),
            }),
        }
    }

    fn leak(&self, state: &mut LeakyBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_leak).as_secs_f64();
        state.level = (state.level - elapsed * self.leak_rate).max(0.0);
        state.last_leak = now;
    }
}

impl Algorithm for LeakyBucket {
    fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.leak(&mut state);
        if state.level < self.capacity as f64 {
            state.level += 1.0;
            true
        } else {
            false
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.level = 0.0;
        state.last_leak = Instant::now();
    }

    fn remaining(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.leak(&mut state);
        (self.capacity as f64 - state.level).max(0.0) as u32
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn reset_after(&self) -> f64 {
        if self.leak_rate > 0.0 {
            1.0 / self.leak_rate
        } else {
            f64::INFINITY
        }
    }
}

/// Fixed window: a counter that resets every `window_size`. Simple, but can
/// admit up to `2·max_requests` across a window edge.
pub struct FixedWindow {
    window_size: Duration,
    max_requests: u32,
    state: Mutex<FixedWindowState>,
}

struct FixedWindowState {
    count: u32,
    window_start: Instant,
}

impl FixedWindow {
    pub fn new(window_size: Duration, max_requests: u32) -> Self {
        Self {
            window_size,
            max_requests,
            state: Mutex::new(FixedWindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }
}

impl Algorithm for FixedWindow {
    fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.window_size {
            state.count = 0;
            state.window_start = now;
        }
        if state.count < self.max_requests {
            state.count += 1;
            true
        } else {
            false
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.count = 0;
        state.window_start = Instant::now();
    }

    fn remaining(&self) -> u32 {
        let state = self.state.lock().unwrap();
        self.max_requests.saturating_sub(state.count)
    }

    fn capacity(&self) -> u32 {
        self.max_requests
    }

    fn reset_after(&self) -> f64 {
        self.window_size.as_secs_f64()
    }
}

/// Sliding window (counter): a bounded deque of admission timestamps;
/// entries older than the window are evicted before each decision.
///
/// Invariant: at any instant, admissions within the trailing window never
/// exceed `max_requests`.
pub struct SlidingWindow {
    window_size: Duration,
    max_requests: u32,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(window_size: Duration, max_requests: u32) -> Self {
        Self {
            window_size,
            max_requests,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
        }
    }
}

impl Algorithm for SlidingWindow {
    fn allow(&self) -> bool {
        let mut timestamps = self.timestamps.lock().unwrap();
        let now = Instant::now();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= self.window_size {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() < self.max_requests as usize {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    fn reset(&self) {
        self.timestamps.lock().unwrap().clear();
    }

    fn remaining(&self) -> u32 {
        let timestamps = self.timestamps.lock().unwrap();
        self.max_requests.saturating_sub(timestamps.len() as u32)
    }

    fn capacity(&self) -> u32 {
        self.max_requests
    }

    fn reset_after(&self) -> f64 {
        self.window_size.as_secs_f64()
    }
}

/// Sliding window (log): same admission rule as [`SlidingWindow`] but kept
/// as a plain list, O(requests in window) memory. The most accurate variant
/// for low-volume keys.
pub struct SlidingWindowLog {
    window_size: Duration,
    max_requests: u32,
    timestamps: Mutex<Vec<Instant>>,
}

impl SlidingWindowLog {
    pub fn new(window_size: Duration, max_requests: u32) -> Self {
        Self {
            window_size,
            max_requests,
            timestamps: Mutex::new(Vec::new()),
        }
    }
}

impl Algorithm for SlidingWindowLog {
    fn allow(&self) -> bool {
        let mut timestamps = self.timestamps.lock().unwrap();
        let now = Instant::now();
        timestamps.retain(|ts| now.duration_since(*ts) < self.window_size);
        if timestamps.len() < self.max_requests as usize {
            timestamps.push(now);
            true
        } else {
            false
        }
    }

    fn reset(&self) {
        self.timestamps.lock().unwrap().clear();
    }

    fn remaining(&self) -> u32 {
        let timestamps = self.timestamps.lock().unwrap();
        self.max_requests.saturating_sub(timestamps.len() as u32)
    }

    fn capacity(&self) -> u32 {
        self.max_requests
    }

    fn reset_after(&self) -> f64 {
        self.window_size.as_secs_f64()
    }
}

/// Limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub key_prefix: String,
    /// Buckets idle longer than this are evicted by the background sweep.
    pub bucket_ttl: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            key_prefix: "rl:".to_string(),
            bucket_ttl: Duration::from_secs(300),
        }
    }
}

/// Outcome of one limiter check, carrying everything needed to build the
/// quota response headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until quota is restored.
    pub reset_after: f64,
    /// Seconds the client should wait before retrying; zero when allowed.
    pub retry_after: f64,
}

impl RateLimitResult {
    /// Quota headers: `X-RateLimit-Limit`, `-Remaining`, `-Reset` (unix
    /// seconds), and `Retry-After` on denial.
    pub fn headers(&self) -> Vec<(String, String)> {
        let reset_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            + self.reset_after.ceil() as u64;

        let mut headers = vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), self.remaining.to_string()),
            ("X-RateLimit-Reset".to_string(), reset_at.to_string()),
        ];
        if !self.allowed {
            headers.push((
                "Retry-After".to_string(),
                (self.retry_after.ceil() as u64).max(1).to_string(),
            ));
        }
        headers
    }
}

struct BucketEntry {
    algorithm: Arc<dyn Algorithm>,
    last_seen: Instant,
}

/// Factory for the algorithm backing new keys.
pub type AlgorithmFactory = Box<dyn Fn() -> Arc<dyn Algorithm> + Send + Sync>;

/// Keyed rate limiter.
///
/// Buckets are created lazily per key and evicted after an idle TTL so the
/// registry stays bounded. The default algorithm is a token bucket with
/// capacity `2·rps` and refill `rps`.
///
/// # Examples
///
/// ```
/// use tollgate_rs::services::rate_limit::RateLimiter;
///
/// let limiter = RateLimiter::new(10.0);
/// assert!(limiter.allow("10.0.0.1"));
/// ```
pub struct RateLimiter {
    config: RateLimiterConfig,
    factory: AlgorithmFactory,
    buckets: RwLock<AHashMap<String, BucketEntry>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        Self::with_config(RateLimiterConfig {
            requests_per_second,
            ..Default::default()
        })
    }

    pub fn with_config(config: RateLimiterConfig) -> Self {
        let rps = config.requests_per_second;
        Self {
            config,
            factory: Box::new(move || {
                Arc::new(TokenBucket::new((rps * 2.0).max(1.0) as u32, rps))
            }),
            buckets: RwLock::new(AHashMap::new()),
        }
    }

    /// Replaces the bucket factory, e.g. to use a sliding window per key.
    pub fn with_algorithm(mut self, factory: AlgorithmFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Checks and consumes quota for `key`.
    pub fn check(&self, key: &str) -> RateLimitResult {
        let full_key = format!("{}{}", self.config.key_prefix, key);

        let algorithm = {
            let buckets = self.buckets.read().unwrap();
            buckets.get(&full_key).map(|e| e.algorithm.clone())
        };

        let algorithm = match algorithm {
            Some(algorithm) => {
                let mut buckets = self.buckets.write().unwrap();
                if let Some(entry) = buckets.get_mut(&full_key) {
                    entry.last_seen = Instant::now();
                }
                algorithm
            }
            None => {
                let mut buckets = self.buckets.write().unwrap();
                buckets
                    .entry(full_key)
                    .or_insert_with(|| BucketEntry {
                        algorithm: (self.factory)(),
                        last_seen: Instant::now(),
                    })
                    .algorithm
                    .clone()
            }
        };

        let allowed = algorithm.allow();
        let reset_after = algorithm.reset_after();

        RateLimitResult {
            allowed,
            remaining: algorithm.remaining(),
            limit: algorithm.capacity(),
            reset_after,
            retry_after: if allowed { 0.0 } else { reset_after.max(1.0) },
        }
    }

    /// Convenience wrapper over [`check`](Self::check).
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    /// Drops the bucket for `key`, restoring full quota on next use.
    pub fn reset(&self, key: &str) {
        let full_key = format!("{}{}", self.config.key_prefix, key);
        self.buckets.write().unwrap().remove(&full_key);
    }

    /// Removes buckets idle longer than the TTL. Returns how many were
    /// evicted. Called periodically by [`spawn_eviction_task`].
    pub fn evict_idle(&self) -> usize {
        let ttl = self.config.bucket_ttl;
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap();
        let before = buckets.len();
        buckets.retain(|_, entry| now.duration_since(entry.last_seen) < ttl);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!("Rate limiter evicted {} idle buckets", evicted);
        }
        evicted
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap().len()
    }
}

/// Spawns the background sweep that keeps the bucket registry bounded.
///
/// Runs every `ttl / 2`, minimum one second.
pub fn spawn_eviction_task(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    let period = (limiter.config.bucket_ttl / 2).max(Duration::from_secs(1));
    info!(
        "Starting rate-limit eviction task (period {:?}, ttl {:?})",
        period, limiter.config.bucket_ttl
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            limiter.evict_idle();
        }
    })
}
