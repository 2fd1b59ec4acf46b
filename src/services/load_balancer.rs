//! Load balancing policies for distributing requests across backends.
//!
//! Every policy implements [`BalancerPolicy`] over a snapshot of the pool's
//! currently available backends. Policies return the *address* of the
//! chosen backend; the pool resolves it back to the live record.

use crate::models::backend::BackendSnapshot;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Selection policy over the available backend set.
///
/// Implementations must be cheap: selection runs on every request and the
/// snapshot slice is already filtered to available backends.
pub trait BalancerPolicy: Send + Sync {
    /// Picks a backend from `backends`, or `None` when the slice is empty.
    ///
    /// `client_ip` feeds affinity policies (IP hash) and is ignored by the
    /// rest.
    fn select(&self, backends: &[BackendSnapshot], client_ip: Option<&str>) -> Option<BackendSnapshot>;

    /// Policy name for logs and stats.
    fn name(&self) -> &'static str;
}

/// Available balancing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    WeightedLeastConnections,
    Random,
    WeightedRandom,
    IpHash,
    LeastResponseTime,
    ResourceBased,
}

impl BalancerKind {
    /// Parses a policy name as used in configuration.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "round_robin" => Some(Self::RoundRobin),
            "weighted_round_robin" => Some(Self::WeightedRoundRobin),
            "least_connections" => Some(Self::LeastConnections),
            "weighted_least_connections" => Some(Self::WeightedLeastConnections),
            "random" => Some(Self::Random),
            "weighted_random" => Some(Self::WeightedRandom),
            "ip_hash" => Some(Self::IpHash),
            "least_response_time" => Some(Self::LeastResponseTime),
            "resource_based" => Some(Self::ResourceBased),
            _ => None,
        }
    }

    /// Instantiates the policy.
    pub fn create(self) -> Box<dyn BalancerPolicy> {
        match self {
            Self::RoundRobin => Box::new(RoundRobinBalancer::new()),
            Self::WeightedRoundRobin => Box::new(WeightedRoundRobinBalancer::new()),
            Self::LeastConnections => Box::new(LeastConnectionsBalancer),
            Self::WeightedLeastConnections => Box::new(WeightedLeastConnectionsBalancer),
            Self::Random => Box::new(RandomBalancer),
            Self::WeightedRandom => Box::new(WeightedRandomBalancer),
            Self::IpHash => Box::new(IpHashBalancer),
            Self::LeastResponseTime => Box::new(LeastResponseTimeBalancer),
            Self::ResourceBased => Box::new(ResourceBasedBalancer),
        }
    }
}

/// Round-robin: a monotone index modulo the available-set size.
///
/// When the set shrinks the index is simply reduced modulo the new size;
/// no attempt is made to track identity across set changes.
pub struct RoundRobinBalancer {
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerPolicy for RoundRobinBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        if backends.is_empty() {
            return None;
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed) % backends.len();
        Some(backends[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Smooth weighted round-robin (the Nginx algorithm).
///
/// Walks the set with a sliding `current_weight` threshold that drops by
/// `gcd(weights)` each full wrap; a backend is picked when its weight
/// reaches the threshold. Over a full cycle of `sum(weights)/gcd` picks,
/// each backend is selected exactly `weight/gcd` times.
pub struct WeightedRoundRobinBalancer {
    state: Mutex<WrrState>,
}

struct WrrState {
    index: isize,
    current_weight: i64,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WrrState {
                index: -1,
                current_weight: 0,
            }),
        }
    }
}

impl Default for WeightedRoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerPolicy for WeightedRoundRobinBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        if backends.is_empty() {
            return None;
        }

        let max_weight = backends.iter().map(|b| b.weight.max(1)).max().unwrap() as i64;
        let gcd_weight = backends
            .iter()
            .map(|b| b.weight.max(1))
            .fold(0, gcd)
            .max(1) as i64;

        let mut state = self.state.lock().unwrap();
        let n = backends.len() as isize;

        loop {
            state.index = (state.index + 1) % n;
            if state.index == 0 {
                state.current_weight -= gcd_weight;
                if state.current_weight <= 0 {
                    state.current_weight = max_weight;
                }
            }

            let candidate = &backends[state.index as usize];
            if candidate.weight.max(1) as i64 >= state.current_weight {
                return Some(candidate.clone());
            }
        }
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

/// Least connections: argmin of `active_connections`, ties broken by
/// first-seen order.
pub struct LeastConnectionsBalancer;

impl BalancerPolicy for LeastConnectionsBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        backends
            .iter()
            .min_by_key(|b| b.active_connections)
            .cloned()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

/// Weighted least connections: argmin of `active_connections / weight`.
pub struct WeightedLeastConnectionsBalancer;

impl BalancerPolicy for WeightedLeastConnectionsBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        backends
            .iter()
            .min_by(|a, b| {
                let score_a = a.active_connections as f64 / a.weight.max(1) as f64;
                let score_b = b.active_connections as f64 / b.weight.max(1) as f64;
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    fn name(&self) -> &'static str {
        "weighted_least_connections"
    }
}

/// Uniform random pick.
pub struct RandomBalancer;

impl BalancerPolicy for RandomBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        if backends.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..backends.len());
        Some(backends[index].clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Weight-proportional random pick.
pub struct WeightedRandomBalancer;

impl BalancerPolicy for WeightedRandomBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        if backends.is_empty() {
            return None;
        }

        let total_weight: u64 = backends.iter().map(|b| b.weight.max(1) as u64).sum();
        let mut pick = rand::thread_rng().gen_range(0..total_weight);

        for backend in backends {
            let weight = backend.weight.max(1) as u64;
            if pick < weight {
                return Some(backend.clone());
            }
            pick -= weight;
        }

        backends.last().cloned()
    }

    fn name(&self) -> &'static str {
        "weighted_random"
    }
}

/// 128-bit FNV-1a over the client IP.
///
/// The selection must be stable across calls and processes for a fixed
/// pool, which rules out randomly seeded hashers; FNV-1a gives a
/// deterministic non-cryptographic 128-bit fold.
fn fnv1a_128(data: &[u8]) -> u128 {
    const OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
    const PRIME: u128 = 0x0000000001000000000000000000013b;

    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u128;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// IP hash: `hash(client_ip) mod N` over the available set. Stable while
/// the set is unchanged; falls back to a random pick without a client IP.
pub struct IpHashBalancer;

impl BalancerPolicy for IpHashBalancer {
    fn select(&self, backends: &[BackendSnapshot], client_ip: Option<&str>) -> Option<BackendSnapshot> {
        if backends.is_empty() {
            return None;
        }

        match client_ip {
            Some(ip) if !ip.is_empty() => {
                let index = (fnv1a_128(ip.as_bytes()) % backends.len() as u128) as usize;
                Some(backends[index].clone())
            }
            _ => RandomBalancer.select(backends, None),
        }
    }

    fn name(&self) -> &'static str {
        "ip_hash"
    }
}

/// Least response time: argmin EWMA latency among backends with at least
/// one observation; random when no backend has data yet.
pub struct LeastResponseTimeBalancer;

impl BalancerPolicy for LeastResponseTimeBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        if backends.is_empty() {
            return None;
        }

        let with_data: Vec<&BackendSnapshot> =
            backends.iter().filter(|b| b.total_requests > 0).collect();

        if with_data.is_empty() {
            return RandomBalancer.select(backends, None);
        }

        with_data
            .into_iter()
            .min_by(|a, b| {
                a.avg_latency_ms
                    .partial_cmp(&b.avg_latency_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    fn name(&self) -> &'static str {
        "least_response_time"
    }
}

/// Resource-based: argmax of remaining connection capacity.
pub struct ResourceBasedBalancer;

impl BalancerPolicy for ResourceBasedBalancer {
    fn select(&self, backends: &[BackendSnapshot], _client_ip: Option<&str>) -> Option<BackendSnapshot> {
        backends
            .iter()
            .max_by_key(|b| b.available_capacity())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "resource_based"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(address: &str, weight: u32) -> BackendSnapshot {
        BackendSnapshot {
            address: address.to_string(),
            host: address.split(':').next().unwrap().to_string(),
            port: 80,
            weight,
            max_connections: 100,
            active_connections: 0,
            total_requests: 0,
            total_errors: 0,
            avg_latency_ms: 0.0,
        }
    }

    #[test]
    fn round_robin_cycles() {
        let balancer = RoundRobinBalancer::new();
        let backends = vec![snapshot("a:80", 1), snapshot("b:80", 1)];

        assert_eq!(balancer.select(&backends, None).unwrap().address, "a:80");
        assert_eq!(balancer.select(&backends, None).unwrap().address, "b:80");
        assert_eq!(balancer.select(&backends, None).unwrap().address, "a:80");
    }

    #[test]
    fn empty_set_yields_none() {
        for kind in [
            BalancerKind::RoundRobin,
            BalancerKind::WeightedRoundRobin,
            BalancerKind::LeastConnections,
            BalancerKind::Random,
            BalancerKind::IpHash,
            BalancerKind::LeastResponseTime,
            BalancerKind::ResourceBased,
        ] {
            assert!(kind.create().select(&[], Some("1.2.3.4")).is_none());
        }
    }

    #[test]
    fn weighted_round_robin_full_cycle_counts() {
        let balancer = WeightedRoundRobinBalancer::new();
        let backends = vec![snapshot("a:80", 1), snapshot("b:80", 2), snapshot("c:80", 3)];

        // One full cycle is sum(weights)/gcd = 6 selections.
        let mut counts = std::collections::HashMap::new();
        for _ in 0..6 {
            let pick = balancer.select(&backends, None).unwrap();
            *counts.entry(pick.address).or_insert(0) += 1;
        }

        assert_eq!(counts["a:80"], 1);
        assert_eq!(counts["b:80"], 2);
        assert_eq!(counts["c:80"], 3);
    }

    #[test]
    fn weighted_round_robin_repeats_cycle() {
        let balancer = WeightedRoundRobinBalancer::new();
        let backends = vec![snapshot("a:80", 1), snapshot("b:80", 2), snapshot("c:80", 3)];

        let mut counts = std::collections::HashMap::new();
        for _ in 0..12 {
            let pick = balancer.select(&backends, None).unwrap();
            *counts.entry(pick.address).or_insert(0) += 1;
        }
        assert_eq!(counts["a:80"], 2);
        assert_eq!(counts["b:80"], 4);
        assert_eq!(counts["c:80"], 6);
    }

    #[test]
    fn least_connections_prefers_idle() {
        let mut a = snapshot("a:80", 1);
        a.active_connections = 10;
        let mut b = snapshot("b:80", 1);
        b.active_connections = 3;

        let pick = LeastConnectionsBalancer.select(&[a, b], None).unwrap();
        assert_eq!(pick.address, "b:80");
    }

    #[test]
    fn weighted_least_connections_divides_by_weight() {
        let mut a = snapshot("a:80", 10);
        a.active_connections = 10; // score 1.0
        let mut b = snapshot("b:80", 1);
        b.active_connections = 3; // score 3.0

        let pick = WeightedLeastConnectionsBalancer.select(&[a, b], None).unwrap();
        assert_eq!(pick.address, "a:80");
    }

    #[test]
    fn ip_hash_is_stable() {
        let backends = vec![snapshot("a:80", 1), snapshot("b:80", 1), snapshot("c:80", 1)];
        let first = IpHashBalancer.select(&backends, Some("10.1.2.3")).unwrap();
        for _ in 0..20 {
            let next = IpHashBalancer.select(&backends, Some("10.1.2.3")).unwrap();
            assert_eq!(next.address, first.address);
        }
    }

    #[test]
    fn ip_hash_distributes_across_ips() {
        let backends = vec![snapshot("a:80", 1), snapshot("b:80", 1), snapshot("c:80", 1)];
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            let ip = format!("10.0.0.{}", i);
            seen.insert(IpHashBalancer.select(&backends, Some(&ip)).unwrap().address);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn least_response_time_needs_observations() {
        let mut a = snapshot("a:80", 1);
        a.total_requests = 5;
        a.avg_latency_ms = 50.0;
        let mut b = snapshot("b:80", 1);
        b.total_requests = 5;
        b.avg_latency_ms = 10.0;
        let c = snapshot("c:80", 1); // no data

        let pick = LeastResponseTimeBalancer
            .select(&[a, b, c], None)
            .unwrap();
        assert_eq!(pick.address, "b:80");
    }

    #[test]
    fn resource_based_picks_most_capacity() {
        let mut a = snapshot("a:80", 1);
        a.active_connections = 90;
        let mut b = snapshot("b:80", 1);
        b.active_connections = 10;

        let pick = ResourceBasedBalancer.select(&[a, b], None).unwrap();
        assert_eq!(pick.address, "b:80");
    }

    #[test]
    fn weighted_random_respects_weights_roughly() {
        let backends = vec![snapshot("a:80", 1), snapshot("b:80", 9)];
        let mut b_count = 0;
        for _ in 0..500 {
            if WeightedRandomBalancer.select(&backends, None).unwrap().address == "b:80" {
                b_count += 1;
            }
        }
        // Expected ~450; a generous band avoids flakiness.
        assert!(b_count > 350, "b selected only {} times", b_count);
    }

    #[test]
    fn kind_parsing() {
        assert_eq!(BalancerKind::parse("ip_hash"), Some(BalancerKind::IpHash));
        assert_eq!(BalancerKind::parse("nope"), None);
    }
}
