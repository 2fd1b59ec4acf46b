//! Metrics collection and export.
//!
//! A [`MetricsCollector`] registers counters, gauges, histograms and
//! summaries under a common prefix and exports them in Prometheus text
//! format, the OpenMetrics variant (`_total` counter suffix plus `# EOF`)
//! or JSON. Metric instances are shared (`Arc`) so hot paths hold their
//! metric directly instead of going through the registry per observation.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Canonical label rendering: sorted `k="v"` pairs.
fn label_key(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut sorted: Vec<(&str, &str)> = labels.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Monotonically increasing counter with optional labels.
pub struct Counter {
    pub name: String,
    pub description: String,
    values: RwLock<BTreeMap<String, f64>>,
}

impl Counter {
    fn new(name: String, description: String) -> Self {
        Self {
            name,
            description,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1.0, &[]);
    }

    pub fn inc_labeled(&self, labels: &[(&str, &str)]) {
        self.inc_by(1.0, labels);
    }

    pub fn inc_by(&self, value: f64, labels: &[(&str, &str)]) {
        let key = label_key(labels);
        let mut values = self.values.write().unwrap();
        *values.entry(key).or_insert(0.0) += value;
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> f64 {
        self.values
            .read()
            .unwrap()
            .get(&label_key(labels))
            .copied()
            .unwrap_or(0.0)
    }

    fn all(&self) -> BTreeMap<String, f64> {
        self.values.read().unwrap().clone()
    }
}

/// Gauge: a value that can move both ways.
pub struct Gauge {
    pub name: String,
    pub description: String,
    values: RwLock<BTreeMap<String, f64>>,
}

impl Gauge {
    fn new(name: String, description: String) -> Self {
        Self {
            name,
            description,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set(&self, value: f64, labels: &[(&str, &str)]) {
        let key = label_key(labels);
        self.values.write().unwrap().insert(key, value);
    }

    pub fn add(&self, value: f64, labels: &[(&str, &str)]) {
        let key = label_key(labels);
        let mut values = self.values.write().unwrap();
        *values.entry(key).or_insert(0.0) += value;
    }

    pub fn sub(&self, value: f64, labels: &[(&str, &str)]) {
        self.add(-value, labels);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> f64 {
        self.values
            .read()
            .unwrap()
            .get(&label_key(labels))
            .copied()
            .unwrap_or(0.0)
    }

    fn all(&self) -> BTreeMap<String, f64> {
        self.values.read().unwrap().clone()
    }
}

/// Histogram with cumulative buckets.
pub struct Histogram {
    pub name: String,
    pub description: String,
    buckets: Vec<f64>,
    state: RwLock<BTreeMap<String, HistogramState>>,
}

#[derive(Clone)]
struct HistogramState {
    counts: Vec<u64>,
    sum: f64,
    total: u64,
}

/// Default latency-oriented buckets in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

impl Histogram {
    fn new(name: String, description: String, buckets: Vec<f64>) -> Self {
        Self {
            name,
            description,
            buckets,
            state: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn observe(&self, value: f64, labels: &[(&str, &str)]) {
        let key = label_key(labels);
        let mut state = self.state.write().unwrap();
        let entry = state.entry(key).or_insert_with(|| HistogramState {
            counts: vec![0; self.buckets.len()],
            sum: 0.0,
            total: 0,
        });
        entry.sum += value;
        entry.total += 1;
        for (i, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                entry.counts[i] += 1;
            }
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.state
            .read()
            .unwrap()
            .get(&label_key(labels))
            .map(|s| s.total)
            .unwrap_or(0)
    }

    pub fn sum(&self, labels: &[(&str, &str)]) -> f64 {
        self.state
            .read()
            .unwrap()
            .get(&label_key(labels))
            .map(|s| s.sum)
            .unwrap_or(0.0)
    }

    fn all(&self) -> BTreeMap<String, HistogramState> {
        self.state.read().unwrap().clone()
    }
}

/// Summary over a sliding time window, reporting quantiles.
pub struct Summary {
    pub name: String,
    pub description: String,
    quantiles: Vec<f64>,
    max_age: std::time::Duration,
    observations: RwLock<BTreeMap<String, Vec<(Instant, f64)>>>,
}

impl Summary {
    fn new(name: String, description: String, quantiles: Vec<f64>) -> Self {
        Self {
            name,
            description,
            quantiles,
            max_age: std::time::Duration::from_secs(60),
            observations: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn observe(&self, value: f64, labels: &[(&str, &str)]) {
        let key = label_key(labels);
        let now = Instant::now();
        let mut observations = self.observations.write().unwrap();
        let entry = observations.entry(key).or_default();
        entry.push((now, value));
        let cutoff = self.max_age;
        entry.retain(|(t, _)| now.duration_since(*t) <= cutoff);
    }

    pub fn quantiles(&self, labels: &[(&str, &str)]) -> Vec<(f64, f64)> {
        let observations = self.observations.read().unwrap();
        let empty = Vec::new();
        let entry = observations.get(&label_key(labels)).unwrap_or(&empty);

        let mut values: Vec<f64> = entry.iter().map(|(_, v)| *v).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        self.quantiles
            .iter()
            .map(|q| {
                if values.is_empty() {
                    (*q, 0.0)
                } else {
                    let index = ((q * values.len() as f64) as usize).min(values.len() - 1);
                    (*q, values[index])
                }
            })
            .collect()
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> usize {
        self.observations
            .read()
            .unwrap()
            .get(&label_key(labels))
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// Registry of named metrics under a common prefix.
///
/// `counter`/`gauge`/`histogram`/`summary` are get-or-create and return a
/// shared handle.
pub struct MetricsCollector {
    prefix: String,
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    gauges: RwLock<BTreeMap<String, Arc<Gauge>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    summaries: RwLock<BTreeMap<String, Arc<Summary>>>,
}

impl MetricsCollector {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            summaries: RwLock::new(BTreeMap::new()),
        }
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    pub fn counter(&self, name: &str, description: &str) -> Arc<Counter> {
        let full = self.full_name(name);
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(full.clone())
            .or_insert_with(|| Arc::new(Counter::new(full, description.to_string())))
            .clone()
    }

    pub fn gauge(&self, name: &str, description: &str) -> Arc<Gauge> {
        let full = self.full_name(name);
        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(full.clone())
            .or_insert_with(|| Arc::new(Gauge::new(full, description.to_string())))
            .clone()
    }

    pub fn histogram(&self, name: &str, description: &str, buckets: Option<Vec<f64>>) -> Arc<Histogram> {
        let full = self.full_name(name);
        let mut histograms = self.histograms.write().unwrap();
        histograms
            .entry(full.clone())
            .or_insert_with(|| {
                Arc::new(Histogram::new(
                    full,
                    description.to_string(),
                    buckets.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec()),
                ))
            })
            .clone()
    }

    pub fn summary(&self, name: &str, description: &str, quantiles: Option<Vec<f64>>) -> Arc<Summary> {
        let full = self.full_name(name);
        let mut summaries = self.summaries.write().unwrap();
        summaries
            .entry(full.clone())
            .or_insert_with(|| {
                Arc::new(Summary::new(
                    full,
                    description.to_string(),
                    quantiles.unwrap_or_else(|| vec![0.5, 0.9, 0.99]),
                ))
            })
            .clone()
    }

    /// Prometheus text exposition.
    pub fn export_prometheus(&self) -> String {
        let mut lines = Vec::new();

        for counter in self.counters.read().unwrap().values() {
            lines.push(format!("# HELP {} {}", counter.name, counter.description));
            lines.push(format!("# TYPE {} counter", counter.name));
            let values = counter.all();
            if values.is_empty() {
                lines.push(format!("{} 0", counter.name));
            }
            for (labels, value) in values {
                if labels.is_empty() {
                    lines.push(format!("{} {}", counter.name, value));
                } else {
                    lines.push(format!("{}{{{}}} {}", counter.name, labels, value));
                }
            }
        }

        for gauge in self.gauges.read().unwrap().values() {
            lines.push(format!("# HELP {} {}", gauge.name, gauge.description));
            lines.push(format!("# TYPE {} gauge", gauge.name));
            let values = gauge.all();
            if values.is_empty() {
                lines.push(format!("{} 0", gauge.name));
            }
            for (labels, value) in values {
                if labels.is_empty() {
                    lines.push(format!("{} {}", gauge.name, value));
                } else {
                    lines.push(format!("{}{{{}}} {}", gauge.name, labels, value));
                }
            }
        }

        for histogram in self.histograms.read().unwrap().values() {
            lines.push(format!("# HELP {} {}", histogram.name, histogram.description));
            lines.push(format!("# TYPE {} histogram", histogram.name));
            for (labels, state) in histogram.all() {
                let sep = if labels.is_empty() { String::new() } else { format!("{},", labels) };
                for (i, bound) in histogram.buckets.iter().enumerate() {
                    lines.push(format!(
                        "{}_bucket{{{}le=\"{}\"}} {}",
                        histogram.name, sep, bound, state.counts[i]
                    ));
                }
                lines.push(format!(
                    "{}_bucket{{{}le=\"+Inf\"}} {}",
                    histogram.name, sep, state.total
                ));
                if labels.is_empty() {
                    lines.push(format!("{}_sum {}", histogram.name, state.sum));
                    lines.push(format!("{}_count {}", histogram.name, state.total));
                } else {
                    lines.push(format!("{}_sum{{{}}} {}", histogram.name, labels, state.sum));
                    lines.push(format!("{}_count{{{}}} {}", histogram.name, labels, state.total));
                }
            }
        }

        for summary in self.summaries.read().unwrap().values() {
            lines.push(format!("# HELP {} {}", summary.name, summary.description));
            lines.push(format!("# TYPE {} summary", summary.name));
            for (quantile, value) in summary.quantiles(&[]) {
                lines.push(format!(
                    "{}{{quantile=\"{}\"}} {}",
                    summary.name, quantile, value
                ));
            }
            lines.push(format!("{}_count {}", summary.name, summary.count(&[])));
        }

        lines.join("\n")
    }

    /// OpenMetrics variant: counters get the `_total` suffix and the
    /// exposition ends with `# EOF`.
    pub fn export_openmetrics(&self) -> String {
        let mut lines = Vec::new();

        for counter in self.counters.read().unwrap().values() {
            lines.push(format!("# HELP {} {}", counter.name, counter.description));
            lines.push(format!("# TYPE {} counter", counter.name));
            let values = counter.all();
            if values.is_empty() {
                lines.push(format!("{}_total 0", counter.name));
            }
            for (labels, value) in values {
                if labels.is_empty() {
                    lines.push(format!("{}_total {}", counter.name, value));
                } else {
                    lines.push(format!("{}_total{{{}}} {}", counter.name, labels, value));
                }
            }
        }

        lines.push("# EOF".to_string());
        lines.join("\n")
    }

    /// JSON export: `{timestamp, metrics: {counters, gauges, histograms,
    /// summaries}}`.
    pub fn export_json(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = self
            .counters
            .read()
            .unwrap()
            .iter()
            .map(|(name, c)| (name.clone(), json!(c.all())))
            .collect();

        let gauges: serde_json::Map<String, serde_json::Value> = self
            .gauges
            .read()
            .unwrap()
            .iter()
            .map(|(name, g)| (name.clone(), json!(g.all())))
            .collect();

        let histograms: serde_json::Map<String, serde_json::Value> = self
            .histograms
            .read()
            .unwrap()
            .iter()
            .map(|(name, h)| {
                let per_label: serde_json::Map<String, serde_json::Value> = h
                    .all()
                    .into_iter()
                    .map(|(labels, state)| {
                        (
                            labels,
                            json!({ "sum": state.sum, "count": state.total }),
                        )
                    })
                    .collect();
                (name.clone(), per_label.into())
            })
            .collect();

        let summaries: serde_json::Map<String, serde_json::Value> = self
            .summaries
            .read()
            .unwrap()
            .iter()
            .map(|(name, s)| {
                (
                    name.clone(),
                    json!({
                        "quantiles": s.quantiles(&[]).into_iter()
                            .map(|(q, v)| (q.to_string(), v))
                            .collect::<BTreeMap<String, f64>>(),
                        "count": s.count(&[]),
                    }),
                )
            })
            .collect();

        json!({
            "timestamp": Utc::now().timestamp(),
            "metrics": {
                "counters": counters,
                "gauges": gauges,
                "histograms": histograms,
                "summaries": summaries,
            },
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new("gateway")
    }
}

/// The standard gateway metric set, created eagerly at startup.
pub struct GatewayMetrics {
    pub requests_total: Arc<Counter>,
    pub errors_total: Arc<Counter>,
    pub request_duration_seconds: Arc<Histogram>,
    pub active_connections: Arc<Gauge>,
    pub backend_requests_total: Arc<Counter>,
    pub backend_latency_seconds: Arc<Histogram>,
}

impl GatewayMetrics {
    pub fn register(collector: &MetricsCollector) -> Self {
        Self {
            requests_total: collector.counter("requests_total", "Total number of requests"),
            errors_total: collector.counter("errors_total", "Total number of errors"),
            request_duration_seconds: collector.histogram(
                "request_duration_seconds",
                "Request duration in seconds",
                None,
            ),
            active_connections: collector.gauge("active_connections", "Number of active connections"),
            backend_requests_total: collector
                .counter("backend_requests_total", "Total backend requests"),
            backend_latency_seconds: collector.histogram(
                "backend_latency_seconds",
                "Backend latency in seconds",
                None,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_with_labels() {
        let collector = MetricsCollector::new("test");
        let counter = collector.counter("requests_total", "Total requests");
        counter.inc_labeled(&[("method", "GET"), ("status", "200")]);
        counter.inc_labeled(&[("status", "200"), ("method", "GET")]);
        counter.inc_labeled(&[("method", "POST"), ("status", "201")]);

        // Label order does not matter.
        assert_eq!(counter.get(&[("method", "GET"), ("status", "200")]), 2.0);
        assert_eq!(counter.get(&[("method", "POST"), ("status", "201")]), 1.0);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let collector = MetricsCollector::new("test");
        let gauge = collector.gauge("connections", "Active connections");
        gauge.add(3.0, &[]);
        gauge.sub(1.0, &[]);
        assert_eq!(gauge.get(&[]), 2.0);
        gauge.set(10.0, &[]);
        assert_eq!(gauge.get(&[]), 10.0);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let collector = MetricsCollector::new("test");
        let histogram = collector.histogram("latency", "Latency", Some(vec![0.1, 1.0, 10.0]));
        histogram.observe(0.05, &[]);
        histogram.observe(0.5, &[]);
        histogram.observe(5.0, &[]);

        let text = collector.export_prometheus();
        assert!(text.contains("test_latency_bucket{le=\"0.1\"} 1"));
        assert!(text.contains("test_latency_bucket{le=\"1\"} 2"));
        assert!(text.contains("test_latency_bucket{le=\"10\"} 3"));
        assert!(text.contains("test_latency_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("test_latency_sum 5.55"));
        assert!(text.contains("test_latency_count 3"));
    }

    #[test]
    fn prometheus_format_sections() {
        let collector = MetricsCollector::new("gw");
        collector.counter("requests_total", "Requests").inc();
        collector.gauge("up", "Up").set(1.0, &[]);

        let text = collector.export_prometheus();
        assert!(text.contains("# TYPE gw_requests_total counter"));
        assert!(text.contains("gw_requests_total 1"));
        assert!(text.contains("# TYPE gw_up gauge"));
        assert!(text.contains("gw_up 1"));
    }

    #[test]
    fn openmetrics_appends_total_and_eof() {
        let collector = MetricsCollector::new("gw");
        collector.counter("requests", "Requests").inc();

        let text = collector.export_openmetrics();
        assert!(text.contains("gw_requests_total 1"));
        assert!(text.ends_with("# EOF"));
    }

    #[test]
    fn json_export_shape() {
        let collector = MetricsCollector::new("gw");
        collector.counter("requests_total", "Requests").inc();
        collector.gauge("up", "Up").set(1.0, &[]);
        collector
            .histogram("latency", "Latency", None)
            .observe(0.2, &[]);

        let exported = collector.export_json();
        assert!(exported["timestamp"].is_i64());
        assert_eq!(exported["metrics"]["counters"]["gw_requests_total"][""], 1.0);
        assert_eq!(exported["metrics"]["gauges"]["gw_up"][""], 1.0);
        assert_eq!(exported["metrics"]["histograms"]["gw_latency"][""]["count"], 1);
    }

    #[test]
    fn summary_quantiles() {
        let collector = MetricsCollector::new("gw");
        let summary = collector.summary("duration", "Duration", Some(vec![0.5]));
        for i in 1..=100 {
            summary.observe(i as f64, &[]);
        }
        let quantiles = summary.quantiles(&[]);
        let median = quantiles[0].1;
        assert!((45.0..=55.0).contains(&median), "median {}", median);
    }

    #[test]
    fn collector_returns_same_instance() {
        let collector = MetricsCollector::new("gw");
        let a = collector.counter("x", "X");
        let b = collector.counter("x", "X");
        a.inc();
        assert_eq!(b.get(&[]), 1.0);
    }
}
