//! Metrics collection for the call subsystem.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Sink for subsystem metrics.
///
/// Implementations receive counters, histograms, and gauges with optional
/// key-value labels and forward them wherever the host application keeps its
/// telemetry.
pub trait MetricsCollector: Send + Sync {
    /// Increments a counter by the given value.
    fn increment_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]);

    /// Records a value in a histogram.
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Sets a gauge to the given value.
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// In-memory metrics collector for testing and simple deployments.
#[derive(Default)]
pub struct InMemoryMetricsCollector {
    counters: RwLock<HashMap<String, u64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
    gauges: RwLock<HashMap<String, f64>>,
}

impl InMemoryMetricsCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, 0 if it was never incremented.
    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// All recorded values for a histogram.
    pub fn get_histogram(&self, name: &str) -> Vec<f64> {
        self.histograms.read().get(name).cloned().unwrap_or_default()
    }

    /// Current value of a gauge, if it was ever set.
    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).copied()
    }

    fn make_key(name: &str, labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            name.to_string()
        } else {
            let label_str: Vec<String> =
                labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}:{}", name, label_str.join(","))
        }
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn increment_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        let key = Self::make_key(name, labels);
        *self.counters.write().entry(key).or_insert(0) += value;
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::make_key(name, labels);
        self.histograms.write().entry(key).or_default().push(value);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::make_key(name, labels);
        self.gauges.write().insert(key, value);
    }
}

/// Metrics collector that discards everything.
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn increment_counter(&self, _name: &str, _value: u64, _labels: &[(&str, &str)]) {}
    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// Standardized metric names reported by the orchestrator.
pub mod metric_names {
    /// Total mediated calls
    pub const REQUEST_COUNT: &str = "resilience.requests.total";

    /// Duration of mediated calls in milliseconds
    pub const REQUEST_DURATION_MS: &str = "resilience.requests.duration_ms";

    /// Calls that surfaced a terminal error
    pub const REQUEST_ERRORS: &str = "resilience.requests.errors";

    /// Calls answered from the response cache
    pub const CACHE_HITS: &str = "resilience.cache.hits";

    /// Cache lookups that missed
    pub const CACHE_MISSES: &str = "resilience.cache.misses";

    /// Calls that joined an in-flight execution
    pub const DEDUPE_JOINS: &str = "resilience.dedupe.joins";

    /// Admissions denied by the rate limiter
    pub const RATE_LIMIT_REJECTIONS: &str = "resilience.rate_limit.rejections";

    /// Calls refused by an open circuit
    pub const CIRCUIT_REJECTIONS: &str = "resilience.circuit_breaker.rejections";

    /// Retry attempts beyond the first
    pub const RETRY_ATTEMPTS: &str = "resilience.retry.attempts";

    /// Attempts that exceeded their deadline
    pub const TIMEOUTS: &str = "resilience.timeouts.total";

    /// Queued waiters at report time
    pub const QUEUE_DEPTH: &str = "resilience.scheduler.queue_depth";
}
