//! Rolling per-operation health statistics and threshold alerting.
//!
//! Every completed call is recorded against its operation key: cumulative
//! totals for availability, plus a bounded recent window for responsiveness.
//! Crossing a threshold emits an [`Alert`] to every subscribed handler,
//! throttled by a per-(type, operation) cooldown so a sustained outage does
//! not flood the channels.

use crate::errors::ErrorKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for health monitoring and alerting.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Calls kept in the recent window per operation
    pub recent_window: usize,
    /// Recent-window error rate that triggers an alert
    pub error_rate_threshold: f64,
    /// Recent-window average latency that triggers an alert
    pub latency_threshold: Duration,
    /// Cumulative availability below which an alert triggers
    pub availability_threshold: f64,
    /// Minimum interval between alerts of the same type for the same key
    pub alert_cooldown: Duration,
    /// Calls required before thresholds are evaluated
    pub min_calls: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recent_window: 50,
            error_rate_threshold: 0.5,
            latency_threshold: Duration::from_secs(5),
            availability_threshold: 0.7,
            alert_cooldown: Duration::from_secs(60),
            min_calls: 10,
        }
    }
}

/// Which threshold an alert crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Recent error rate above threshold
    ErrorRate,
    /// Recent average latency above threshold
    Latency,
    /// Cumulative availability below threshold
    Availability,
}

/// How far past the threshold the observation landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Threshold crossed
    Warning,
    /// Threshold exceeded by half again or more
    Critical,
}

/// A threshold violation, immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Which threshold was crossed
    pub alert_type: AlertType,
    /// Operation key the violation was observed on
    pub operation: String,
    /// The observed value (rate, ratio, or milliseconds)
    pub observed: f64,
    /// The configured threshold
    pub threshold: f64,
    /// How bad the violation is
    pub severity: AlertSeverity,
    /// When the alert was generated
    pub timestamp: DateTime<Utc>,
}

/// Notification channel for alerts.
pub trait AlertHandler: Send + Sync {
    /// Called for every alert that clears the cooldown.
    fn on_alert(&self, alert: &Alert);
}

/// One completed call, as kept in the recent window.
#[derive(Debug, Clone)]
struct CallRecord {
    duration: Duration,
    success: bool,
    error_kind: Option<ErrorKind>,
    attempts: u32,
}

#[derive(Default)]
struct OperationStats {
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    total_duration: Duration,
    recent: VecDeque<CallRecord>,
}

/// Health snapshot for one operation key.
#[derive(Debug, Clone, Serialize)]
pub struct OperationHealth {
    /// Operation key
    pub operation: String,
    /// Calls recorded since process start
    pub total_calls: u64,
    /// Successful calls since process start
    pub success_count: u64,
    /// Failed calls since process start
    pub failure_count: u64,
    /// Error rate over the recent window (0.0 to 1.0)
    pub recent_error_rate: f64,
    /// Average latency over the recent window, in milliseconds
    pub recent_average_latency_ms: f64,
    /// Cumulative success ratio (0.0 to 1.0)
    pub availability: f64,
    /// Kind of the most recent failure, when one exists
    pub last_error_kind: Option<ErrorKind>,
}

/// Read-only snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// Per-operation health, sorted by operation key
    pub operations: Vec<OperationHealth>,
}

/// Records call outcomes and emits threshold alerts.
pub struct HealthMonitor {
    config: HealthConfig,
    stats: Mutex<HashMap<String, OperationStats>>,
    cooldowns: Mutex<HashMap<(AlertType, String), Instant>>,
    handlers: Mutex<HashMap<u64, Arc<dyn AlertHandler>>>,
    next_handler_id: AtomicU64,
}

impl HealthMonitor {
    /// Create a monitor with the given configuration.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            next_handler_id: AtomicU64::new(0),
        }
    }

    /// Record one completed call and evaluate the alert thresholds.
    pub fn record(
        &self,
        operation_key: &str,
        duration: Duration,
        success: bool,
        error_kind: Option<ErrorKind>,
        attempts: u32,
    ) {
        let alerts = {
            let mut stats = self.stats.lock();
            let entry = stats.entry(operation_key.to_string()).or_default();
            entry.total_calls += 1;
            entry.total_duration += duration;
            if success {
                entry.success_count += 1;
            } else {
                entry.failure_count += 1;
            }
            entry.recent.push_back(CallRecord {
                duration,
                success,
                error_kind,
                attempts,
            });
            while entry.recent.len() > self.config.recent_window {
                entry.recent.pop_front();
            }
            self.evaluate(operation_key, entry)
        };

        for alert in alerts {
            self.emit(alert);
        }
    }

    /// Subscribe a notification channel. Returns an id for unsubscribing.
    pub fn subscribe(&self, handler: Arc<dyn AlertHandler>) -> u64 {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().insert(id, handler);
        id
    }

    /// Remove a previously subscribed channel.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.handlers.lock().remove(&id).is_some()
    }

    /// Snapshot of every tracked operation, or just `operation_key`.
    pub fn report(&self, operation_key: Option<&str>) -> HealthReport {
        let stats = self.stats.lock();
        let mut operations: Vec<OperationHealth> = stats
            .iter()
            .filter(|(key, _)| operation_key.map_or(true, |wanted| wanted == key.as_str()))
            .map(|(key, entry)| operation_health(key, entry))
            .collect();
        operations.sort_by(|a, b| a.operation.cmp(&b.operation));

        HealthReport {
            generated_at: Utc::now(),
            operations,
        }
    }

    fn evaluate(&self, operation_key: &str, entry: &OperationStats) -> Vec<Alert> {
        if entry.recent.len() < self.config.min_calls {
            return Vec::new();
        }

        let mut alerts = Vec::new();
        let recent_len = entry.recent.len() as f64;
        let recent_failures = entry.recent.iter().filter(|r| !r.success).count() as f64;

        let error_rate = recent_failures / recent_len;
        if error_rate > self.config.error_rate_threshold {
            alerts.push(self.alert(
                AlertType::ErrorRate,
                operation_key,
                error_rate,
                self.config.error_rate_threshold,
                error_rate >= self.config.error_rate_threshold * 1.5,
            ));
        }

        let recent_total: Duration = entry.recent.iter().map(|r| r.duration).sum();
        let average_latency_ms = recent_total.as_secs_f64() * 1000.0 / recent_len;
        let latency_threshold_ms = self.config.latency_threshold.as_secs_f64() * 1000.0;
        if average_latency_ms > latency_threshold_ms {
            alerts.push(self.alert(
                AlertType::Latency,
                operation_key,
                average_latency_ms,
                latency_threshold_ms,
                average_latency_ms >= latency_threshold_ms * 1.5,
            ));
        }

        let availability = entry.success_count as f64 / entry.total_calls as f64;
        if availability < self.config.availability_threshold {
            alerts.push(self.alert(
                AlertType::Availability,
                operation_key,
                availability,
                self.config.availability_threshold,
                availability <= self.config.availability_threshold / 1.5,
            ));
        }

        alerts
            .into_iter()
            .filter(|alert| self.clears_cooldown(alert))
            .collect()
    }

    fn alert(
        &self,
        alert_type: AlertType,
        operation_key: &str,
        observed: f64,
        threshold: f64,
        critical: bool,
    ) -> Alert {
        Alert {
            alert_type,
            operation: operation_key.to_string(),
            observed,
            threshold,
            severity: if critical {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            },
            timestamp: Utc::now(),
        }
    }

    fn clears_cooldown(&self, alert: &Alert) -> bool {
        let key = (alert.alert_type, alert.operation.clone());
        let mut cooldowns = self.cooldowns.lock();
        let suppressed = cooldowns
            .get(&key)
            .map(|last| last.elapsed() < self.config.alert_cooldown)
            .unwrap_or(false);
        if suppressed {
            false
        } else {
            cooldowns.insert(key, Instant::now());
            true
        }
    }

    fn emit(&self, alert: Alert) {
        warn!(
            operation = %alert.operation,
            alert_type = ?alert.alert_type,
            observed = alert.observed,
            threshold = alert.threshold,
            severity = ?alert.severity,
            "Health threshold crossed"
        );
        let handlers: Vec<Arc<dyn AlertHandler>> =
            self.handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler.on_alert(&alert);
        }
    }
}

fn operation_health(key: &str, entry: &OperationStats) -> OperationHealth {
    let recent_len = entry.recent.len().max(1) as f64;
    let recent_failures = entry.recent.iter().filter(|r| !r.success).count() as f64;
    let recent_total: Duration = entry.recent.iter().map(|r| r.duration).sum();
    let last_error_kind = entry
        .recent
        .iter()
        .rev()
        .find(|r| !r.success)
        .and_then(|r| r.error_kind);

    OperationHealth {
        operation: key.to_string(),
        total_calls: entry.total_calls,
        success_count: entry.success_count,
        failure_count: entry.failure_count,
        recent_error_rate: recent_failures / recent_len,
        recent_average_latency_ms: recent_total.as_secs_f64() * 1000.0 / recent_len,
        availability: if entry.total_calls == 0 {
            1.0
        } else {
            entry.success_count as f64 / entry.total_calls as f64
        },
        last_error_kind,
    }
}
