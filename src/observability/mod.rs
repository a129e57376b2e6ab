//! Observability for the call subsystem: metrics collection and logging setup.
//!
//! The orchestrator reports cache traffic, coalesced calls, admission
//! rejections, retries, and request durations through a pluggable
//! [`MetricsCollector`]; `logging` wires `tracing` output formats for the
//! structured logs the components emit.

mod logging;
mod metrics;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metrics::{metric_names, InMemoryMetricsCollector, MetricsCollector, NoopMetricsCollector};
