//! # Resilient Outbound-Call Subsystem
//!
//! Shared resilience layer for the integration clients: every call to an
//! unreliable, rate-limited, externally-owned service (an AI inference
//! endpoint, a news or trends API) goes through one orchestrator that
//! guarantees bounded latency, bounded concurrency, automatic recovery from
//! partial outages, and minimal redundant calls.
//!
//! ## Features
//!
//! - Response cache with per-entry TTL, tag-based invalidation, and LRU eviction
//! - In-flight coalescing of concurrent identical requests
//! - Adaptive per-identity rate limiting with latency/error feedback
//! - Bounded concurrency with priority admission queues
//! - Per-service circuit breakers with half-open trial recovery
//! - Kind-classified retries with exponential backoff and jitter
//! - Per-attempt deadlines with an orphaned-operation registry
//! - Rolling health statistics with threshold alerting
//!
//! All state is in-memory and process-local; nothing survives a restart, and
//! the wrapped operation owns its own transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_resilience::{
//!     CallContext, DefaultResilienceOrchestrator, ResilienceConfig, ResilienceOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = DefaultResilienceOrchestrator::new(ResilienceConfig::default());
//!
//!     let summary: String = orchestrator
//!         .execute("ai:summarize", CallContext::new(), || async {
//!             // The wrapped operation brings its own transport.
//!             Ok("summary".to_string())
//!         })
//!         .await?;
//!
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `orchestrator` - The public entry point composing every stage
//! - `cache` - Response cache (TTL, tags, LRU)
//! - `dedupe` - In-flight request coalescing
//! - `resilience` - Circuit breaker, rate limiter, retry, timeout
//! - `scheduler` - Bounded concurrency with priority admission
//! - `health` - Rolling statistics and threshold alerting
//! - `errors` - Error taxonomy with fixed retryability per kind
//! - `observability` - Metrics collection and logging setup
//! - `config` - Aggregated configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod cache;
pub mod config;
pub mod dedupe;
pub mod errors;
pub mod health;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod scheduler;

// Re-exports for convenience
pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use config::ResilienceConfig;
pub use dedupe::{Deduplicator, InFlightInfo};
pub use errors::{CallError, CallResult, ErrorKind, OperationError, OperationResult};
pub use health::{
    Alert, AlertHandler, AlertSeverity, AlertType, HealthConfig, HealthMonitor, HealthReport,
    OperationHealth,
};
pub use observability::{
    metric_names, InMemoryMetricsCollector, LogFormat, LogLevel, LoggingConfig, MetricsCollector,
    NoopMetricsCollector,
};
pub use orchestrator::{CallContext, DefaultResilienceOrchestrator, ResilienceOrchestrator};
pub use resilience::{
    ActiveTimeout, AdaptiveRateLimiter, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook,
    CircuitBreakerRegistry, CircuitMetrics, CircuitState, RateDecision, RateLimiterConfig,
    RetryConfig, RetryExecutor, TimeoutConfig, TimeoutGuard,
};
pub use scheduler::{ConcurrencyScheduler, Priority, SchedulerConfig, SchedulerStats, SlotPermit};

/// The default maximum number of retry attempts after the initial call
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The default per-attempt deadline in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The default cache TTL in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// The default per-identity admissions per rate window
pub const DEFAULT_BASE_RATE_LIMIT: u32 = 60;

/// The default number of concurrent execution slots
pub const DEFAULT_MAX_CONCURRENT: usize = 8;
