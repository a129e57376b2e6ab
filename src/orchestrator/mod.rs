//! The resilient-call orchestrator: the single entry point the rest of the
//! application uses for outbound calls.
//!
//! One logical call flows through the stages in a fixed order: response cache,
//! in-flight coalescing, rate-limiter admission, scheduler slot, per-service
//! circuit breaker, then the deadline-guarded and retried operation itself.
//! Any early exit (cache hit, coalesced join, admission rejection, open
//! circuit) short-circuits the remaining stages. Completions feed the breaker
//! and rate limiter, populate the cache, settle coalesced waiters, and report
//! to the health monitor.

use crate::cache::{CacheConfig, CacheStats, ResponseCache};
use crate::config::ResilienceConfig;
use crate::dedupe::Deduplicator;
use crate::errors::{CallError, CallResult, OperationError, OperationResult};
use crate::health::{AlertHandler, HealthConfig, HealthMonitor, HealthReport};
use crate::observability::{metric_names, MetricsCollector, NoopMetricsCollector};
use crate::resilience::{
    ActiveTimeout, AdaptiveRateLimiter, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitMetrics, RateLimiterConfig, RetryConfig, RetryExecutor, TimeoutConfig, TimeoutGuard,
};
use crate::scheduler::{ConcurrencyScheduler, Priority, SchedulerConfig, SchedulerStats};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Identity used for rate limiting when the caller does not supply one.
const DEFAULT_IDENTITY: &str = "default";

/// Per-call options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Admission priority when the scheduler has to queue
    pub priority: Priority,
    /// Cache TTL for a successful result; the cache default applies when unset
    pub cache_ttl: Option<Duration>,
    /// Tags attached to the cached result, for targeted invalidation
    pub cache_tags: Vec<String>,
    /// Rate-limiting identity (typically caller + service); defaults to a
    /// process-wide bucket
    pub identity: Option<String>,
    /// Downstream service identity for circuit breaking; defaults to the
    /// operation key's prefix before `:`
    pub service: Option<String>,
    /// Per-attempt deadline; the guard default applies when unset
    pub timeout: Option<Duration>,
}

impl CallContext {
    /// Creates a context with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the admission priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the cache TTL for a successful result.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the invalidation tags for the cached result.
    pub fn cache_tags(mut self, tags: Vec<String>) -> Self {
        self.cache_tags = tags;
        self
    }

    /// Sets the rate-limiting identity.
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Sets the downstream service identity.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the per-attempt deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Entry point for mediated outbound calls.
#[async_trait]
pub trait ResilienceOrchestrator: Send + Sync {
    /// Run `f` under the full protection pipeline.
    ///
    /// `operation_key` identifies the logical operation for caching,
    /// coalescing, and health tracking; callers derive it from the operation
    /// name plus normalized parameters. Terminal failures surface as a
    /// structured [`OperationError`].
    async fn execute<F, Fut, T>(
        &self,
        operation_key: &str,
        context: CallContext,
        f: F,
    ) -> OperationResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<T>> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static;
}

/// What the coalesced pipeline settles with: the serialized result and the
/// attempts consumed, or a failure with the caller-facing retryable flag
/// already decided.
type PipelineResult = Result<(Value, u32), PipelineFailure>;

#[derive(Debug, Clone)]
struct PipelineFailure {
    error: CallError,
    retryable: bool,
    attempts: u32,
}

/// The protection stages shared by every coalesced execution.
struct Stages {
    rate_limiter: AdaptiveRateLimiter,
    scheduler: ConcurrencyScheduler,
    breakers: CircuitBreakerRegistry,
    retry: RetryExecutor,
    timeout: TimeoutGuard,
    metrics: Arc<dyn MetricsCollector>,
}

/// Default implementation of the resilient-call orchestrator.
pub struct DefaultResilienceOrchestrator {
    cache: Arc<ResponseCache>,
    dedupe: Deduplicator<PipelineResult>,
    health: Arc<HealthMonitor>,
    stages: Arc<Stages>,
    metrics: Arc<dyn MetricsCollector>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl DefaultResilienceOrchestrator {
    /// Create an orchestrator with the given configuration and no metrics
    /// export.
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetricsCollector))
    }

    /// Create an orchestrator that reports metrics to `metrics`.
    ///
    /// When called inside a tokio runtime this also starts the periodic cache
    /// sweep task; the task is aborted when the orchestrator is dropped.
    pub fn with_metrics(config: ResilienceConfig, metrics: Arc<dyn MetricsCollector>) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache));
        let sweeper = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let cache = Arc::clone(&cache);
            handle.spawn(async move {
                let mut interval = tokio::time::interval(cache.sweep_interval());
                interval.tick().await;
                loop {
                    interval.tick().await;
                    cache.sweep();
                }
            })
        });

        Self {
            cache,
            dedupe: Deduplicator::new(),
            health: Arc::new(HealthMonitor::new(config.health)),
            stages: Arc::new(Stages {
                rate_limiter: AdaptiveRateLimiter::new(config.rate_limiter),
                scheduler: ConcurrencyScheduler::new(config.scheduler),
                breakers: CircuitBreakerRegistry::new(config.circuit_breaker),
                retry: RetryExecutor::new(config.retry),
                timeout: TimeoutGuard::new(config.timeout),
                metrics: Arc::clone(&metrics),
            }),
            metrics,
            sweeper,
        }
    }

    /// Create an orchestrator with every protection effectively disabled.
    ///
    /// No caching, no retries, no admission limits, and a circuit that never
    /// trips. Identical concurrent calls still coalesce.
    pub fn passthrough() -> Self {
        Self::new(ResilienceConfig {
            cache: CacheConfig {
                max_entries: 0,
                ..Default::default()
            },
            rate_limiter: RateLimiterConfig {
                base_limit: u32::MAX / 2,
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                max_concurrent: usize::MAX,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: u32::MAX,
                ..Default::default()
            },
            retry: RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            timeout: TimeoutConfig {
                default_timeout: Duration::from_secs(3600),
            },
            health: HealthConfig {
                min_calls: usize::MAX,
                ..Default::default()
            },
        })
    }

    /// Read-only health snapshot for dashboards, optionally filtered to one
    /// operation key.
    pub fn health_report(&self, operation_key: Option<&str>) -> HealthReport {
        self.health.report(operation_key)
    }

    /// Remove every cached result with a tag matching `pattern`.
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Subscribe a notification channel for health alerts. Returns an id to
    /// pass to [`Self::unsubscribe_alerts`].
    pub fn subscribe_alerts(&self, handler: Arc<dyn AlertHandler>) -> u64 {
        self.health.subscribe(handler)
    }

    /// Remove a previously subscribed alert channel.
    pub fn unsubscribe_alerts(&self, id: u64) -> bool {
        self.health.unsubscribe(id)
    }

    /// Reject queued (not yet dispatched) calls for `operation_key`.
    pub fn cancel_queued(&self, operation_key: &str) -> usize {
        self.stages.scheduler.cancel_queued(operation_key)
    }

    /// Timed-out operations still running in the background.
    pub fn active_timeouts(&self) -> Vec<ActiveTimeout> {
        self.stages.timeout.active()
    }

    /// Executions currently coalescing concurrent callers.
    pub fn in_flight_count(&self) -> usize {
        self.dedupe.in_flight_count()
    }

    /// Snapshot of cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Snapshot of scheduler slot and queue state.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.stages.scheduler.stats()
    }

    /// Metrics for every circuit breaker created so far.
    pub fn circuit_metrics(&self) -> Vec<CircuitMetrics> {
        self.stages.breakers.metrics()
    }

    /// The adaptive limit currently applied to `identity`, if it has called.
    pub fn current_rate_limit(&self, identity: &str) -> Option<u32> {
        self.stages.rate_limiter.current_limit(identity)
    }
}

impl Drop for DefaultResilienceOrchestrator {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

#[async_trait]
impl ResilienceOrchestrator for DefaultResilienceOrchestrator {
    #[instrument(skip(self, context, f), fields(operation = %operation_key))]
    async fn execute<F, Fut, T>(
        &self,
        operation_key: &str,
        context: CallContext,
        f: F,
    ) -> OperationResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<T>> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let started = Instant::now();

        if let Some(value) = self.cache.get(operation_key) {
            self.metrics
                .increment_counter(metric_names::CACHE_HITS, 1, &[]);
            debug!(operation = operation_key, "Served from cache");
            return deserialize(operation_key, value);
        }
        self.metrics
            .increment_counter(metric_names::CACHE_MISSES, 1, &[]);

        let identity = context
            .identity
            .clone()
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());
        let service = context
            .service
            .clone()
            .unwrap_or_else(|| service_from_key(operation_key));
        let attempt_timeout = context
            .timeout
            .unwrap_or_else(|| self.stages.timeout.default_timeout());

        let pipeline = run_protected(
            Arc::clone(&self.stages),
            operation_key.to_string(),
            identity,
            service,
            context.priority,
            attempt_timeout,
            f,
        );
        let (result, joined) = self.dedupe.dedupe(operation_key, pipeline).await;
        if joined {
            self.metrics
                .increment_counter(metric_names::DEDUPE_JOINS, 1, &[]);
        }

        let elapsed = started.elapsed();
        self.metrics
            .increment_counter(metric_names::REQUEST_COUNT, 1, &[]);
        self.metrics.record_histogram(
            metric_names::REQUEST_DURATION_MS,
            elapsed.as_secs_f64() * 1000.0,
            &[("operation", operation_key)],
        );
        let scheduler_stats = self.stages.scheduler.stats();
        self.metrics.set_gauge(
            metric_names::QUEUE_DEPTH,
            (scheduler_stats.queued_high + scheduler_stats.queued_normal) as f64,
            &[],
        );

        match result {
            Ok((value, attempts)) => {
                if !joined {
                    self.cache.set(
                        operation_key,
                        value.clone(),
                        context.cache_ttl,
                        context.cache_tags.clone(),
                    );
                }
                self.health
                    .record(operation_key, elapsed, true, None, attempts);
                deserialize(operation_key, value)
            }
            Err(failure) => {
                self.health.record(
                    operation_key,
                    elapsed,
                    false,
                    Some(failure.error.kind()),
                    failure.attempts,
                );
                let kind = failure.error.kind().to_string();
                self.metrics.increment_counter(
                    metric_names::REQUEST_ERRORS,
                    1,
                    &[("kind", kind.as_str())],
                );
                warn!(
                    operation = operation_key,
                    kind = %failure.error.kind(),
                    retryable = failure.retryable,
                    error = %failure.error,
                    "Call failed"
                );
                Err(OperationError {
                    operation: operation_key.to_string(),
                    retryable: failure.retryable,
                    source: failure.error,
                })
            }
        }
    }
}

/// The admission-and-execution pipeline run once per coalesced key: rate
/// limiter, scheduler slot, then the breaker-gated, deadline-guarded,
/// retried operation.
async fn run_protected<F, Fut, T>(
    stages: Arc<Stages>,
    operation_key: String,
    identity: String,
    service: String,
    priority: Priority,
    attempt_timeout: Duration,
    f: F,
) -> PipelineResult
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = CallResult<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let decision = stages.rate_limiter.check_limit(&identity);
    if !decision.allowed {
        stages
            .metrics
            .increment_counter(metric_names::RATE_LIMIT_REJECTIONS, 1, &[]);
        return Err(PipelineFailure {
            error: CallError::RateLimit {
                message: format!(
                    "admission denied for identity `{}` (current limit {})",
                    identity, decision.current_limit
                ),
                retry_after: decision.retry_after,
            },
            retryable: true,
            attempts: 0,
        });
    }

    let permit = match stages.scheduler.acquire(&operation_key, priority).await {
        Ok(permit) => permit,
        Err(error) => {
            return Err(PipelineFailure {
                error,
                retryable: false,
                attempts: 0,
            })
        }
    };

    let breaker = stages.breakers.breaker(&service);
    let attempts = AtomicU32::new(0);
    let started = Instant::now();

    let result = stages
        .retry
        .execute(&operation_key, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            if !breaker.allow() {
                stages
                    .metrics
                    .increment_counter(metric_names::CIRCUIT_REJECTIONS, 1, &[]);
                return Err(CallError::CircuitOpen {
                    service: service.clone(),
                    retry_in: breaker.retry_in(),
                });
            }

            match stages
                .timeout
                .with_timeout(&operation_key, attempt_timeout, f())
                .await
            {
                Ok(value) => {
                    breaker.on_success();
                    serde_json::to_value(value).map_err(CallError::from)
                }
                Err(error) => {
                    if matches!(error, CallError::Timeout { .. }) {
                        stages
                            .metrics
                            .increment_counter(metric_names::TIMEOUTS, 1, &[]);
                    }
                    // Non-transient refusals (auth, validation, policy) say
                    // nothing about the service's availability.
                    if error.is_retryable() {
                        breaker.on_failure();
                    }
                    Err(error)
                }
            }
        })
        .await;

    let latency = started.elapsed();
    let attempts_made = attempts.load(Ordering::SeqCst);
    if attempts_made > 1 {
        stages.metrics.increment_counter(
            metric_names::RETRY_ATTEMPTS,
            (attempts_made - 1) as u64,
            &[],
        );
    }
    // Fast fails carry no signal about downstream latency or error rate.
    if !matches!(result, Err(CallError::CircuitOpen { .. })) {
        stages
            .rate_limiter
            .record_outcome(&identity, latency, result.is_err());
    }
    drop(permit);

    match result {
        Ok(value) => Ok((value, attempts_made)),
        Err(error) => Err(PipelineFailure {
            // A retryable-kind error down here escaped the retry loop, which
            // means it exhausted it; everything else is non-retryable by kind.
            retryable: false,
            attempts: attempts_made,
            error,
        }),
    }
}

fn deserialize<T: DeserializeOwned>(operation_key: &str, value: Value) -> OperationResult<T> {
    serde_json::from_value(value)
        .map_err(|err| OperationError::terminal(operation_key, CallError::from(err)))
}

fn service_from_key(operation_key: &str) -> String {
    operation_key
        .split(':')
        .next()
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(operation_key)
        .to_string()
}
