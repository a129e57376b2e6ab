//! Aggregated configuration for the call subsystem.

use crate::cache::CacheConfig;
use crate::health::HealthConfig;
use crate::resilience::{
    CircuitBreakerConfig, RateLimiterConfig, RetryConfig, TimeoutConfig,
};
use crate::scheduler::SchedulerConfig;

/// Configuration for every stage of the call pipeline.
///
/// Each component carries its own defaults; this struct exists so a host
/// application can tune the whole subsystem in one place.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    /// Response cache settings
    pub cache: CacheConfig,
    /// Adaptive rate limiter settings
    pub rate_limiter: RateLimiterConfig,
    /// Concurrency scheduler settings
    pub scheduler: SchedulerConfig,
    /// Per-service circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry policy settings
    pub retry: RetryConfig,
    /// Deadline enforcement settings
    pub timeout: TimeoutConfig,
    /// Health monitoring and alerting settings
    pub health: HealthConfig,
}

impl ResilienceConfig {
    /// Creates a configuration with every component at its defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache configuration.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Sets the rate limiter configuration.
    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = config;
        self
    }

    /// Sets the scheduler configuration.
    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Sets the timeout configuration.
    pub fn timeout(mut self, config: TimeoutConfig) -> Self {
        self.timeout = config;
        self
    }

    /// Sets the health monitoring configuration.
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }
}
