//! Failure-handling stages of the call pipeline: circuit breaking, adaptive
//! rate limiting, retries, and deadline enforcement.

mod circuit_breaker;
mod rate_limiter;
mod retry;
mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook, CircuitBreakerRegistry,
    CircuitMetrics, CircuitState,
};
pub use rate_limiter::{AdaptiveRateLimiter, RateDecision, RateLimiterConfig};
pub use retry::{RetryConfig, RetryExecutor};
pub use timeout::{ActiveTimeout, TimeoutConfig, TimeoutGuard};
