//! Retry policy with exponential backoff and multiplicative jitter.

use crate::errors::CallResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    /// Backoff before the first retry
    pub base_delay: Duration,
    /// Upper bound on the computed backoff, before jitter
    pub max_delay: Duration,
    /// Exponential growth factor between retries
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Executes operations, re-running transient failures with backoff.
///
/// Only errors whose kind is retryable (`network`, `timeout`, `rate_limit`,
/// `server`) consume retry slots; everything else surfaces immediately.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `f`, retrying transient failures until success or exhaustion.
    ///
    /// Exhaustion surfaces the last observed error.
    pub async fn execute<F, Fut, T>(&self, operation_key: &str, f: F) -> CallResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CallResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_key, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => {
                    if attempt > self.config.max_retries {
                        debug!(
                            operation = operation_key,
                            attempts = attempt,
                            "Retries exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.backoff_delay(attempt, error.retry_after());
                    debug!(
                        operation = operation_key,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Retrying after transient failure"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Backoff before retry number `attempt`.
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt-1))`, scaled by a
    /// random factor in `[0.5, 1.0)` so concurrent callers do not retry in
    /// lockstep. A longer server-provided retry-after wins over the computed
    /// delay.
    fn backoff_delay(&self, attempt: u32, server_retry_after: Option<Duration>) -> Duration {
        let exponential = self.config.base_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = exponential.min(self.config.max_delay.as_millis() as f64);
        let jitter = 0.5 + rand::random::<f64>() * 0.5;
        let computed = Duration::from_millis((capped * jitter) as u64);

        match server_retry_after {
            Some(server_delay) if server_delay > computed => server_delay,
            _ => computed,
        }
    }
}
