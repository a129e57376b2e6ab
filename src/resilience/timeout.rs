//! Per-attempt deadline enforcement.
//!
//! An attempt that outlives its deadline fails with a `timeout` error, but the
//! underlying operation is not forcibly cancelled: it keeps running on its own
//! task, registered as an orphan for diagnostic visibility, and its eventual
//! result is discarded.

use crate::errors::{CallError, CallResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for deadline enforcement.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Deadline applied when the call context does not specify one
    pub default_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// An operation that timed out but is still running.
#[derive(Debug, Clone)]
pub struct ActiveTimeout {
    /// Registry id of the orphaned operation
    pub id: u64,
    /// Operation key of the orphaned operation
    pub operation: String,
    /// When the attempt started
    pub started_at: Instant,
    /// The deadline that was exceeded
    pub timeout: Duration,
}

/// Races operations against their deadline and tracks the orphans.
pub struct TimeoutGuard {
    config: TimeoutConfig,
    active: Arc<Mutex<HashMap<u64, ActiveTimeout>>>,
    next_id: AtomicU64,
}

impl TimeoutGuard {
    /// Create a guard with the given configuration.
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Deadline to apply when the caller did not choose one.
    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Run `operation` with a deadline of `timeout`.
    ///
    /// On expiry the attempt fails with [`CallError::Timeout`]; the operation
    /// keeps running on its own task and is removed from the orphan registry
    /// once it settles.
    pub async fn with_timeout<Fut, T>(
        &self,
        operation_key: &str,
        timeout: Duration,
        operation: Fut,
    ) -> CallResult<T>
    where
        Fut: Future<Output = CallResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let started_at = Instant::now();
        let mut handle = tokio::spawn(operation);

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(join_error) => Err(CallError::Server {
                    message: format!("operation task failed: {}", join_error),
                    status_code: None,
                }),
            },
            _ = tokio::time::sleep(timeout) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.active.lock().insert(id, ActiveTimeout {
                    id,
                    operation: operation_key.to_string(),
                    started_at,
                    timeout,
                });
                warn!(
                    operation = operation_key,
                    timeout_ms = timeout.as_millis(),
                    "Attempt timed out, operation left running as orphan"
                );

                let registry = Arc::clone(&self.active);
                let owned_key = operation_key.to_string();
                tokio::spawn(async move {
                    // Late result (or panic) is discarded either way.
                    let _ = handle.await;
                    registry.lock().remove(&id);
                    debug!(operation = owned_key, "Orphaned operation settled");
                });

                Err(CallError::Timeout { timeout })
            }
        }
    }

    /// Snapshot of timed-out operations that have not yet settled.
    pub fn active(&self) -> Vec<ActiveTimeout> {
        self.active.lock().values().cloned().collect()
    }
}
