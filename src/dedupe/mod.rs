//! In-flight request coalescing.
//!
//! Concurrent calls that share an operation key collapse into a single
//! execution: the first caller installs a shared future, later callers await a
//! clone of it, and the settled value propagates identically to every
//! subscriber. A failed execution is not re-run once per subscriber; it runs
//! once per key. Settled values must be cheap to clone, which is why the
//! orchestrator coalesces on `serde_json::Value` results rather than typed
//! responses.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct InFlightEntry<T: Clone + Send + Sync + 'static> {
    future: Shared<BoxFuture<'static, T>>,
    subscribers: u64,
    started_at: Instant,
}

/// Diagnostic view of one in-flight execution.
#[derive(Debug, Clone)]
pub struct InFlightInfo {
    /// Operation key the execution is registered under
    pub key: String,
    /// Callers currently awaiting this execution
    pub subscribers: u64,
    /// When the execution was installed
    pub started_at: Instant,
}

/// Collapses concurrent identical calls into one shared execution.
pub struct Deduplicator<T: Clone + Send + Sync + 'static> {
    in_flight: Arc<Mutex<HashMap<String, InFlightEntry<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Deduplicator<T> {
    /// Create an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` under `key`, or join an execution already in flight.
    ///
    /// Returns the settled value and whether this caller joined an existing
    /// execution (`true`) or installed a new one (`false`). The in-flight
    /// entry is removed when the execution settles; `operation` is dropped
    /// unpolled when an execution already exists.
    pub async fn dedupe<Fut>(&self, key: &str, operation: Fut) -> (T, bool)
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shared, joined) = {
            let mut in_flight = self.in_flight.lock();
            let existing = in_flight.get_mut(key).map(|entry| {
                entry.subscribers += 1;
                debug!(key, subscribers = entry.subscribers, "Joined in-flight call");
                entry.future.clone()
            });

            match existing {
                Some(shared) => (shared, true),
                None => {
                    let registry = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    let shared = async move {
                        let result = operation.await;
                        registry.lock().remove(&owned_key);
                        result
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(
                        key.to_string(),
                        InFlightEntry {
                            future: shared.clone(),
                            subscribers: 1,
                            started_at: Instant::now(),
                        },
                    );
                    (shared, false)
                }
            }
        };

        (shared.await, joined)
    }

    /// Number of executions currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Diagnostic snapshot of every in-flight execution.
    pub fn in_flight(&self) -> Vec<InFlightInfo> {
        self.in_flight
            .lock()
            .iter()
            .map(|(key, entry)| InFlightInfo {
                key: key.clone(),
                subscribers: entry.subscribers,
                started_at: entry.started_at,
            })
            .collect()
    }
}
