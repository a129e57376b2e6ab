//! Bounded concurrency with priority admission.
//!
//! Calls acquire a slot before running; when every slot is busy they queue,
//! high priority draining strictly before normal and FIFO within each level.
//! Slots release on [`SlotPermit`] drop, so every exit path (success, error,
//! panic unwind) frees its slot and dispatches the next waiter. Low-priority
//! starvation under sustained high-priority load is accepted behavior.

use crate::errors::{CallError, CallResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Admission priority for scheduled calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Drains before any queued normal-priority work
    High,
    /// Default service level
    #[default]
    Normal,
}

/// Configuration for the concurrency scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Calls allowed to run at once
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: crate::DEFAULT_MAX_CONCURRENT,
        }
    }
}

struct Waiter {
    key: String,
    enqueued_at: Instant,
    tx: oneshot::Sender<CallResult<SlotPermit>>,
}

struct SchedulerState {
    running: usize,
    high: VecDeque<Waiter>,
    normal: VecDeque<Waiter>,
    dispatched: u64,
    wait_samples: u64,
    average_wait_ms: f64,
    exec_samples: u64,
    average_exec_ms: f64,
}

impl SchedulerState {
    fn record_wait(&mut self, wait: Duration) {
        self.wait_samples += 1;
        let ms = wait.as_secs_f64() * 1000.0;
        self.average_wait_ms += (ms - self.average_wait_ms) / self.wait_samples as f64;
    }

    fn record_exec(&mut self, held: Duration) {
        self.exec_samples += 1;
        let ms = held.as_secs_f64() * 1000.0;
        self.average_exec_ms += (ms - self.average_exec_ms) / self.exec_samples as f64;
    }
}

struct SchedulerInner {
    max_concurrent: usize,
    state: Mutex<SchedulerState>,
}

impl SchedulerInner {
    fn release(self: &Arc<Self>, held_for: Duration) {
        let mut state = self.state.lock();
        state.running -= 1;
        state.record_exec(held_for);
        self.dispatch(&mut state);
    }

    fn dispatch(self: &Arc<Self>, state: &mut SchedulerState) {
        while state.running < self.max_concurrent {
            let waiter = state.high.pop_front().or_else(|| state.normal.pop_front());
            let Some(waiter) = waiter else { break };

            state.record_wait(waiter.enqueued_at.elapsed());
            state.running += 1;
            state.dispatched += 1;
            let permit = SlotPermit::new(Arc::clone(self));
            if let Err(unclaimed) = waiter.tx.send(Ok(permit)) {
                // The waiter gave up before dispatch; reclaim its slot and
                // keep draining.
                if let Ok(mut permit) = unclaimed {
                    permit.disarm();
                }
                state.running -= 1;
                state.dispatched -= 1;
            }
        }
    }
}

/// A held execution slot, released on drop.
pub struct SlotPermit {
    inner: Option<Arc<SchedulerInner>>,
    acquired_at: Instant,
}

impl SlotPermit {
    fn new(inner: Arc<SchedulerInner>) -> Self {
        Self {
            inner: Some(inner),
            acquired_at: Instant::now(),
        }
    }

    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release(self.acquired_at.elapsed());
        }
    }
}

/// Observability snapshot of the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerStats {
    /// Slots currently held
    pub running: usize,
    /// High-priority waiters queued
    pub queued_high: usize,
    /// Normal-priority waiters queued
    pub queued_normal: usize,
    /// Slots handed out over the scheduler's lifetime
    pub dispatched: u64,
    /// Running mean time spent queued
    pub average_wait: Duration,
    /// Running mean time a slot was held
    pub average_execution: Duration,
}

/// Priority admission queue over a fixed pool of execution slots.
pub struct ConcurrencyScheduler {
    inner: Arc<SchedulerInner>,
}

impl ConcurrencyScheduler {
    /// Create a scheduler with the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                max_concurrent: config.max_concurrent.max(1),
                state: Mutex::new(SchedulerState {
                    running: 0,
                    high: VecDeque::new(),
                    normal: VecDeque::new(),
                    dispatched: 0,
                    wait_samples: 0,
                    average_wait_ms: 0.0,
                    exec_samples: 0,
                    average_exec_ms: 0.0,
                }),
            }),
        }
    }

    /// Acquire a slot, queueing by priority when all slots are busy.
    pub async fn acquire(&self, operation_key: &str, priority: Priority) -> CallResult<SlotPermit> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.running < self.inner.max_concurrent {
                state.running += 1;
                state.dispatched += 1;
                state.record_wait(Duration::ZERO);
                return Ok(SlotPermit::new(Arc::clone(&self.inner)));
            }

            let (tx, rx) = oneshot::channel();
            let waiter = Waiter {
                key: operation_key.to_string(),
                enqueued_at: Instant::now(),
                tx,
            };
            match priority {
                Priority::High => state.high.push_back(waiter),
                Priority::Normal => state.normal.push_back(waiter),
            }
            debug!(
                operation = operation_key,
                ?priority,
                queued_high = state.high.len(),
                queued_normal = state.normal.len(),
                "All slots busy, queued"
            );
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::Canceled {
                operation: operation_key.to_string(),
            }),
        }
    }

    /// Reject every queued (not yet dispatched) waiter for `operation_key`.
    ///
    /// Returns the number of waiters removed. In-flight calls are unaffected;
    /// they can only time out.
    pub fn cancel_queued(&self, operation_key: &str) -> usize {
        let cancelled = {
            let mut state = self.inner.state.lock();
            let mut taken = Vec::new();
            drain_matching(&mut state.high, operation_key, &mut taken);
            drain_matching(&mut state.normal, operation_key, &mut taken);
            taken
        };

        let count = cancelled.len();
        for waiter in cancelled {
            let _ = waiter.tx.send(Err(CallError::Canceled {
                operation: operation_key.to_string(),
            }));
        }
        if count > 0 {
            debug!(operation = operation_key, count, "Cancelled queued waiters");
        }
        count
    }

    /// Snapshot of slot and queue state.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            running: state.running,
            queued_high: state.high.len(),
            queued_normal: state.normal.len(),
            dispatched: state.dispatched,
            average_wait: Duration::from_secs_f64(state.average_wait_ms / 1000.0),
            average_execution: Duration::from_secs_f64(state.average_exec_ms / 1000.0),
        }
    }
}

fn drain_matching(queue: &mut VecDeque<Waiter>, key: &str, out: &mut Vec<Waiter>) {
    let mut retained = VecDeque::with_capacity(queue.len());
    while let Some(waiter) = queue.pop_front() {
        if waiter.key == key {
            out.push(waiter);
        } else {
            retained.push_back(waiter);
        }
    }
    *queue = retained;
}
