//! Per-service circuit breaker.
//!
//! Each downstream service identity gets one breaker for the process
//! lifetime. While the circuit is open, [`CircuitBreaker::allow`] refuses
//! admission without a network attempt; after the cooldown a half-open trial
//! phase decides between closing and reopening.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the tracked window that trip the circuit
    pub failure_threshold: u32,
    /// Consecutive trial successes required to close a half-open circuit
    pub success_threshold: u32,
    /// Window after which an idle failure streak is forgotten
    pub failure_window: Duration,
    /// Time an open circuit waits before admitting a trial call
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are refused without a network attempt
    Open,
    /// A limited trial decides whether the service has recovered
    HalfOpen,
}

/// Hook for circuit breaker state changes.
pub trait CircuitBreakerHook: Send + Sync {
    /// Called after the breaker for `service` moves from `old` to `new`.
    fn on_state_change(&self, service: &str, old: CircuitState, new: CircuitState);
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Failure-state machine for one downstream service.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl CircuitBreaker {
    /// Create a breaker for `service` with the given configuration.
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                opened_at: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            hook: None,
        }
    }

    /// Attach a hook for state-change notifications.
    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Whether an attempt may proceed right now.
    ///
    /// Checked before every attempt. An open circuit whose cooldown has
    /// elapsed transitions to half-open and admits the trial.
    pub fn allow(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let (allowed, change) = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed | CircuitState::HalfOpen => (true, None),
                CircuitState::Open => {
                    let cooled_down = state
                        .opened_at
                        .map(|at| at.elapsed() >= self.config.cooldown)
                        .unwrap_or(true);
                    if cooled_down {
                        (true, self.transition(&mut state, CircuitState::HalfOpen))
                    } else {
                        self.total_rejections.fetch_add(1, Ordering::Relaxed);
                        (false, None)
                    }
                }
            }
        };
        self.notify(change);
        allowed
    }

    /// Time until an open circuit admits a trial call.
    pub fn retry_in(&self) -> Option<Duration> {
        let state = self.state.lock();
        if state.state != CircuitState::Open {
            return None;
        }
        let opened_at = state.opened_at?;
        Some(self.config.cooldown.saturating_sub(opened_at.elapsed()))
    }

    /// Record a successful attempt.
    ///
    /// In the closed state the failure streak decays by one per success, so a
    /// handful of historical errors cannot leave the breaker on a hair
    /// trigger forever.
    pub fn on_success(&self) {
        let change = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => {
                    state.failure_count = state.failure_count.saturating_sub(1);
                    None
                }
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        self.transition(&mut state, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        self.notify(change);
    }

    /// Record a failed attempt.
    ///
    /// Any half-open trial failure reopens the circuit and restarts the
    /// cooldown clock.
    pub fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let change = {
            let mut state = self.state.lock();
            let now = Instant::now();
            match state.state {
                CircuitState::Closed => {
                    let streak_expired = state
                        .last_failure_at
                        .map(|at| now.duration_since(at) > self.config.failure_window)
                        .unwrap_or(false);
                    if streak_expired {
                        state.failure_count = 0;
                    }
                    state.failure_count += 1;
                    state.last_failure_at = Some(now);
                    if state.failure_count >= self.config.failure_threshold {
                        self.transition(&mut state, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    state.last_failure_at = Some(now);
                    self.transition(&mut state, CircuitState::Open)
                }
                CircuitState::Open => {
                    state.last_failure_at = Some(now);
                    None
                }
            }
        };
        self.notify(change);
    }

    /// Current state of the circuit.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Snapshot of the breaker's lifetime counters.
    pub fn metrics(&self) -> CircuitMetrics {
        let calls = self.total_calls.load(Ordering::Relaxed);
        let failures = self.total_failures.load(Ordering::Relaxed);
        CircuitMetrics {
            service: self.service.clone(),
            state: self.state(),
            total_calls: calls,
            total_failures: failures,
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            failure_rate: if calls == 0 {
                0.0
            } else {
                failures as f64 / calls as f64
            },
        }
    }

    /// Applies a state change and reports it; hooks run later, once the state
    /// lock has been released.
    fn transition(
        &self,
        state: &mut BreakerState,
        new_state: CircuitState,
    ) -> Option<(CircuitState, CircuitState)> {
        let old_state = state.state;
        if old_state == new_state {
            return None;
        }
        state.state = new_state;
        state.success_count = 0;
        match new_state {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                warn!(service = %self.service, ?old_state, "Circuit opened");
            }
            CircuitState::Closed => {
                state.failure_count = 0;
                state.opened_at = None;
                debug!(service = %self.service, "Circuit closed");
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service, "Circuit half-open, admitting trial calls");
            }
        }
        Some((old_state, new_state))
    }

    fn notify(&self, change: Option<(CircuitState, CircuitState)>) {
        if let (Some(hook), Some((old, new))) = (&self.hook, change) {
            hook.on_state_change(&self.service, old, new);
        }
    }
}

/// Lifetime counters for one service's breaker.
#[derive(Debug, Clone)]
pub struct CircuitMetrics {
    /// Downstream service identity
    pub service: String,
    /// Current state
    pub state: CircuitState,
    /// Admission checks performed
    pub total_calls: u64,
    /// Failures recorded
    pub total_failures: u64,
    /// Calls refused while open
    pub total_rejections: u64,
    /// Failures per admission check (0.0 to 1.0)
    pub failure_rate: f64,
}

/// One circuit breaker per downstream service identity.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers share `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            hook: None,
        }
    }

    /// Attach a hook applied to every breaker created afterwards.
    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The breaker for `service`, created on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(service.to_string()).or_insert_with(|| {
            let mut breaker = CircuitBreaker::new(service, self.config.clone());
            if let Some(hook) = &self.hook {
                breaker = breaker.with_hook(Arc::clone(hook));
            }
            Arc::new(breaker)
        }))
    }

    /// Metrics for every breaker created so far.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        self.breakers
            .lock()
            .values()
            .map(|breaker| breaker.metrics())
            .collect()
    }
}
