//! Adaptive per-identity admission control.
//!
//! Each identity (typically caller + service) gets a sliding window of
//! admission timestamps. After every completed call the limit adjusts
//! multiplicatively from observed latency and error rate, backing off from a
//! struggling downstream service without manual tuning. The step sizes are
//! heuristic and deliberately config-tunable.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the adaptive rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Admissions allowed per window before adaptation
    pub base_limit: u32,
    /// Length of the sliding admission window
    pub window: Duration,
    /// Bounded capacity of the latency/error sample rings
    pub sample_capacity: usize,
    /// Samples required before the limit adapts
    pub min_samples: usize,
    /// Average latency at or below which the downstream counts as healthy
    pub good_latency: Duration,
    /// Error rate above which the downstream counts as struggling
    pub max_error_rate: f64,
    /// Multiplier applied when the downstream looks healthy
    pub increase_factor: f64,
    /// Multiplier applied when the downstream looks struggling
    pub decrease_factor: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_limit: crate::DEFAULT_BASE_RATE_LIMIT,
            window: Duration::from_secs(60),
            sample_capacity: 100,
            min_samples: 10,
            good_latency: Duration::from_secs(1),
            max_error_rate: 0.1,
            increase_factor: 1.1,
            decrease_factor: 0.9,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    /// Whether the call may proceed
    pub allowed: bool,
    /// Time until the window frees a slot, when denied
    pub retry_after: Option<Duration>,
    /// The identity's limit at decision time
    pub current_limit: u32,
}

struct RateWindow {
    current_limit: f64,
    admissions: VecDeque<Instant>,
    latencies: VecDeque<Duration>,
    errors: VecDeque<bool>,
}

impl RateWindow {
    fn new(base_limit: u32) -> Self {
        Self {
            current_limit: base_limit as f64,
            admissions: VecDeque::new(),
            latencies: VecDeque::new(),
            errors: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admissions.front() {
            if now.duration_since(*oldest) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter with latency/error feedback.
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl AdaptiveRateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a call under `identity` may start now.
    ///
    /// Admission appends a timestamp to the identity's window; denial reports
    /// how long until the oldest admission slides out.
    pub fn check_limit(&self, identity: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow::new(self.config.base_limit));
        window.prune(now, self.config.window);

        let limit = window.current_limit.floor() as usize;
        if window.admissions.len() < limit {
            window.admissions.push_back(now);
            RateDecision {
                allowed: true,
                retry_after: None,
                current_limit: limit as u32,
            }
        } else {
            let retry_after = window.admissions.front().map(|oldest| {
                self.config
                    .window
                    .saturating_sub(now.duration_since(*oldest))
            });
            debug!(identity, limit, "Rate limit admission denied");
            RateDecision {
                allowed: false,
                retry_after,
                current_limit: limit as u32,
            }
        }
    }

    /// Feed the outcome of a completed call back into the control loop.
    ///
    /// Healthy windows (low latency, low error rate) grow the limit by the
    /// increase factor up to `2 x base_limit`; struggling windows shrink it
    /// down to `0.5 x base_limit`.
    pub fn record_outcome(&self, identity: &str, latency: Duration, error_occurred: bool) {
        let mut windows = self.windows.lock();
        let window = windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow::new(self.config.base_limit));

        window.latencies.push_back(latency);
        window.errors.push_back(error_occurred);
        while window.latencies.len() > self.config.sample_capacity {
            window.latencies.pop_front();
        }
        while window.errors.len() > self.config.sample_capacity {
            window.errors.pop_front();
        }

        if window.latencies.len() < self.config.min_samples {
            return;
        }

        let total: Duration = window.latencies.iter().sum();
        let average_latency = total / window.latencies.len() as u32;
        let error_rate = window.errors.iter().filter(|e| **e).count() as f64
            / window.errors.len() as f64;

        let base = self.config.base_limit as f64;
        let previous = window.current_limit;
        if average_latency <= self.config.good_latency && error_rate <= self.config.max_error_rate
        {
            window.current_limit = (previous * self.config.increase_factor).min(base * 2.0);
        } else {
            window.current_limit = (previous * self.config.decrease_factor).max(base * 0.5);
        }

        if (window.current_limit - previous).abs() > f64::EPSILON {
            debug!(
                identity,
                previous_limit = previous,
                current_limit = window.current_limit,
                average_latency_ms = average_latency.as_millis(),
                error_rate,
                "Adapted rate limit"
            );
        }
    }

    /// The current limit for `identity`, if it has a window.
    pub fn current_limit(&self, identity: &str) -> Option<u32> {
        self.windows
            .lock()
            .get(identity)
            .map(|window| window.current_limit.floor() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(config: RateLimiterConfig) -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(config)
    }

    #[test]
    fn test_admits_until_window_full() {
        let limiter = limiter(RateLimiterConfig {
            base_limit: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(limiter.check_limit("user").allowed);
        }

        let denied = limiter.check_limit("user");
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());
        assert_eq!(denied.current_limit, 3);
    }

    #[test]
    fn test_window_slides_and_readmits() {
        let limiter = limiter(RateLimiterConfig {
            base_limit: 1,
            window: Duration::from_millis(30),
            ..Default::default()
        });

        assert!(limiter.check_limit("user").allowed);
        assert!(!limiter.check_limit("user").allowed);

        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.check_limit("user").allowed);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter(RateLimiterConfig {
            base_limit: 1,
            ..Default::default()
        });

        assert!(limiter.check_limit("a").allowed);
        assert!(!limiter.check_limit("a").allowed);
        assert!(limiter.check_limit("b").allowed);
    }

    #[test]
    fn test_healthy_outcomes_grow_limit_to_cap() {
        let config = RateLimiterConfig {
            base_limit: 10,
            min_samples: 1,
            ..Default::default()
        };
        let limiter = limiter(config);

        let mut previous = 10;
        for _ in 0..30 {
            limiter.record_outcome("user", Duration::from_millis(50), false);
            let current = limiter.current_limit("user").unwrap();
            assert!(current >= previous);
            previous = current;
        }
        // Capped at 2 x base_limit.
        assert_eq!(previous, 20);
    }

    #[test]
    fn test_errors_shrink_limit_to_floor() {
        let config = RateLimiterConfig {
            base_limit: 10,
            min_samples: 1,
            ..Default::default()
        };
        let limiter = limiter(config);

        for _ in 0..30 {
            limiter.record_outcome("user", Duration::from_millis(50), true);
        }
        // Floored at 0.5 x base_limit.
        assert_eq!(limiter.current_limit("user").unwrap(), 5);
    }

    #[test]
    fn test_high_latency_shrinks_limit() {
        let config = RateLimiterConfig {
            base_limit: 10,
            min_samples: 1,
            good_latency: Duration::from_millis(100),
            ..Default::default()
        };
        let limiter = limiter(config);

        limiter.record_outcome("user", Duration::from_secs(2), false);
        assert_eq!(limiter.current_limit("user").unwrap(), 9);
    }

    #[test]
    fn test_no_adaptation_below_min_samples() {
        let config = RateLimiterConfig {
            base_limit: 10,
            min_samples: 5,
            ..Default::default()
        };
        let limiter = limiter(config);

        limiter.record_outcome("user", Duration::from_millis(50), false);
        assert_eq!(limiter.current_limit("user").unwrap(), 10);
    }
}
