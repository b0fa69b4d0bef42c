//! Exponential backoff calculator for reconnect delays
//!
//! Implements exponential backoff with proportional jitter, preventing
//! thundering-herd reconnect storms when several manager instances in a
//! fleet lose the same backend at once.

use std::time::Duration;

use keel_core::ReconnectPolicy;
use rand::Rng;

/// Exponential backoff policy for reconnect attempts.
///
/// For a 1-based attempt number the delay is
/// `min(max_delay, base_delay × factor^(attempt-1) × (1 + random() × jitter_ratio))`.
/// With `jitter_ratio = 0` the sequence is exact, non-decreasing, and capped.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay in milliseconds before the first retry
    base_ms: u64,
    /// Cap in milliseconds for exponential growth
    max_ms: u64,
    /// Multiplier for exponential growth
    factor: f64,
    /// Fraction of the delay added as random jitter (0.0 = none)
    jitter_ratio: f64,
}

impl BackoffPolicy {
    /// Create a new backoff policy.
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms: base_ms.max(1),
            max_ms: max_ms.max(base_ms),
            factor: 1.5,
            jitter_ratio: 0.0,
        }
    }

    /// Set the multiplier for exponential growth (clamped to at least 1.0).
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    /// Set the jitter ratio (clamped to non-negative).
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.max(0.0);
        self
    }

    /// Calculate the delay for a given attempt number.
    ///
    /// Attempts are 1-based: attempt 1 returns the base delay (plus jitter),
    /// with subsequent attempts growing exponentially up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let raw_ms = (self.base_ms as f64) * self.factor.powi(exponent as i32);

        let jittered_ms = if self.jitter_ratio > 0.0 {
            let jitter: f64 = rand::thread_rng().r#gen::<f64>() * self.jitter_ratio;
            raw_ms * (1.0 + jitter)
        } else {
            raw_ms
        };

        Duration::from_millis(jittered_ms.min(self.max_ms as f64) as u64)
    }

    /// Get the base delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    /// Get the maximum delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Get the growth factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Get the jitter ratio.
    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }
}

impl Default for BackoffPolicy {
    /// Default backoff: 5 second base, 30 second cap, 1.5x factor, 0.2 jitter
    fn default() -> Self {
        Self::from(&ReconnectPolicy::default())
    }
}

impl From<&ReconnectPolicy> for BackoffPolicy {
    fn from(policy: &ReconnectPolicy) -> Self {
        Self::new(policy.base_delay_ms, policy.max_delay_ms)
            .with_factor(policy.backoff_factor)
            .with_jitter_ratio(policy.jitter_ratio)
    }
}
