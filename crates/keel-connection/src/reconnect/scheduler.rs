//! Attempt-bounded reconnect scheduler

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use keel_core::ReconnectPolicy;

use super::backoff::BackoffPolicy;

/// Decision produced for one reconnect cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectDecision {
    /// Retry after the given delay
    Scheduled {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt fires
        delay: Duration,
    },
    /// Attempts exhausted; no further attempt will be issued
    GivenUp {
        /// Total attempts consumed
        attempts: u32,
    },
}

/// Decides when and how many times pool initialization is retried.
///
/// Each scheduled attempt increments the attempt counter before firing.
/// Once `max_attempts` is reached the scheduler reports `GivenUp` and stays
/// there until `reset()` (a successful connection, or a manual
/// re-initialization).
pub struct ReconnectScheduler {
    backoff: BackoffPolicy,
    max_attempts: u32,
    attempts: AtomicU32,
}

impl ReconnectScheduler {
    /// Create a scheduler from a reconnect policy.
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            backoff: BackoffPolicy::from(policy),
            max_attempts: policy.max_attempts,
            attempts: AtomicU32::new(0),
        }
    }

    /// Claim the next reconnect attempt.
    ///
    /// Increments the attempt counter and returns the delay to wait before
    /// firing, or `GivenUp` when the budget is spent.
    pub fn next_attempt(&self) -> ReconnectDecision {
        let previous = self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n >= self.max_attempts { None } else { Some(n + 1) }
            });

        match previous {
            Ok(n) => {
                let attempt = n + 1;
                ReconnectDecision::Scheduled {
                    attempt,
                    delay: self.backoff.delay_for(attempt),
                }
            }
            Err(_) => ReconnectDecision::GivenUp {
                attempts: self.max_attempts,
            },
        }
    }

    /// Number of attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Whether the attempt budget is spent.
    pub fn is_given_up(&self) -> bool {
        self.attempts() >= self.max_attempts
    }

    /// Reset the attempt counter.
    ///
    /// Called on every disconnected→connected transition and on manual
    /// re-initialization.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Get the backoff policy.
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Get the maximum attempt count.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
