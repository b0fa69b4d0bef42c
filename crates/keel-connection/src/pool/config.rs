//! Pool configuration types

use std::time::Duration;

use keel_core::DatabaseConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls pool sizing, queueing backpressure, and connection lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections allowed in the pool
    max_size: usize,
    /// Maximum number of callers allowed to wait for a connection
    /// (0 = unbounded)
    queue_limit: usize,
    /// Timeout in milliseconds when acquiring a connection from the pool
    acquire_timeout_ms: u64,
    /// Timeout in milliseconds before an idle connection is closed
    idle_timeout_ms: u64,
    /// Maximum lifetime of a connection in milliseconds before it's recycled
    max_lifetime_ms: Option<u64>,
}

impl PoolConfig {
    /// Create a new pool configuration with the given maximum size
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is 0.
    pub fn new(max_size: usize) -> Self {
        assert!(
            max_size > 0,
            "max_size must be greater than 0, got {}",
            max_size
        );

        Self {
            max_size,
            queue_limit: 0,
            acquire_timeout_ms: 10_000,
            idle_timeout_ms: 600_000, // 10 minutes default
            max_lifetime_ms: None,
        }
    }

    /// Set the queue limit (0 = unbounded waiting)
    pub fn with_queue_limit(mut self, queue_limit: usize) -> Self {
        self.queue_limit = queue_limit;
        self
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Get the maximum pool size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get the queue limit
    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }
}

impl Default for PoolConfig {
    /// Default pool configuration: 10 connections, unbounded queue,
    /// 10 second acquire timeout, 10 minute idle timeout
    fn default() -> Self {
        Self::new(10)
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self::new(config.connection_limit)
            .with_queue_limit(config.queue_limit)
            .with_acquire_timeout_ms(config.acquire_timeout_ms)
    }
}
