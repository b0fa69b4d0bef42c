//! Configuration for the data-access layer
//!
//! These structs are deserialized from the application's config source at
//! the composition root and handed to the connection manager. They are never
//! mutated after construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection parameters and operational limits for one database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Database (schema) name
    pub database: String,
    /// Maximum number of pooled connections
    #[serde(default = "default_connection_limit")]
    pub connection_limit: usize,
    /// Maximum number of callers allowed to wait for a connection
    /// (0 = unbounded; beyond the limit acquisition fails fast)
    #[serde(default)]
    pub queue_limit: usize,
    /// Timeout when acquiring a connection from the pool, in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// TCP keep-alive initial delay, in milliseconds
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_initial_delay_ms: u64,
    /// Interval between background health probes, in milliseconds
    #[serde(default = "default_health_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Timeout for a single health probe, in milliseconds
    ///
    /// Deliberately shorter than ordinary query timeouts so a hung backend
    /// cannot leave the monitor stuck before detecting failure.
    #[serde(default = "default_probe_timeout_ms")]
    pub health_probe_timeout_ms: u64,
    /// Queries slower than this are logged at warn level, in milliseconds
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_threshold_ms: u64,
    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl DatabaseConfig {
    /// Create a config with the given connection parameters and default limits
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            password: password.into(),
            database: database.into(),
            connection_limit: default_connection_limit(),
            queue_limit: 0,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            keep_alive_initial_delay_ms: default_keep_alive_ms(),
            health_check_interval_ms: default_health_interval_ms(),
            health_probe_timeout_ms: default_probe_timeout_ms(),
            slow_query_threshold_ms: default_slow_query_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Health check interval as a Duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Health probe timeout as a Duration
    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }

    /// Slow query threshold as a Duration
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

/// Policy governing when and how many times pool initialization is retried
/// after a detected failure
///
/// Created once at startup; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the computed delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts after which the manager gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Multiplier applied per attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Fraction of the delay added as random jitter (0.0 = none)
    ///
    /// Jitter avoids synchronized retry storms when several manager
    /// instances in a fleet lose the same backend at once.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

fn default_port() -> u16 {
    3306
}

fn default_connection_limit() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_keep_alive_ms() -> u64 {
    10_000
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_slow_query_ms() -> u64 {
    1_000
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_jitter_ratio() -> f64 {
    0.2
}
