//! Health monitor for a connection pool

use std::sync::Arc;
use std::time::Duration;

use keel_core::DatabaseConfig;

use super::probe::probe;
use crate::pool::ConnectionPool;

/// Configuration for health monitoring
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between health checks
    pub interval: Duration,
    /// Timeout for each probe
    ///
    /// Shorter than ordinary query timeouts so the monitor detects a hung
    /// backend instead of waiting on it.
    pub probe_timeout: Duration,
}

impl HealthConfig {
    /// Create a new health configuration with the given check interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Set the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl From<&DatabaseConfig> for HealthConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self::new(config.health_check_interval())
            .with_probe_timeout(config.health_probe_timeout())
    }
}

/// Outcome of a single health check
#[derive(Debug, Clone)]
pub enum HealthOutcome {
    /// The probe round trip completed
    Healthy {
        /// Round-trip time of the probe
        latency: Duration,
    },
    /// The probe failed or timed out
    Unhealthy {
        /// The failure, rendered for logging
        error: String,
    },
}

impl HealthOutcome {
    /// Whether the check succeeded
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }
}

/// Health monitor for a connection pool.
///
/// Leases a connection like any other caller: it competes for the pool and
/// is never exempted, so a saturated pool shows up as an unhealthy reading
/// rather than a false positive.
pub struct HealthMonitor {
    config: HealthConfig,
}

impl HealthMonitor {
    /// Create a new health monitor with the given configuration.
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    /// Get the check interval from the configuration.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Perform a single health check against the pool.
    pub async fn check(&self, pool: &Arc<ConnectionPool>) -> HealthOutcome {
        let lease = match pool.get().await {
            Ok(lease) => lease,
            Err(e) => {
                return HealthOutcome::Unhealthy {
                    error: e.to_string(),
                };
            }
        };

        match probe(&*lease, self.config.probe_timeout).await {
            Ok(latency) => {
                tracing::debug!(latency_ms = latency.as_millis() as u64, "health probe ok");
                HealthOutcome::Healthy { latency }
            }
            Err(e) => HealthOutcome::Unhealthy {
                error: e.to_string(),
            },
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
