//! Manager lifecycle state and status snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the connection manager
///
/// ```text
/// Uninitialized -> Connecting -> Connected
///       Connected -(health failure)-> ReconnectScheduled -> Connecting -> ...
///       ReconnectScheduled -(attempts exhausted)-> GivenUp
/// ```
///
/// `GivenUp` is terminal for the background machinery; a manual
/// `initialize()` escapes it. `Closed` is terminal and reachable from every
/// state via `shutdown()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// No pool has been built yet
    Uninitialized,
    /// A pool is being constructed
    Connecting,
    /// The pool is live and healthy
    Connected,
    /// A reconnect attempt is pending
    ReconnectScheduled,
    /// Reconnect attempts exhausted; manual intervention required
    GivenUp,
    /// The manager has been shut down
    Closed,
}

impl ManagerState {
    /// Whether the database is currently reachable through the pool
    pub fn is_connected(&self) -> bool {
        matches!(self, ManagerState::Connected)
    }
}

/// Read-only snapshot of manager state for health-check endpoints
///
/// Serializable so an HTTP liveness/readiness handler can return it
/// directly.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    /// Current lifecycle state
    pub state: ManagerState,
    /// Whether the database is reachable
    pub is_connected: bool,
    /// Consecutive health/query failures since the last success
    pub consecutive_errors: u32,
    /// Reconnect attempts consumed since the last successful connection
    pub reconnect_attempts: u32,
    /// When the last successful health probe completed
    pub last_health_check_at: Option<DateTime<Utc>>,
}
