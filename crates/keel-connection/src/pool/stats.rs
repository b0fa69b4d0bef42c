//! Point-in-time pool counters

use serde::{Deserialize, Serialize};

/// Snapshot of pool occupancy at one instant.
///
/// `total` is always `idle + active`; `waiting` counts callers currently
/// blocked in `get()`. The snapshot is not transactional across fields and
/// is meant for status endpoints and log events, not for control decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    total: usize,
    idle: usize,
    active: usize,
    waiting: usize,
}

impl PoolStats {
    pub(crate) fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self {
            total,
            idle,
            active,
            waiting,
        }
    }

    /// Connections the pool currently holds or has lent out.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Connections sitting in the idle queue, ready to lease.
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Connections currently leased to callers.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Callers blocked waiting for a lease.
    pub fn waiting(&self) -> usize {
        self.waiting
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}
