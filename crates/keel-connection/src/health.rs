//! Health monitoring for the connection pool
//!
//! Detects silent connection loss between explicit queries: a monitor
//! periodically leases a connection, runs a trivial probe statement, and
//! reports the outcome to the connection manager. Probe failures are never
//! thrown (there is no synchronous caller to receive them); they become
//! state transitions in the manager.

mod monitor;
mod probe;


pub use monitor::{HealthConfig, HealthMonitor, HealthOutcome};
pub use probe::probe;
