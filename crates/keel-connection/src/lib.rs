//! Keel Connection - Resilient pooled access to a relational store
//!
//! This crate owns the pooled connection to the database, continuously
//! verifies its health, recovers from transient outages through
//! backoff-scheduled reconnection, executes queries and transactions with
//! instrumentation, and participates in graceful process shutdown.

pub mod executor;
pub mod health;
pub mod manager;
pub mod pool;
pub mod reconnect;
pub mod shutdown;

pub use executor::{ExecutorConfig, QueryExecutor, QueryMetrics};
pub use health::{HealthConfig, HealthMonitor, HealthOutcome};
pub use manager::{ConnectionManager, ManagerState, ManagerStatus};
pub use pool::{ConnectionFactory, ConnectionPool, LeasedConnection, PoolConfig, PoolStats};
pub use reconnect::{BackoffPolicy, ReconnectDecision, ReconnectScheduler};
pub use shutdown::{ShutdownSignal, Shutdownable};
