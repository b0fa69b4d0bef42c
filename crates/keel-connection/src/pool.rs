//! Connection pooling for database connections
//!
//! This module provides connection pooling with bounded concurrency,
//! queue-limit backpressure, and statistics tracking.
//!
//! # Example
//!
//! ```ignore
//! use keel_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(10)
//!     .with_queue_limit(50)
//!     .with_acquire_timeout_ms(10_000);
//!
//! let pool = Arc::new(ConnectionPool::new(config, connection_factory));
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection returned to pool on drop
//! ```

mod config;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use pool::{ConnectionFactory, ConnectionPool, LeasedConnection};
pub use stats::PoolStats;
