//! Error types for keel

use thiserror::Error;

/// Core error type for keel operations
///
/// Errors fall into two families that callers and the reconnect machinery
/// treat differently:
///
/// - *transient* errors are connection-level (broken socket, timeout, pool
///   exhausted): retry-worthy at the pool level, and they may indicate the
///   underlying pool needs rebuilding;
/// - *statement* errors are inherent to the issued statement (constraint
///   violation, bad SQL): the connection itself is healthy and reconnecting
///   would accomplish nothing.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out waiting for a pooled connection: {0}")]
    PoolTimeout(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    GivenUp { attempts: u32 },

    #[error("Connection manager is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KeelError {
    /// Whether the error is connection-level and therefore retry-worthy
    /// at the pool level.
    ///
    /// Statement-level errors never trigger reconnection: the connection
    /// that produced them is still usable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeelError::Connection(_)
                | KeelError::PoolTimeout(_)
                | KeelError::PoolExhausted(_)
                | KeelError::Io(_)
        )
    }
}

/// Result type alias for keel operations
pub type Result<T> = std::result::Result<T, KeelError>;
