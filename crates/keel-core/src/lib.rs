//! Keel Core - Shared abstractions for the keel data-access layer
//!
//! This crate provides the vocabulary that the connection layer and driver
//! crates share:
//!
//! - `Connection` - Trait for one physical database connection
//! - `KeelError` / `Result` - Error taxonomy (transient vs. statement)
//! - `Value`, `Row`, `QueryResult`, `StatementResult` - SQL data types
//! - `DatabaseConfig`, `ReconnectPolicy` - startup configuration

mod config;
mod connection;
mod error;
mod types;

pub use config::{DatabaseConfig, ReconnectPolicy};
pub use connection::Connection;
pub use error::{KeelError, Result};
pub use types::{QueryResult, Row, StatementResult, Value};
