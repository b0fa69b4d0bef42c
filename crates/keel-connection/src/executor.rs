//! Instrumented statement execution
//!
//! Executes one statement (or one transactional unit of work) against a
//! leased connection, measuring wall-clock duration and flagging slow
//! queries. The executor never retries: retry policy belongs to the
//! connection manager and reconnect scheduler, so non-idempotent writes are
//! never silently re-run.

mod executor;


pub use executor::{ExecutorConfig, QueryExecutor, QueryMetrics};
