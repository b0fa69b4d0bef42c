//! Database probe implementation
//!
//! A minimal round trip used solely to verify that a connection is alive,
//! bounded by its own short timeout so a hung backend cannot leave the
//! monitor stuck.

use std::time::{Duration, Instant};

use keel_core::{Connection, KeelError, Result};

/// Probe a database connection to check if it's alive.
///
/// Runs the driver's ping (a `SELECT 1`-equivalent) under the given timeout
/// and returns the round-trip time.
pub async fn probe(conn: &dyn Connection, timeout: Duration) -> Result<Duration> {
    if conn.is_closed() {
        return Err(KeelError::Connection("connection is closed".into()));
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, conn.ping()).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(KeelError::Connection(format!(
            "health probe timed out after {:?}",
            timeout
        ))),
    }
}
