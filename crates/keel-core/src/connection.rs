//! Connection trait: the seam between keel and a concrete database driver

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// A single physical database connection
///
/// Implemented by driver crates. One `Connection` is one physical session;
/// pooling, health checking and reconnection are layered on top and drivers
/// stay oblivious to them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Begin a transaction on this connection
    ///
    /// Drivers with native transaction APIs may override; the default issues
    /// the standard statement.
    async fn begin(&self) -> Result<()> {
        self.execute("START TRANSACTION", &[]).await?;
        Ok(())
    }

    /// Commit the open transaction on this connection
    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT", &[]).await?;
        Ok(())
    }

    /// Roll back the open transaction on this connection
    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK", &[]).await?;
        Ok(())
    }

    /// Verify the connection is alive with a minimal round trip
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Whether the connection has been closed (or marked unusable)
    fn is_closed(&self) -> bool;
}
