//! Query executor implementation

use std::time::{Duration, Instant};

use keel_core::{Connection, DatabaseConfig, QueryResult, Result, StatementResult, Value};

/// How many characters of SQL make it into log events
const SQL_PREVIEW_LEN: usize = 120;

/// Configuration for the query executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Queries slower than this are logged at warn level
    pub slow_query_threshold: Duration,
}

impl ExecutorConfig {
    /// Create a new executor configuration.
    pub fn new(slow_query_threshold: Duration) -> Self {
        Self {
            slow_query_threshold,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000))
    }
}

impl From<&DatabaseConfig> for ExecutorConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self::new(config.slow_query_threshold())
    }
}

/// Per-call measurement produced for logging; never persisted.
///
/// Carries the statement preview and parameter count, never raw parameter
/// values; those may be sensitive.
#[derive(Debug, Clone)]
pub struct QueryMetrics {
    /// Truncated statement text
    pub sql_preview: String,
    /// Number of bound parameters
    pub param_count: usize,
    /// Wall-clock duration of the call
    pub duration: Duration,
}

/// Executes statements against a leased connection with timing
/// instrumentation.
pub struct QueryExecutor {
    config: ExecutorConfig,
}

impl QueryExecutor {
    /// Create a new executor with the given configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Get the slow query threshold.
    pub fn slow_query_threshold(&self) -> Duration {
        self.config.slow_query_threshold
    }

    /// Execute a query that returns rows, attaching the measured duration
    /// to the result.
    pub async fn run_query(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let start = Instant::now();
        let result = conn.query(sql, params).await;
        let metrics = self.metrics(sql, params, start.elapsed());

        match result {
            Ok(mut rows) => {
                rows.execution_time_ms = metrics.duration.as_millis() as u64;
                self.observe(&metrics, None);
                Ok(rows)
            }
            Err(e) => {
                self.observe(&metrics, Some(&e));
                Err(e)
            }
        }
    }

    /// Execute a statement that modifies data.
    pub async fn run_statement(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[Value],
    ) -> Result<StatementResult> {
        let start = Instant::now();
        let result = conn.execute(sql, params).await;
        let metrics = self.metrics(sql, params, start.elapsed());

        match result {
            Ok(outcome) => {
                self.observe(&metrics, None);
                Ok(outcome)
            }
            Err(e) => {
                self.observe(&metrics, Some(&e));
                Err(e)
            }
        }
    }

    fn metrics(&self, sql: &str, params: &[Value], duration: Duration) -> QueryMetrics {
        QueryMetrics {
            sql_preview: sql_preview(sql),
            param_count: params.len(),
            duration,
        }
    }

    fn observe(&self, metrics: &QueryMetrics, error: Option<&keel_core::KeelError>) {
        let duration_ms = metrics.duration.as_millis() as u64;

        if let Some(e) = error {
            tracing::warn!(
                sql = %metrics.sql_preview,
                param_count = metrics.param_count,
                duration_ms,
                transient = e.is_transient(),
                error = %e,
                "statement failed"
            );
        } else if metrics.duration > self.config.slow_query_threshold {
            tracing::warn!(
                sql = %metrics.sql_preview,
                param_count = metrics.param_count,
                duration_ms,
                "slow query"
            );
        } else {
            tracing::debug!(
                sql = %metrics.sql_preview,
                param_count = metrics.param_count,
                duration_ms,
                "statement executed"
            );
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Truncate SQL for log events.
pub(crate) fn sql_preview(sql: &str) -> String {
    sql.chars().take(SQL_PREVIEW_LEN).collect()
}
