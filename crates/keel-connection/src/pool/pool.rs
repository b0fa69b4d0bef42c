//! Connection pool implementation

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use keel_core::{Connection, KeelError, Result};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::config::PoolConfig;
use super::stats::PoolStats;

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Validate that a connection is still usable
    ///
    /// Default implementation checks the closed flag only.
    async fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed()
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn).await
    }
}

/// Internal wrapper for pooled connections with metadata
struct PooledConnectionInner {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_used_at: Instant,
}

impl PooledConnectionInner {
    fn new(connection: Arc<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used_at: now,
        }
    }

    fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }
}

/// A connection pool that manages a set of database connections
///
/// The pool lends connections to callers on demand, up to a configured
/// limit; beyond the limit callers wait (bounded by the queue limit) until
/// a connection is returned. Connections come back to the pool when the
/// `LeasedConnection` wrapper is dropped.
///
/// A pool is replaced wholesale on reconnect, never mutated in place:
/// `close()` stops new acquisitions but leases already handed out complete
/// against the handle they were issued.
pub struct ConnectionPool {
    /// Pool configuration
    config: PoolConfig,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Available idle connections
    idle: Mutex<VecDeque<PooledConnectionInner>>,
    /// Semaphore to limit total connections
    semaphore: Arc<Semaphore>,
    /// Number of active connections (borrowed from pool)
    active_count: AtomicUsize,
    /// Number of requests waiting for a connection
    waiting_count: AtomicUsize,
    /// Whether the pool has been closed
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        Self::from_shared(config, Arc::new(factory))
    }

    /// Create a new connection pool from an already-shared factory
    pub fn from_shared(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size()));
        Self {
            config,
            factory,
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            active_count: AtomicUsize::new(0),
            waiting_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Get a connection from the pool
    ///
    /// This will:
    /// 1. Fail fast if the pool is closed or the wait queue is full
    /// 2. Try to get an idle connection from the pool
    /// 3. If none available and under max_size, create a new connection
    /// 4. If at max_size, wait for a connection to be returned (with timeout)
    pub async fn get(self: &Arc<Self>) -> Result<LeasedConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KeelError::Closed);
        }

        // Queue-limit backpressure: refuse to queue unboundedly
        let waiting = self.waiting_count.fetch_add(1, Ordering::SeqCst);
        if self.config.queue_limit() > 0
            && self.semaphore.available_permits() == 0
            && waiting >= self.config.queue_limit()
        {
            self.waiting_count.fetch_sub(1, Ordering::SeqCst);
            return Err(KeelError::PoolExhausted(format!(
                "{} requests already waiting (queue limit {})",
                waiting,
                self.config.queue_limit()
            )));
        }

        let result = tokio::time::timeout(self.config.acquire_timeout(), async {
            // Acquire a permit from the semaphore (limits total connections)
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| KeelError::Closed)?;

            // Try to get an idle connection, or create a fresh one
            let connection = match self.try_get_idle().await {
                Some(conn) => conn,
                None => self.factory.create().await?,
            };

            self.active_count.fetch_add(1, Ordering::SeqCst);

            Ok(LeasedConnection {
                connection: Some(connection),
                pool: Arc::clone(self),
                _permit: permit,
            })
        })
        .await;

        // No longer waiting, whichever way acquisition went
        self.waiting_count.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(lease) => lease,
            Err(_) => Err(KeelError::PoolTimeout(format!(
                "timed out after {:?}",
                self.config.acquire_timeout()
            ))),
        }
    }

    /// Try to get an idle connection, validating and checking lifetime
    async fn try_get_idle(&self) -> Option<Arc<dyn Connection>> {
        loop {
            let pooled = { self.idle.lock().pop_front() };

            match pooled {
                Some(mut inner) => {
                    // Check if connection has exceeded max lifetime
                    if let Some(max_lifetime) = self.config.max_lifetime() {
                        if inner.created_at.elapsed() > max_lifetime {
                            let _ = inner.connection.close().await;
                            continue;
                        }
                    }

                    // Check idle timeout
                    if inner.last_used_at.elapsed() > self.config.idle_timeout() {
                        let _ = inner.connection.close().await;
                        continue;
                    }

                    // Validate connection
                    if !self.factory.validate(&*inner.connection).await {
                        let _ = inner.connection.close().await;
                        continue;
                    }

                    inner.touch();
                    return Some(inner.connection);
                }
                None => return None,
            }
        }
    }

    /// Return a connection to the pool
    fn return_connection(&self, connection: Arc<dyn Connection>) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        // Don't re-pool closed connections, and don't grow a closed pool
        if connection.is_closed() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut idle = self.idle.lock();
        idle.push_back(PooledConnectionInner::new(connection));
    }

    /// Record that a leased connection was discarded instead of returned
    fn note_discarded(&self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        let active = self.active_count.load(Ordering::SeqCst);
        let waiting = self.waiting_count.load(Ordering::SeqCst);
        PoolStats::new(idle + active, idle, active, waiting)
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the pool
    ///
    /// New acquisitions fail immediately; leases already handed out finish
    /// their work and their connections are dropped on return instead of
    /// being re-pooled. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();

        let connections: Vec<_> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };

        tracing::debug!(idle = connections.len(), "closing pool");
        for inner in connections {
            let _ = inner.connection.close().await;
        }
    }
}

/// A connection leased from the pool for the duration of one operation
///
/// When dropped, the connection is automatically returned to the pool,
/// on every exit path including errors.
pub struct LeasedConnection {
    connection: Option<Arc<dyn Connection>>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for LeasedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("LeasedConnection");
        if let Some(conn) = &self.connection {
            s.field("driver", &conn.driver_name());
        }
        s.finish_non_exhaustive()
    }
}

impl Deref for LeasedConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("connection taken").as_ref()
    }
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.pool.return_connection(conn);
        }
    }
}

impl LeasedConnection {
    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn Connection> {
        self.connection.as_ref().expect("connection taken")
    }

    /// Close the underlying connection instead of returning it to the pool
    ///
    /// Used when the connection is in an unknown state (e.g. after a failed
    /// rollback) and must not be reused.
    pub async fn discard(mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = conn.close().await;
            self.pool.note_discarded();
        }
    }
}
