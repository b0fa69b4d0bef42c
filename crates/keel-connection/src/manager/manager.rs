//! Connection manager implementation

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{
    Connection, DatabaseConfig, KeelError, QueryResult, Result, StatementResult, Value,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::state::{ManagerState, ManagerStatus};
use crate::executor::{ExecutorConfig, QueryExecutor};
use crate::health::{HealthConfig, HealthMonitor, HealthOutcome};
use crate::pool::{ConnectionFactory, ConnectionPool, LeasedConnection, PoolConfig};
use crate::reconnect::{ReconnectDecision, ReconnectScheduler};
use crate::shutdown::Shutdownable;

/// Single owner of the pool handle and connection state.
///
/// Cheap to clone; all clones share the same underlying manager.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(config, MySqlConnectionFactory::new(&config));
/// manager.initialize().await?;
///
/// let users = manager.query("SELECT id, name FROM users", &[]).await?;
/// manager.shutdown().await;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: DatabaseConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// The live pool handle. Replaced wholesale on reconnect and published
    /// atomically: in-flight operations keep the handle they were issued.
    pool: RwLock<Option<Arc<ConnectionPool>>>,
    state: RwLock<ManagerState>,
    consecutive_errors: AtomicU32,
    last_health_check_at: Mutex<Option<DateTime<Utc>>>,
    scheduler: ReconnectScheduler,
    monitor: HealthMonitor,
    executor: QueryExecutor,
    shutdown_tx: watch::Sender<bool>,
    health_loop_started: AtomicBool,
}

impl ConnectionManager {
    /// Create a new manager. Does not connect; call [`initialize`].
    ///
    /// [`initialize`]: ConnectionManager::initialize
    pub fn new<F: ConnectionFactory>(config: DatabaseConfig, factory: F) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let inner = ManagerInner {
            scheduler: ReconnectScheduler::new(&config.reconnect),
            monitor: HealthMonitor::new(HealthConfig::from(&config)),
            executor: QueryExecutor::new(ExecutorConfig::from(&config)),
            factory: Arc::new(factory),
            pool: RwLock::new(None),
            state: RwLock::new(ManagerState::Uninitialized),
            consecutive_errors: AtomicU32::new(0),
            last_health_check_at: Mutex::new(None),
            shutdown_tx,
            health_loop_started: AtomicBool::new(false),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Build (or rebuild) the connection pool.
    ///
    /// On failure the error is returned to this caller, but the background
    /// retry is already armed: the reconnect scheduler takes over and keeps
    /// retrying with backoff until it connects or exhausts its attempts.
    /// After `GivenUp`, calling this manually resets the attempt budget.
    #[tracing::instrument(skip(self), fields(host = %self.inner.config.host, database = %self.inner.config.database))]
    pub async fn initialize(&self) -> Result<()> {
        if self.inner.scheduler.is_given_up() {
            self.inner.scheduler.reset();
        }
        self.inner.initialize().await
    }

    /// Execute a query that returns rows.
    ///
    /// Acquires a leased connection, delegates to the executor, and releases
    /// the connection on every exit path.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let pool = self.inner.current_pool()?;
        let lease = pool.get().await.inspect_err(|e| {
            self.inner.note_transient_failure(e);
        })?;
        self.inner
            .executor
            .run_query(&*lease, sql, params)
            .await
            .inspect_err(|e| self.inner.note_transient_failure(e))
    }

    /// Execute a statement that modifies data.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let pool = self.inner.current_pool()?;
        let lease = pool.get().await.inspect_err(|e| {
            self.inner.note_transient_failure(e);
        })?;
        self.inner
            .executor
            .run_statement(&*lease, sql, params)
            .await
            .inspect_err(|e| self.inner.note_transient_failure(e))
    }

    /// Run a unit of work inside a transaction.
    ///
    /// Commits when the unit of work succeeds, rolls back when it fails.
    /// Exactly one of commit/rollback executes and the leased connection is
    /// released exactly once. A failed rollback leaves the connection in an
    /// unknown state: it is logged, the connection is discarded instead of
    /// re-pooled, and the rollback error is returned.
    pub async fn transaction<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let pool = self.inner.current_pool()?;
        let lease = pool.get().await.inspect_err(|e| {
            self.inner.note_transient_failure(e);
        })?;

        lease.begin().await?;

        match work(Arc::clone(lease.inner())).await {
            Ok(value) => {
                lease.commit().await?;
                Ok(value)
            }
            Err(work_err) => match lease.rollback().await {
                Ok(()) => {
                    tracing::debug!(error = %work_err, "transaction rolled back");
                    Err(work_err)
                }
                Err(rollback_err) => {
                    tracing::error!(
                        work_error = %work_err,
                        rollback_error = %rollback_err,
                        "rollback failed; discarding connection"
                    );
                    lease.discard().await;
                    Err(rollback_err)
                }
            },
        }
    }

    /// Lease a connection for manual multi-statement control.
    ///
    /// The connection returns to the pool when the lease is dropped.
    pub async fn get_connection(&self) -> Result<LeasedConnection> {
        let pool = self.inner.current_pool()?;
        pool.get().await
    }

    /// Snapshot of the manager state, for health-check endpoints.
    /// Non-blocking.
    pub fn status(&self) -> ManagerStatus {
        let state = *self.inner.state.read();
        ManagerStatus {
            state,
            is_connected: state.is_connected(),
            consecutive_errors: self.inner.consecutive_errors.load(Ordering::SeqCst),
            reconnect_attempts: self.inner.scheduler.attempts(),
            last_health_check_at: *self.inner.last_health_check_at.lock(),
        }
    }

    /// Shut the manager down.
    ///
    /// Stops the health loop, cancels any pending reconnect timer, and
    /// closes the pool. Idempotent; reachable from any state.
    pub async fn shutdown(&self) {
        let already_closed = {
            let mut state = self.inner.state.write();
            if *state == ManagerState::Closed {
                true
            } else {
                tracing::debug!(from = ?*state, "state transition to Closed");
                *state = ManagerState::Closed;
                false
            }
        };
        if already_closed {
            return;
        }

        let _ = self.inner.shutdown_tx.send(true);

        let pool = { self.inner.pool.write().take() };
        if let Some(pool) = pool {
            pool.close().await;
        }

        tracing::info!("connection manager shut down");
    }
}

impl ManagerInner {
    /// Transition to a new state unless already closed.
    fn set_state(&self, new: ManagerState) {
        let mut state = self.state.write();
        if *state == ManagerState::Closed || *state == new {
            return;
        }
        tracing::debug!(from = ?*state, to = ?new, "state transition");
        *state = new;
    }

    fn current_state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Get the live pool handle for one operation.
    fn current_pool(&self) -> Result<Arc<ConnectionPool>> {
        match self.current_state() {
            ManagerState::Closed => return Err(KeelError::Closed),
            ManagerState::GivenUp => {
                return Err(KeelError::GivenUp {
                    attempts: self.scheduler.attempts(),
                });
            }
            _ => {}
        }
        self.pool
            .read()
            .clone()
            .ok_or_else(|| KeelError::Connection("connection manager not initialized".into()))
    }

    /// Build a fresh pool, verify one connection, and publish it.
    async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.current_state() == ManagerState::Closed {
            return Err(KeelError::Closed);
        }
        self.set_state(ManagerState::Connecting);

        let pool = Arc::new(ConnectionPool::from_shared(
            PoolConfig::from(&self.config),
            Arc::clone(&self.factory),
        ));

        let verify = async {
            let lease = pool.get().await?;
            crate::health::probe(&*lease, self.config.health_probe_timeout()).await?;
            Ok::<(), KeelError>(())
        }
        .await;

        match verify {
            Ok(()) => {
                // Publish the new handle; close the old one after in-flight
                // readers can no longer pick it up.
                let old = {
                    let mut guard = self.pool.write();
                    guard.replace(Arc::clone(&pool))
                };

                if self.current_state() == ManagerState::Closed {
                    // Shut down while we were connecting
                    let published = { self.pool.write().take() };
                    if let Some(published) = published {
                        published.close().await;
                    }
                    if let Some(old) = old {
                        old.close().await;
                    }
                    return Err(KeelError::Closed);
                }

                if let Some(old) = old {
                    old.close().await;
                }

                self.scheduler.reset();
                self.consecutive_errors.store(0, Ordering::SeqCst);
                self.set_state(ManagerState::Connected);
                tracing::info!(
                    connection_limit = self.config.connection_limit,
                    "connection pool established"
                );
                self.start_health_loop();
                Ok(())
            }
            Err(e) => {
                pool.close().await;
                tracing::error!(error = %e, "failed to establish connection pool");
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Claim the next reconnect attempt and arm its timer.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.current_state() == ManagerState::Closed {
            return;
        }

        match self.scheduler.next_attempt() {
            ReconnectDecision::Scheduled { attempt, delay } => {
                self.set_state(ManagerState::ReconnectScheduled);
                tracing::warn!(
                    attempt,
                    max_attempts = self.scheduler.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );

                let weak = Arc::downgrade(self);
                let mut shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => {
                            tracing::debug!(attempt, "pending reconnect cancelled");
                            return;
                        }
                    }

                    let Some(inner) = weak.upgrade() else { return };
                    // A health probe may have restored the connection (or a
                    // shutdown arrived) while the timer was pending.
                    if inner.current_state() != ManagerState::ReconnectScheduled {
                        return;
                    }

                    tracing::info!(attempt, "attempting reconnect");
                    if let Err(e) = inner.initialize().await {
                        tracing::debug!(attempt, error = %e, "reconnect attempt failed");
                    }
                });
            }
            ReconnectDecision::GivenUp { attempts } => {
                self.set_state(ManagerState::GivenUp);
                tracing::error!(
                    attempts,
                    "reconnect attempts exhausted; manual intervention required"
                );
            }
        }
    }

    /// Spawn the periodic health loop (once per manager).
    fn start_health_loop(self: &Arc<Self>) {
        if self.health_loop_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.monitor.interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the pool was just verified
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => return,
                }

                let Some(inner) = weak.upgrade() else { return };
                inner.run_health_check().await;
            }
        });
    }

    /// One health-check cycle: probe and fold the outcome into state.
    ///
    /// Failures here are absorbed into state transitions, never thrown;
    /// there is no synchronous caller to receive them.
    async fn run_health_check(self: &Arc<Self>) {
        if !matches!(
            self.current_state(),
            ManagerState::Connected | ManagerState::ReconnectScheduled
        ) {
            return;
        }
        let Some(pool) = self.pool.read().clone() else {
            return;
        };

        match self.monitor.check(&pool).await {
            HealthOutcome::Healthy { latency } => {
                *self.last_health_check_at.lock() = Some(Utc::now());
                self.consecutive_errors.store(0, Ordering::SeqCst);

                if self.current_state() != ManagerState::Connected {
                    // The backend came back before a reconnect fired
                    self.scheduler.reset();
                    self.set_state(ManagerState::Connected);
                    tracing::info!(
                        latency_ms = latency.as_millis() as u64,
                        "connection restored by health probe"
                    );
                }
            }
            HealthOutcome::Unhealthy { error } => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(consecutive_errors = errors, error = %error, "health probe failed");

                if self.current_state() == ManagerState::Connected {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Fold a caller-facing failure into connection state.
    ///
    /// Connection-level errors indicate the pool may be broken and trigger
    /// the reconnect path; pool timeouts and exhaustion are ordinary
    /// contention and do not.
    fn note_transient_failure(self: &Arc<Self>, error: &KeelError) {
        if !matches!(error, KeelError::Connection(_) | KeelError::Io(_)) {
            return;
        }
        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(consecutive_errors = errors, error = %error, "connection-level failure");

        if self.current_state() == ManagerState::Connected {
            self.schedule_reconnect();
        }
    }
}

#[async_trait]
impl Shutdownable for ConnectionManager {
    async fn shutdown(&self) {
        ConnectionManager::shutdown(self).await;
    }
}
