//! Tests for the connection manager

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{
    Connection, DatabaseConfig, KeelError, QueryResult, ReconnectPolicy, Result, StatementResult,
    Value,
};
use parking_lot::Mutex;

use super::manager::ConnectionManager;
use super::state::ManagerState;
use crate::pool::ConnectionFactory;

/// Simulated backend shared by every connection a factory hands out
struct Backend {
    up: AtomicBool,
    created: AtomicUsize,
    query_delay_ms: AtomicU64,
    fail_rollback: AtomicBool,
    statement_log: Mutex<Vec<String>>,
}

impl Backend {
    fn up() -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(true),
            created: AtomicUsize::new(0),
            query_delay_ms: AtomicU64::new(0),
            fail_rollback: AtomicBool::new(false),
            statement_log: Mutex::new(Vec::new()),
        })
    }

    fn down() -> Arc<Self> {
        let backend = Self::up();
        backend.up.store(false, Ordering::SeqCst);
        backend
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn log(&self) -> Vec<String> {
        self.statement_log.lock().clone()
    }
}

struct TestConnection {
    backend: Arc<Backend>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for TestConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        if sql == "BAD SQL" {
            return Err(KeelError::Statement("syntax error".into()));
        }
        if !self.backend.up.load(Ordering::SeqCst) {
            return Err(KeelError::Connection("connection reset".into()));
        }
        let delay = self.backend.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(QueryResult::empty())
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        if !self.backend.up.load(Ordering::SeqCst) {
            return Err(KeelError::Connection("connection reset".into()));
        }
        if sql == "ROLLBACK" && self.backend.fail_rollback.load(Ordering::SeqCst) {
            return Err(KeelError::Connection("rollback lost".into()));
        }
        self.backend.statement_log.lock().push(sql.to_string());
        Ok(StatementResult::default())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct TestFactory {
    backend: Arc<Backend>,
}

#[async_trait]
impl ConnectionFactory for TestFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        if !self.backend.up.load(Ordering::SeqCst) {
            return Err(KeelError::Connection("connection refused".into()));
        }
        self.backend.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TestConnection {
            backend: self.backend.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

fn fast_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 10,
        max_delay_ms: 100,
        max_attempts,
        backoff_factor: 2.0,
        jitter_ratio: 0.0,
    }
}

fn config_with(reconnect: ReconnectPolicy) -> DatabaseConfig {
    let mut config = DatabaseConfig::new("localhost", "app", "secret", "appdb");
    config.connection_limit = 2;
    config.acquire_timeout_ms = 1_000;
    config.reconnect = reconnect;
    config
}

fn manager_for(backend: &Arc<Backend>, config: DatabaseConfig) -> ConnectionManager {
    ConnectionManager::new(
        config,
        TestFactory {
            backend: backend.clone(),
        },
    )
}

async fn wait_for_state(manager: &ConnectionManager, state: ManagerState) {
    for _ in 0..500 {
        if manager.status().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "manager never reached {:?}, stuck at {:?}",
        state,
        manager.status().state
    );
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_initialize_connects() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));

    manager.initialize().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, ManagerState::Connected);
    assert!(status.is_connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.consecutive_errors, 0);
}

#[tokio::test]
async fn test_query_before_initialize_fails() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));

    let err = manager.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, KeelError::Connection(_)));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_failure_schedules_reconnect() {
    let backend = Backend::down();
    let manager = manager_for(&backend, config_with(fast_reconnect(5)));

    let err = manager.initialize().await.unwrap_err();
    assert!(err.is_transient());

    let status = manager.status();
    assert_eq!(status.state, ManagerState::ReconnectScheduled);
    assert!(!status.is_connected);
    // The attempt counter increments when the attempt is claimed, before it fires
    assert_eq!(status.reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_max_attempts() {
    let backend = Backend::down();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));

    let _ = manager.initialize().await;
    wait_for_state(&manager, ManagerState::GivenUp).await;

    let status = manager.status();
    assert_eq!(status.reconnect_attempts, 3);

    // No further attempt is ever scheduled
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.status().state, ManagerState::GivenUp);
    assert_eq!(manager.status().reconnect_attempts, 3);

    // Callers see the terminal condition as a typed error
    let err = manager.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, KeelError::GivenUp { attempts: 3 }));
}

#[tokio::test(start_paused = true)]
async fn test_manual_initialize_escapes_given_up() {
    let backend = Backend::down();
    let manager = manager_for(&backend, config_with(fast_reconnect(2)));

    let _ = manager.initialize().await;
    wait_for_state(&manager, ManagerState::GivenUp).await;

    backend.set_up(true);
    manager.initialize().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, ManagerState::Connected);
    assert_eq!(status.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_recovers_when_backend_returns() {
    let backend = Backend::down();
    let manager = manager_for(&backend, config_with(fast_reconnect(10)));

    let _ = manager.initialize().await;
    assert_eq!(manager.status().state, ManagerState::ReconnectScheduled);

    backend.set_up(true);
    wait_for_state(&manager, ManagerState::Connected).await;

    // reconnect_attempts resets on the disconnected -> connected transition
    assert_eq!(manager.status().reconnect_attempts, 0);
    assert!(manager.query("SELECT 1", &[]).await.is_ok());
}

// =============================================================================
// Health monitoring
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_health_failure_flips_disconnected() {
    let backend = Backend::up();
    let mut config = config_with(ReconnectPolicy {
        // Long delay keeps the reconnect pending so the probe path is observable
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        max_attempts: 5,
        backoff_factor: 1.5,
        jitter_ratio: 0.0,
    });
    config.health_check_interval_ms = 50;
    let manager = manager_for(&backend, config);

    manager.initialize().await.unwrap();
    backend.set_up(false);

    wait_for_state(&manager, ManagerState::ReconnectScheduled).await;
    let status = manager.status();
    assert!(!status.is_connected);
    assert!(status.consecutive_errors >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_health_probe_self_heals() {
    let backend = Backend::up();
    let mut config = config_with(ReconnectPolicy {
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        max_attempts: 5,
        backoff_factor: 1.5,
        jitter_ratio: 0.0,
    });
    config.health_check_interval_ms = 50;
    let manager = manager_for(&backend, config);

    manager.initialize().await.unwrap();

    // Outage across several health cycles
    backend.set_up(false);
    wait_for_state(&manager, ManagerState::ReconnectScheduled).await;

    // Backend restored: the next probe reconnects the state without waiting
    // for the (distant) reconnect timer
    backend.set_up(true);
    wait_for_state(&manager, ManagerState::Connected).await;

    let status = manager.status();
    assert!(status.is_connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.consecutive_errors, 0);
    assert!(status.last_health_check_at.is_some());
}

// =============================================================================
// Queries and transactions
// =============================================================================

#[tokio::test]
async fn test_statement_error_does_not_trigger_reconnect() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    let err = manager.query("BAD SQL", &[]).await.unwrap_err();
    assert!(matches!(err, KeelError::Statement(_)));

    // The connection itself is healthy: still connected, lease released
    let status = manager.status();
    assert_eq!(status.state, ManagerState::Connected);
    assert_eq!(status.consecutive_errors, 0);
    assert!(manager.query("SELECT 1", &[]).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_triggers_reconnect_path() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(5)));
    manager.initialize().await.unwrap();

    backend.set_up(false);
    let err = manager.query("SELECT 1", &[]).await.unwrap_err();
    assert!(err.is_transient());

    let status = manager.status();
    assert_eq!(status.consecutive_errors, 1);
    assert_ne!(status.state, ManagerState::Connected);
}

#[tokio::test]
async fn test_transaction_commits_on_success() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    let value = manager
        .transaction(|conn| async move {
            conn.execute("INSERT INTO quizzes (title) VALUES (?)", &[]).await?;
            conn.execute("INSERT INTO questions (quiz_id) VALUES (?)", &[]).await?;
            Ok(7)
        })
        .await
        .unwrap();
    assert_eq!(value, 7);

    let log = backend.log();
    assert_eq!(
        log,
        vec![
            "START TRANSACTION",
            "INSERT INTO quizzes (title) VALUES (?)",
            "INSERT INTO questions (quiz_id) VALUES (?)",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_transaction_rolls_back_on_failure() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    let err = manager
        .transaction(|conn| async move {
            conn.execute("INSERT INTO quizzes (title) VALUES (?)", &[]).await?;
            conn.execute("INSERT INTO questions (quiz_id) VALUES (?)", &[]).await?;
            Err::<(), _>(KeelError::Statement("duplicate key".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::Statement(_)));

    let log = backend.log();
    assert!(log.contains(&"ROLLBACK".to_string()));
    assert!(!log.contains(&"COMMIT".to_string()));
}

#[tokio::test]
async fn test_failed_rollback_discards_connection() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    backend.fail_rollback.store(true, Ordering::SeqCst);
    let err = manager
        .transaction(|_conn| async move {
            Err::<(), _>(KeelError::Statement("duplicate key".into()))
        })
        .await
        .unwrap_err();

    // The rollback error is surfaced, not the unit-of-work error
    assert!(matches!(err, KeelError::Connection(_)));

    // The poisoned connection was not re-pooled: the next operation gets a
    // freshly created one
    let before = backend.created();
    backend.fail_rollback.store(false, Ordering::SeqCst);
    manager.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(backend.created(), before + 1);
}

#[tokio::test]
async fn test_get_connection_manual_lease() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    {
        let lease = manager.get_connection().await.unwrap();
        lease.query("SELECT 1", &[]).await.unwrap();
        lease.query("SELECT 2", &[]).await.unwrap();
    }

    // Lease returned; reused by the next caller without creating a connection
    let before = backend.created();
    manager.query("SELECT 3", &[]).await.unwrap();
    assert_eq!(backend.created(), before);
}

#[tokio::test(start_paused = true)]
async fn test_pool_replacement_does_not_break_inflight_queries() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    backend.query_delay_ms.store(100, Ordering::SeqCst);
    let slow = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.query("SELECT long_running", &[]).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Rebuild the pool while the query is in flight
    backend.query_delay_ms.store(0, Ordering::SeqCst);
    manager.initialize().await.unwrap();

    // The in-flight query completes against the handle it was issued
    slow.await.unwrap().unwrap();
    assert_eq!(manager.status().state, ManagerState::Connected);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_is_idempotent_and_terminal() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(manager.status().state, ManagerState::Closed);
    assert!(matches!(
        manager.query("SELECT 1", &[]).await.unwrap_err(),
        KeelError::Closed
    ));
    assert!(matches!(
        manager.initialize().await.unwrap_err(),
        KeelError::Closed
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnect() {
    let backend = Backend::down();
    let mut config = config_with(fast_reconnect(5));
    config.reconnect.base_delay_ms = 60_000;
    config.reconnect.max_delay_ms = 60_000;
    let manager = manager_for(&backend, config);

    let _ = manager.initialize().await;
    assert_eq!(manager.status().state, ManagerState::ReconnectScheduled);

    manager.shutdown().await;

    // Even once the backend is reachable and the timer would have fired,
    // no reconnect happens after shutdown
    backend.set_up(true);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(manager.status().state, ManagerState::Closed);
    assert_eq!(backend.created(), 0);
}

#[tokio::test]
async fn test_status_snapshot_serializes() {
    let backend = Backend::up();
    let manager = manager_for(&backend, config_with(fast_reconnect(3)));
    manager.initialize().await.unwrap();

    let json = serde_json::to_value(manager.status()).unwrap();
    assert_eq!(json["state"], "connected");
    assert_eq!(json["is_connected"], true);
}
