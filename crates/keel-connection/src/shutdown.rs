//! Graceful-shutdown wiring
//!
//! Components expose an explicit [`Shutdownable`] capability instead of
//! reaching into process-global signal APIs themselves. The composition root
//! registers them with a [`ShutdownSignal`] and drives the whole set from
//! its own signal handling.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Capability to shut a component down cleanly. Implementations must be
/// idempotent.
#[async_trait]
pub trait Shutdownable: Send + Sync {
    /// Release resources and stop background work.
    async fn shutdown(&self);
}

/// Registry of shutdown hooks driven by process lifecycle signals.
///
/// # Example
///
/// ```ignore
/// let signal = ShutdownSignal::new();
/// signal.register(Arc::new(manager.clone()));
/// signal.listen().await; // blocks until SIGINT/SIGTERM, then runs hooks
/// ```
pub struct ShutdownSignal {
    hooks: Mutex<Vec<Arc<dyn Shutdownable>>>,
}

impl ShutdownSignal {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Register a component to be shut down on process termination.
    pub fn register(&self, hook: Arc<dyn Shutdownable>) {
        self.hooks.lock().push(hook);
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    /// Wait for a termination signal, then run every registered hook.
    ///
    /// Returns once all hooks have completed, so the caller can let the
    /// process exit.
    pub async fn listen(&self) {
        wait_for_termination().await;
        tracing::info!("termination signal received, shutting down");
        self.trigger().await;
    }

    /// Run every registered hook now, in registration order.
    pub async fn trigger(&self) {
        let hooks: Vec<_> = self.hooks.lock().clone();
        for hook in hooks {
            hook.shutdown().await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
