//! Graceful shutdown coordination, shared by all four binaries.
//!
//! A `tokio::sync::watch`-based signal, the same primitive the teacher's
//! `ShutdownService` uses, generalized here since each binary owns a
//! different set of resources to drain (the teacher's version hard-codes
//! `topics`/`database`/`analytics`; ours just tracks task handles and lets
//! each binary close its own broker/DB/cache after `drain` returns).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// How long `drain` waits for registered tasks before giving up, matching
/// §5's "drain write pumps up to 2 s" shutdown budget.
pub const DRAIN_TIMEOUT_SECS: u64 = 2;

#[derive(Clone)]
pub struct ShutdownService {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Default for ShutdownService {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownService {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a background task handle to be awaited during drain.
    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    /// A fresh receiver for a long-lived task to `select!` against.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Trigger shutdown and wait (bounded by [`DRAIN_TIMEOUT_SECS`]) for every
    /// registered task to finish. Callers close broker/DB/cache handles
    /// after this returns.
    pub async fn drain(&self) {
        self.trigger();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        let count = handles.len();
        tracing::debug!(count, "draining background tasks");

        let timeout = Duration::from_secs(DRAIN_TIMEOUT_SECS);
        if tokio::time::timeout(timeout, futures::future::join_all(handles)).await.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "drain timed out, some tasks still running");
        }
    }

    /// Resolves once shutdown has been triggered. Used as axum's
    /// `with_graceful_shutdown` future.
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|&v| v).await;
        }
    }

    /// Install OS signal handlers that trigger shutdown on Ctrl+C/SIGTERM.
    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::debug!("received Ctrl+C, shutting down"),
                _ = terminate => tracing::debug!("received SIGTERM, shutting down"),
            }

            service.trigger();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_triggered_initially() {
        assert!(!ShutdownService::new().is_triggered());
    }

    #[tokio::test]
    async fn trigger_flips_flag_and_wakes_waiters() {
        let shutdown = ShutdownService::new();
        let rx = shutdown.subscribe();
        let wait = tokio::spawn(shutdown.wait());

        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(100), wait).await.unwrap().unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn drain_awaits_registered_tasks() {
        let shutdown = ShutdownService::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            let _ = done_rx.await;
        });
        shutdown.register(handle).await;

        let _ = done_tx.send(());
        shutdown.drain().await;
        assert!(shutdown.is_triggered());
    }
}
