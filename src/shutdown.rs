//! Graceful shutdown handling.
//!
//! The `ShutdownCoordinator` listens for SIGTERM/SIGINT and lets the
//! dispatch loops stop pulling work while in-flight jobs finish
//! naturally. Queued jobs stay persisted and are picked up again on the
//! next start by the recovery sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Coordinates graceful shutdown across queue instances and workers.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    shutdown_requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Can be called multiple times safely.
    pub fn request_shutdown(&self) {
        let was_requested = self.shutdown_requested.swap(true, Ordering::SeqCst);
        if !was_requested {
            info!("Shutdown requested");
            self.notify.notify_waiters();
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Wait for shutdown to be requested. Returns immediately if it
    /// already has been.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.notify.notified().await;
    }

    /// Spawn a task that requests shutdown on SIGTERM/SIGINT (Ctrl+C on
    /// non-Unix platforms).
    pub fn start_signal_listener(&self) {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let sigterm = signal::unix::signal(signal::unix::SignalKind::terminate());
                let sigint = signal::unix::signal(signal::unix::SignalKind::interrupt());
                match (sigterm, sigint) {
                    (Ok(mut sigterm), Ok(mut sigint)) => {
                        tokio::select! {
                            _ = sigterm.recv() => info!("Received SIGTERM"),
                            _ = sigint.recv() => info!("Received SIGINT"),
                        }
                    }
                    _ => {
                        warn!("Failed to install signal handlers, falling back to Ctrl+C");
                        signal::ctrl_c().await.ok();
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C");
            }

            coordinator.request_shutdown();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initial_state() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_request_and_wait() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();
        assert!(coordinator.is_shutdown_requested());

        // Already requested: wait returns immediately
        tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_then_request() {
        let coordinator = ShutdownCoordinator::new();
        let other = coordinator.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.request_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .unwrap();
        assert!(coordinator.is_shutdown_requested());
    }
}
