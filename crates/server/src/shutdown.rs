//! Shutdown handling.
//!
//! The process runs until Ctrl-C or SIGTERM, then tells every endpoint to
//! stop through a watch channel.

use tokio::{signal, sync::watch};

/// Wait for a shutdown signal (Ctrl-C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires; the other
/// signal still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Broadcasts a one-way stop flag to every endpoint.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    notify: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self { notify }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.notify.subscribe()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        self.notify.send_replace(true);
    }

    /// True once shutdown was triggered.
    pub fn is_shutting_down(&self) -> bool {
        *self.notify.borrow()
    }

    /// Wait for shutdown signal and trigger coordinator.
    pub async fn wait_for_signal(&self) {
        shutdown_signal().await;
        self.shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
