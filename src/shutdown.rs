//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM / SIGINT (Ctrl+C on Windows) and broadcasts a single
//! shutdown notification to whoever subscribed.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::Result;

/// Shutdown coordinator that turns OS signals into a broadcast
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Notify all subscribers
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("No component listening for shutdown: {}", e);
        }
    }

    /// Block until a shutdown signal arrives, then notify subscribers
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }
}
