//! Session Admission
//!
//! Enforces the process-wide cap on concurrent sessions. Each admitted session
//! holds a [`ConnectionSlot`]; dropping the slot releases it, whichever way the
//! session ended.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::Result;

/// Tracks and enforces the concurrent session limit
pub struct ResourceManager {
    max_connections: usize,
    connection_semaphore: Arc<Semaphore>,
    stats: ResourceStats,
}

/// Admission counters
#[derive(Debug, Default)]
struct ResourceStats {
    peak_connections: AtomicUsize,
    total_connections_admitted: AtomicUsize,
    total_connections_rejected: AtomicUsize,
}

/// Snapshot of admission counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUsageStats {
    pub active_connections: usize,
    pub peak_connections: usize,
    pub total_connections_admitted: usize,
    pub total_connections_rejected: usize,
    pub max_connections: usize,
}

impl ResourceManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
            stats: ResourceStats::default(),
        }
    }

    /// Try to acquire a session slot without waiting
    pub fn acquire_connection_slot(&self) -> Result<ConnectionSlot> {
        match Arc::clone(&self.connection_semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.stats
                    .total_connections_admitted
                    .fetch_add(1, Ordering::Relaxed);

                let active = self.active_connections();
                self.stats
                    .peak_connections
                    .fetch_max(active, Ordering::Relaxed);

                debug!("Acquired connection slot, active connections: {}", active);
                Ok(ConnectionSlot { _permit: permit })
            }
            Err(_) => {
                self.stats
                    .total_connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Connection limit reached ({}), rejecting connection",
                    self.max_connections
                );
                Err(anyhow::anyhow!(
                    "session capacity of {} exceeded",
                    self.max_connections
                ))
            }
        }
    }

    /// Sessions currently holding a slot
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.connection_semaphore.available_permits()
    }

    pub fn get_stats(&self) -> ResourceUsageStats {
        ResourceUsageStats {
            active_connections: self.active_connections(),
            peak_connections: self.stats.peak_connections.load(Ordering::Relaxed),
            total_connections_admitted: self
                .stats
                .total_connections_admitted
                .load(Ordering::Relaxed),
            total_connections_rejected: self
                .stats
                .total_connections_rejected
                .load(Ordering::Relaxed),
            max_connections: self.max_connections,
        }
    }
}

/// A held session slot, released on drop
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        debug!("Released connection slot");
    }
}
