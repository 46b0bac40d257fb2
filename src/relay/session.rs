//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Why a relay stopped without a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Both directions reached EOF
    Completed,
    TimedOut,
}

/// Represents an active relay between a client and its target
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: u64,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Statistics for a finished relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub session_id: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub duration: Duration,
    pub end: RelayEnd,
}

impl RelaySession {
    pub fn new(session_id: u64, client_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        debug!(
            "Creating relay session {} ({} -> {})",
            session_id, client_addr, target_addr
        );

        Self {
            session_id,
            client_addr,
            target_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes copied client to target
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes copied target to client
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn finish(&self, end: RelayEnd) -> RelayStats {
        let stats = RelayStats {
            session_id: self.session_id,
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            duration: self.duration(),
            end,
        };
        self.log_stats(&stats);
        stats
    }

    fn log_stats(&self, stats: &RelayStats) {
        info!(
            session_id = self.session_id,
            client_addr = %self.client_addr,
            target_addr = %self.target_addr,
            duration_ms = stats.duration.as_millis() as u64,
            bytes_up = stats.bytes_up,
            bytes_down = stats.bytes_down,
            total_bytes = stats.bytes_up + stats.bytes_down,
            end = ?stats.end,
            "Relay session completed"
        );
    }
}
