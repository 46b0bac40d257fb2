//! Client Session

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Protocol progress of a session; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Negotiating,
    CommandPending,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::CommandPending => "command-pending",
            SessionState::Relaying => "relaying",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One accepted client connection
#[derive(Debug)]
pub struct Session {
    id: u64,
    client_addr: SocketAddr,
    started_at: Instant,
    state: SessionState,
}

impl Session {
    /// Start a session with the next process-wide identifier
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            client_addr,
            started_at: Instant::now(),
            state: SessionState::Negotiating,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to `next`; refuses to go backwards or stay put
    pub fn advance(&mut self, next: SessionState) -> bool {
        if next <= self.state {
            warn!(
                "session {} refused state change {} -> {}",
                self.id, self.state, next
            );
            return false;
        }
        trace!("session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}
