//! Relay Engine

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{copy_bidirectional_with_sizes, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use super::session::{RelayEnd, RelaySession, RelayStats};
use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::protocol::{ReplyStatus, TargetAddr};

/// Default session budget, measured from the start of the relay
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-direction copy buffer
pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;

/// Dials CONNECT targets and relays data between client and target
#[derive(Debug, Clone)]
pub struct RelayEngine {
    relay_timeout: Duration,
    buffer_size: usize,
    detailed_dial_errors: bool,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self {
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            detailed_dial_errors: false,
        }
    }
}

impl RelayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new relay engine with custom timeout
    pub fn with_timeout(relay_timeout: Duration) -> Self {
        Self {
            relay_timeout,
            ..Self::default()
        }
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            relay_timeout: config.relay_timeout,
            buffer_size: config.buffer_size,
            detailed_dial_errors: config.detailed_dial_errors,
        }
    }

    pub fn relay_timeout(&self) -> Duration {
        self.relay_timeout
    }

    /// Open a TCP connection to the requested target.
    ///
    /// Every resolved address is tried in order; no timeout beyond the
    /// platform's own connect timeout is applied.
    pub async fn connect_to_target(
        &self,
        target: &TargetAddr,
        port: u16,
    ) -> Result<TcpStream, SessionError> {
        let label = format!("{}:{}", target, port);

        let addrs = match self.resolve_target_address(target, port).await {
            Ok(addrs) => addrs,
            Err(e) => return Err(self.dial_error(label, e)),
        };

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!("Connected to target {} ({})", label, addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
        });
        Err(self.dial_error(label, source))
    }

    async fn resolve_target_address(
        &self,
        target: &TargetAddr,
        port: u16,
    ) -> io::Result<Vec<SocketAddr>> {
        match target {
            TargetAddr::Ipv4(ip) => Ok(vec![SocketAddr::from((*ip, port))]),
            TargetAddr::Domain(domain) => {
                let addrs: Vec<SocketAddr> = lookup_host((domain.as_str(), port)).await?.collect();
                debug!("Resolved {} to {} addresses", domain, addrs.len());
                Ok(addrs)
            }
        }
    }

    fn dial_error(&self, target: String, source: io::Error) -> SessionError {
        SessionError::Dial {
            status: self.dial_failure_status(&source),
            target,
            source,
        }
    }

    /// Reply status reported for a failed dial
    pub fn dial_failure_status(&self, error: &io::Error) -> ReplyStatus {
        if !self.detailed_dial_errors {
            return ReplyStatus::GeneralFailure;
        }

        match error.kind() {
            io::ErrorKind::ConnectionRefused => ReplyStatus::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => ReplyStatus::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => ReplyStatus::HostUnreachable,
            io::ErrorKind::TimedOut => ReplyStatus::TtlExpired,
            _ => ReplyStatus::GeneralFailure,
        }
    }

    /// Relay data both ways until both sides have closed, an I/O error
    /// occurs or the relay timeout elapses. A half-close is passed on to the
    /// peer while the other direction keeps flowing. Both sockets are closed
    /// on return.
    pub async fn relay(
        &self,
        session_id: u64,
        mut client: TcpStream,
        mut target: TcpStream,
    ) -> Result<RelayStats, SessionError> {
        let client_addr = client.peer_addr()?;
        let target_addr = target.peer_addr()?;
        let session = RelaySession::new(session_id, client_addr, target_addr);
        let deadline = Instant::now() + self.relay_timeout;

        info!(
            "Starting relay for session {} from {} to {} (budget {:?})",
            session_id, client_addr, target_addr, self.relay_timeout
        );

        let result = timeout_at(
            deadline,
            copy_bidirectional_with_sizes(
                &mut client,
                &mut target,
                self.buffer_size,
                self.buffer_size,
            ),
        )
        .await;

        close_quietly(&mut client).await;
        close_quietly(&mut target).await;

        match result {
            Ok(Ok((bytes_up, bytes_down))) => {
                session.add_bytes_up(bytes_up);
                session.add_bytes_down(bytes_down);
                Ok(session.finish(RelayEnd::Completed))
            }
            Ok(Err(e)) => {
                warn!(
                    "Relay session {} failed after {:?}: {}",
                    session_id,
                    session.duration(),
                    e
                );
                Err(SessionError::Transport(e))
            }
            Err(_) => {
                info!(
                    "Relay session {} reached its {:?} budget",
                    session_id, self.relay_timeout
                );
                Ok(session.finish(RelayEnd::TimedOut))
            }
        }
    }
}

async fn close_quietly(stream: &mut TcpStream) {
    if let Err(e) = stream.shutdown().await {
        trace!("ignoring error while closing socket: {}", e);
    }
}
