//! Connection Manager Implementation

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::session::{Session, SessionState};
use crate::config::Config;
use crate::error::SessionError;
use crate::protocol::{Command, ReplyStatus, Request, ServerIdentity, Socks5Handler};
use crate::relay::{RelayEngine, RelayStats};
use crate::resource::{ResourceManager, ResourceUsageStats};
use crate::Result;

/// Shared, read-only state every session task needs
struct SessionContext {
    identity: ServerIdentity,
    /// Bound to a wildcard address with no advertised host
    identity_per_connection: bool,
    relay_engine: RelayEngine,
    handshake_timeout: Option<Duration>,
}

impl SessionContext {
    /// Identity reported to the client on `stream`
    fn identity_for(&self, stream: &TcpStream) -> ServerIdentity {
        if !self.identity_per_connection {
            return self.identity.clone();
        }

        match stream
            .local_addr()
            .map_err(anyhow::Error::from)
            .and_then(|addr| ServerIdentity::new(addr.ip().to_string(), self.identity.port()))
        {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Falling back to the listener identity: {}", e);
                self.identity.clone()
            }
        }
    }
}

/// Accepts client connections and runs one task per admitted session
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    resource_manager: Arc<ResourceManager>,
    context: Option<Arc<SessionContext>>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let resource_manager = Arc::new(ResourceManager::new(config.server.max_connections));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            resource_manager,
            context: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the listening socket and fix the identity reported in replies
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;
        let local_addr = listener.local_addr()?;

        let (host, identity_per_connection) = match &self.config.server.advertised_host {
            Some(host) => (host.clone(), false),
            None => (local_addr.ip().to_string(), local_addr.ip().is_unspecified()),
        };
        let identity = ServerIdentity::new(host, local_addr.port())?;
        if identity_per_connection {
            info!(
                "Listening on {}, replies report the address each client reached",
                local_addr
            );
        } else {
            info!(
                "Listening on {}, replies report {}:{}",
                local_addr,
                identity.host(),
                identity.port()
            );
        }

        self.context = Some(Arc::new(SessionContext {
            identity,
            identity_per_connection,
            relay_engine: RelayEngine::from_config(&self.config.server),
            handshake_timeout: self.config.server.handshake_timeout,
        }));
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Accept connections until `signal` fires, then drain sessions
    pub async fn run_until_shutdown(&self, mut signal: broadcast::Receiver<()>) -> Result<()> {
        tokio::select! {
            result = self.accept_connections() => result,
            _ = signal.recv() => {
                info!("Shutdown requested, draining sessions");
                self.shutdown().await
            }
        }
    }

    /// Main connection acceptance loop
    pub async fn accept_connections(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Session context not initialized"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.admit(stream, addr, context),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Apply the session cap and dispatch an accepted connection
    fn admit(&self, stream: TcpStream, addr: SocketAddr, context: &Arc<SessionContext>) {
        if self.shutdown_flag.load(Ordering::Relaxed) {
            debug!("Rejecting connection from {} due to shutdown", addr);
            drop(stream);
            return;
        }

        let slot = match self.resource_manager.acquire_connection_slot() {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Capacity exceeded, closing connection from {}: {}", addr, e);
                drop(stream);
                return;
            }
        };

        let session = Session::new(addr);
        info!(
            "New client {} as session {}, active sessions: {}",
            addr,
            session.id(),
            self.resource_manager.active_connections()
        );

        let context = Arc::clone(context);
        tokio::spawn(async move {
            let _slot = slot;
            Self::handle_session(session, stream, context).await;
        });
    }

    /// Run one session to completion; never fails outward
    #[instrument(skip_all, fields(session_id = session.id(), client = %session.client_addr()))]
    async fn handle_session(mut session: Session, stream: TcpStream, context: Arc<SessionContext>) {
        match Self::run_session(&mut session, stream, &context).await {
            Ok(stats) => {
                debug!(
                    "Session {} relayed {} bytes up, {} bytes down ({:?})",
                    session.id(),
                    stats.bytes_up,
                    stats.bytes_down,
                    stats.end
                );
            }
            Err(e @ SessionError::UnsupportedRequest { .. }) => {
                info!("Session {} rejected: {}", session.id(), e);
            }
            Err(e @ SessionError::Dial { .. }) => {
                warn!("Session {} could not reach its target: {}", session.id(), e);
            }
            Err(e @ SessionError::ProtocolViolation(_)) => {
                warn!("Session {} aborted: {}", session.id(), e);
            }
            Err(e @ SessionError::Transport(_)) => {
                error!("Session {} failed: {}", session.id(), e);
            }
        }

        session.advance(SessionState::Closed);
        info!(
            "Session {} from {} closed after {:?}",
            session.id(),
            session.client_addr(),
            session.elapsed()
        );
    }

    async fn run_session(
        session: &mut Session,
        stream: TcpStream,
        context: &SessionContext,
    ) -> std::result::Result<RelayStats, SessionError> {
        let identity = context.identity_for(&stream);
        let mut handler = Socks5Handler::new(stream);

        let target = match Self::establish(&mut handler, session, context).await {
            Ok(target) => target,
            Err(e) => {
                if let Some(status) = e.reply_status() {
                    if let Err(reply_err) = handler.send_reply(status, &identity).await {
                        debug!("Could not deliver {} reply: {}", status, reply_err);
                    }
                }
                return Err(e);
            }
        };

        handler
            .send_reply(ReplyStatus::Succeeded, &identity)
            .await?;
        session.advance(SessionState::Relaying);

        context
            .relay_engine
            .relay(session.id(), handler.into_inner(), target)
            .await
    }

    /// Negotiate, read the request and dial its target
    async fn establish(
        handler: &mut Socks5Handler<TcpStream>,
        session: &mut Session,
        context: &SessionContext,
    ) -> std::result::Result<TcpStream, SessionError> {
        let request = match context.handshake_timeout {
            Some(limit) => timeout(limit, Self::read_client_request(handler, session))
                .await
                .map_err(|_| {
                    SessionError::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("handshake not completed within {:?}", limit),
                    ))
                })??,
            None => Self::read_client_request(handler, session).await?,
        };

        info!(
            "Request {} {}:{} from {}",
            request.command,
            request.target,
            request.port,
            session.client_addr()
        );

        if request.command != Command::Connect {
            return Err(SessionError::unsupported(
                ReplyStatus::CommandNotSupported,
                format!("{} is not supported", request.command),
            ));
        }

        context
            .relay_engine
            .connect_to_target(&request.target, request.port)
            .await
    }

    async fn read_client_request(
        handler: &mut Socks5Handler<TcpStream>,
        session: &mut Session,
    ) -> std::result::Result<Request, SessionError> {
        handler.negotiate().await?;
        session.advance(SessionState::CommandPending);
        handler.read_request().await
    }

    /// Get the number of active sessions
    pub fn get_active_connections(&self) -> usize {
        self.resource_manager.active_connections()
    }

    /// Identity fixed at bind time; wildcard listeners report per connection
    pub fn server_identity(&self) -> Option<&ServerIdentity> {
        self.context.as_ref().map(|context| &context.identity)
    }

    pub fn get_connection_stats(&self) -> ResourceUsageStats {
        self.resource_manager.get_stats()
    }

    /// Stop accepting; sessions in flight run to their own end
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No acceptance loop listening for shutdown: {}", e);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for all sessions to end, bounded by the shutdown timeout
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            self.get_active_connections(),
            shutdown_timeout
        );

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.get_active_connections();
        if remaining == 0 {
            info!("All sessions closed in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                start_time.elapsed(),
                remaining
            );
        }

        Ok(())
    }

    /// Gracefully shutdown the connection manager
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}
