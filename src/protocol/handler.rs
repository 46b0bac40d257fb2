//! SOCKS5 Protocol Handler

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::{
    encode_reply, AddressType, AuthMethod, Command, Greeting, ReplyStatus, Request,
    ServerIdentity, TargetAddr,
};
use crate::error::SessionError;
use crate::protocol::constants::*;

/// SOCKS5 protocol handler for one client connection
pub struct Socks5Handler<S> {
    stream: S,
}

impl<S> Socks5Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new SOCKS5 handler for the given stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Read the greeting and answer with the method selection.
    ///
    /// The offered methods are only recorded: the reply always selects
    /// "no authentication required". Consumes exactly `2 + NMETHODS` bytes.
    pub async fn negotiate(&mut self) -> Result<Greeting, SessionError> {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).await?;

        let version = header[0];
        let n_methods = header[1];

        if version != SOCKS5_VERSION {
            return Err(SessionError::ProtocolViolation(format!(
                "unsupported SOCKS version 0x{:02x} in greeting",
                version
            )));
        }
        if n_methods < 1 {
            return Err(SessionError::ProtocolViolation(
                "greeting offers no authentication methods".to_string(),
            ));
        }

        let mut codes = vec![0u8; n_methods as usize];
        self.stream.read_exact(&mut codes).await?;
        let methods: Vec<AuthMethod> = codes.into_iter().map(AuthMethod::from_code).collect();
        debug!(?methods, "client offered authentication methods");

        let selection = [SOCKS5_VERSION, AuthMethod::NoAuthenticationRequired.method_code()];
        self.stream.write_all(&selection).await?;
        self.stream.flush().await?;

        Ok(Greeting { version, methods })
    }

    /// Read and decode the proxy request that follows negotiation
    pub async fn read_request(&mut self) -> Result<Request, SessionError> {
        // VER CMD RSV ATYP
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await?;

        let [version, command, reserved, address_type] = header;

        if reserved != SOCKS5_RESERVED {
            return Err(SessionError::ProtocolViolation(format!(
                "reserved field must be 0x00, got 0x{:02x}",
                reserved
            )));
        }
        if version != SOCKS5_VERSION {
            return Err(SessionError::ProtocolViolation(format!(
                "unsupported SOCKS version 0x{:02x} in request",
                version
            )));
        }

        let command = Command::from_code(command).ok_or_else(|| {
            SessionError::unsupported(
                ReplyStatus::CommandNotSupported,
                format!("unknown command 0x{:02x}", command),
            )
        })?;
        let address_type = AddressType::from_code(address_type).ok_or_else(|| {
            SessionError::unsupported(
                ReplyStatus::AddressTypeNotSupported,
                format!("unknown address type 0x{:02x}", address_type),
            )
        })?;

        let target = match address_type {
            AddressType::Domain => {
                let len = self.stream.read_u8().await? as usize;
                let mut name = vec![0u8; len];
                self.stream.read_exact(&mut name).await?;
                let domain = String::from_utf8(name).map_err(|e| {
                    SessionError::ProtocolViolation(format!("domain name is not UTF-8: {}", e))
                })?;
                TargetAddr::Domain(domain)
            }
            AddressType::Ipv4 => {
                let mut octets = [0u8; 4];
                self.stream.read_exact(&mut octets).await?;
                TargetAddr::Ipv4(octets.into())
            }
            AddressType::Ipv6 => {
                // decoded so the connection closes cleanly, never dialed
                let mut rest = [0u8; 18];
                self.stream.read_exact(&mut rest).await?;
                return Err(SessionError::unsupported(
                    ReplyStatus::CommandNotSupported,
                    "IPv6 targets are not implemented",
                ));
            }
        };

        let port = self.stream.read_u16().await?;
        trace!(%command, %target, port, "decoded request");

        Ok(Request {
            command,
            target,
            port,
        })
    }

    /// Send a command reply carrying this server's identity
    pub async fn send_reply(
        &mut self,
        status: ReplyStatus,
        identity: &ServerIdentity,
    ) -> Result<(), SessionError> {
        let reply = encode_reply(status, identity);
        self.stream.write_all(&reply).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Get the underlying stream back for relaying
    pub fn into_inner(self) -> S {
        self.stream
    }
}
