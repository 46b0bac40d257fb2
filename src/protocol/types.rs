//! SOCKS5 Protocol Types

use std::fmt;
use std::net::Ipv4Addr;

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::constants::*;
use crate::Result;

/// How a target address is encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
}

impl AddressType {
    /// Decode an ATYP byte, `None` for codes outside the protocol
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_ADDR_IPV4 => Some(AddressType::Ipv4),
            SOCKS5_ADDR_DOMAIN => Some(AddressType::Domain),
            SOCKS5_ADDR_IPV6 => Some(AddressType::Ipv6),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            AddressType::Ipv4 => SOCKS5_ADDR_IPV4,
            AddressType::Domain => SOCKS5_ADDR_DOMAIN,
            AddressType::Ipv6 => SOCKS5_ADDR_IPV6,
        }
    }
}

/// SOCKS5 Commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    /// Decode a CMD byte, `None` for codes outside the protocol
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_CMD_CONNECT => Some(Command::Connect),
            SOCKS5_CMD_BIND => Some(Command::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Connect => "CONNECT",
            Command::Bind => "BIND",
            Command::UdpAssociate => "UDP_ASSOCIATE",
        };
        f.write_str(name)
    }
}

/// Authentication methods a client may advertise
///
/// Every byte value falls in exactly one range, so decoding never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuthenticationRequired,
    Gssapi,
    UsernamePassword,
    IanaAssigned(u8),
    PrivateMethod(u8),
    NoAcceptableMethods,
}

impl AuthMethod {
    /// Create from method code
    pub fn from_code(code: u8) -> Self {
        match code {
            SOCKS5_AUTH_NONE => AuthMethod::NoAuthenticationRequired,
            SOCKS5_AUTH_GSSAPI => AuthMethod::Gssapi,
            SOCKS5_AUTH_USERPASS => AuthMethod::UsernamePassword,
            SOCKS5_AUTH_IANA_FIRST..=SOCKS5_AUTH_IANA_LAST => AuthMethod::IanaAssigned(code),
            SOCKS5_AUTH_PRIVATE_FIRST..=SOCKS5_AUTH_PRIVATE_LAST => AuthMethod::PrivateMethod(code),
            SOCKS5_AUTH_NO_ACCEPTABLE => AuthMethod::NoAcceptableMethods,
        }
    }

    /// Convert to method code
    pub fn method_code(&self) -> u8 {
        match self {
            AuthMethod::NoAuthenticationRequired => SOCKS5_AUTH_NONE,
            AuthMethod::Gssapi => SOCKS5_AUTH_GSSAPI,
            AuthMethod::UsernamePassword => SOCKS5_AUTH_USERPASS,
            AuthMethod::IanaAssigned(code) | AuthMethod::PrivateMethod(code) => *code,
            AuthMethod::NoAcceptableMethods => SOCKS5_AUTH_NO_ACCEPTABLE,
        }
    }
}

/// Status carried in the REP field of a command reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Succeeded,
    GeneralFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unassigned,
}

impl ReplyStatus {
    /// Decode a REP byte; 0x09 through 0xFF are all unassigned
    pub fn from_code(code: u8) -> Self {
        match code {
            SOCKS5_REPLY_SUCCESS => ReplyStatus::Succeeded,
            SOCKS5_REPLY_GENERAL_FAILURE => ReplyStatus::GeneralFailure,
            SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => ReplyStatus::ConnectionNotAllowed,
            SOCKS5_REPLY_NETWORK_UNREACHABLE => ReplyStatus::NetworkUnreachable,
            SOCKS5_REPLY_HOST_UNREACHABLE => ReplyStatus::HostUnreachable,
            SOCKS5_REPLY_CONNECTION_REFUSED => ReplyStatus::ConnectionRefused,
            SOCKS5_REPLY_TTL_EXPIRED => ReplyStatus::TtlExpired,
            SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => ReplyStatus::CommandNotSupported,
            SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => ReplyStatus::AddressTypeNotSupported,
            _ => ReplyStatus::Unassigned,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ReplyStatus::Succeeded => SOCKS5_REPLY_SUCCESS,
            ReplyStatus::GeneralFailure => SOCKS5_REPLY_GENERAL_FAILURE,
            ReplyStatus::ConnectionNotAllowed => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
            ReplyStatus::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
            ReplyStatus::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
            ReplyStatus::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
            ReplyStatus::TtlExpired => SOCKS5_REPLY_TTL_EXPIRED,
            ReplyStatus::CommandNotSupported => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            ReplyStatus::AddressTypeNotSupported => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            ReplyStatus::Unassigned => SOCKS5_REPLY_UNASSIGNED,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReplyStatus::Succeeded => "succeeded",
            ReplyStatus::GeneralFailure => "general SOCKS server failure",
            ReplyStatus::ConnectionNotAllowed => "connection not allowed by ruleset",
            ReplyStatus::NetworkUnreachable => "network unreachable",
            ReplyStatus::HostUnreachable => "host unreachable",
            ReplyStatus::ConnectionRefused => "connection refused",
            ReplyStatus::TtlExpired => "TTL expired",
            ReplyStatus::CommandNotSupported => "command not supported",
            ReplyStatus::AddressTypeNotSupported => "address type not supported",
            ReplyStatus::Unassigned => "unassigned",
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.description(), self.code())
    }
}

/// Target address of a request this server can dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl TargetAddr {
    pub fn address_type(&self) -> AddressType {
        match self {
            TargetAddr::Ipv4(_) => AddressType::Ipv4,
            TargetAddr::Domain(_) => AddressType::Domain,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(domain) => f.write_str(domain),
        }
    }
}

/// SOCKS5 Greeting message from client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    pub methods: Vec<AuthMethod>,
}

/// A decoded request the server is willing to consider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub target: TargetAddr,
    pub port: u16,
}

/// Address and port this server reports as BND.ADDR / BND.PORT
///
/// Always encoded as a domain-type address, whatever the outbound socket is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    host: String,
    port: u16,
}

impl ServerIdentity {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.len() > SOCKS5_MAX_IDENTITY_HOST_LEN {
            bail!(
                "server identity host is {} bytes, at most {} fit in a reply",
                host.len(),
                SOCKS5_MAX_IDENTITY_HOST_LEN
            );
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Encode a command reply: VER REP RSV ATYP=DOMAIN LEN HOST PORT
pub fn encode_reply(status: ReplyStatus, identity: &ServerIdentity) -> Bytes {
    let host = identity.host.as_bytes();
    let mut buf = BytesMut::with_capacity(SOCKS5_REPLY_BUFFER_LEN);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(status.code());
    buf.put_u8(SOCKS5_RESERVED);
    buf.put_u8(SOCKS5_ADDR_DOMAIN);
    buf.put_u8(host.len() as u8);
    buf.put_slice(host);
    buf.put_u16(identity.port);
    buf.freeze()
}
