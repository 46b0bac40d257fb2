//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::relay::{DEFAULT_BUFFER_SIZE, DEFAULT_RELAY_TIMEOUT};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Concurrent sessions admitted before new clients are turned away
    pub max_connections: usize,
    /// Absolute budget of a relay, counted from the CONNECT success reply
    #[serde(with = "humantime_serde")]
    pub relay_timeout: Duration,
    pub buffer_size: usize,
    /// Deadline for negotiation and request parsing; none waits forever
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Report refused/unreachable targets with their own reply codes
    /// instead of a general failure
    pub detailed_dial_errors: bool,
    /// Host reported in BND.ADDR; defaults to the bound IP
    pub advertised_host: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 10086)),
            max_connections: 100,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            handshake_timeout: None,
            shutdown_timeout: Duration::from_secs(5),
            detailed_dial_errors: false,
            advertised_host: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
