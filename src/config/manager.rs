//! Configuration Manager

use super::Config;
use crate::protocol::SOCKS5_MAX_IDENTITY_HOST_LEN;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const ENV_BIND_ADDR: &str = "MINISOCKS_BIND_ADDR";
const ENV_MAX_CONNECTIONS: &str = "MINISOCKS_MAX_CONNECTIONS";
const ENV_RELAY_TIMEOUT: &str = "MINISOCKS_RELAY_TIMEOUT";
const ENV_BUFFER_SIZE: &str = "MINISOCKS_BUFFER_SIZE";
const ENV_LOG_LEVEL: &str = "MINISOCKS_LOG_LEVEL";
const ENV_ADVERTISED_HOST: &str = "MINISOCKS_ADVERTISED_HOST";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Parse and validate TOML configuration text
    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).context("Invalid TOML configuration")?;
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults plus the variables `lookup` yields
    pub fn load_from_vars<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(bind_addr) = lookup(ENV_BIND_ADDR) {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid {}: {}", ENV_BIND_ADDR, bind_addr))?;
        }

        if let Some(max_conn) = lookup(ENV_MAX_CONNECTIONS) {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid {}: {}", ENV_MAX_CONNECTIONS, max_conn))?;
        }

        if let Some(timeout) = lookup(ENV_RELAY_TIMEOUT) {
            config.server.relay_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid {}: {}", ENV_RELAY_TIMEOUT, timeout))?;
        }

        if let Some(buffer_size) = lookup(ENV_BUFFER_SIZE) {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid {}: {}", ENV_BUFFER_SIZE, buffer_size))?;
        }

        if let Some(host) = lookup(ENV_ADVERTISED_HOST) {
            config.server.advertised_host = Some(host);
        }

        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .context("Server configuration validation failed")?;
        self.validate_logging_config()
            .context("Logging configuration validation failed")?;
        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        let server = &self.server;

        if server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if server.max_connections > 100_000 {
            bail!("max_connections cannot exceed 100,000");
        }

        if server.relay_timeout.is_zero() {
            bail!("relay_timeout must be greater than 0");
        }

        if server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if server.buffer_size > 16 * 1024 * 1024 {
            bail!("buffer_size cannot exceed 16MB");
        }

        if let Some(timeout) = server.handshake_timeout {
            if timeout.is_zero() {
                bail!("handshake_timeout must be greater than 0 when set");
            }
        }

        if let Some(host) = &server.advertised_host {
            if host.is_empty() {
                bail!("advertised_host cannot be empty");
            }
            if host.len() > SOCKS5_MAX_IDENTITY_HOST_LEN {
                bail!(
                    "advertised_host cannot exceed {} bytes",
                    SOCKS5_MAX_IDENTITY_HOST_LEN
                );
            }
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "logging.level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            );
        }
        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        relay_timeout: Option<Duration>,
        buffer_size: Option<usize>,
    ) -> Result<()> {
        if let Some(bind_str) = bind {
            let addr = bind_str
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
            self.server.bind_addr = addr;
            tracing::info!("CLI override: bind address set to {}", addr);
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(timeout) = relay_timeout {
            self.server.relay_timeout = timeout;
            tracing::info!("CLI override: relay timeout set to {:?}", timeout);
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        Ok(())
    }
}
