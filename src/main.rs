//! minisocks - a minimal SOCKS5 CONNECT proxy

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use minisocks::{config::ConfigManager, Config, ConnectionManager, ShutdownCoordinator};

/// CLI arguments for minisocks
#[derive(Parser, Debug)]
#[command(name = "minisocks")]
#[command(about = "Minimal SOCKS5 proxy: no authentication, CONNECT only")]
#[command(version)]
#[command(long_about = "
minisocks - minimal SOCKS5 proxy

Accepts SOCKS5 clients without authentication, serves CONNECT to IPv4 and
domain targets, and relays each session for at most the relay timeout.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables (only read when no configuration file exists)
4. Built-in defaults

Environment variables:
  MINISOCKS_BIND_ADDR          - Bind address (e.g., 0.0.0.0:10086)
  MINISOCKS_MAX_CONNECTIONS    - Maximum concurrent sessions
  MINISOCKS_RELAY_TIMEOUT      - Relay lifetime (e.g., 30s, 2m)
  MINISOCKS_BUFFER_SIZE        - Relay buffer size in bytes
  MINISOCKS_ADVERTISED_HOST    - Host reported in replies
  MINISOCKS_LOG_LEVEL          - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "minisocks.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 0.0.0.0:10086)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Maximum number of concurrent sessions
    #[arg(long, help = "Maximum number of concurrent sessions")]
    pub max_connections: Option<usize>,

    /// Relay lifetime, e.g. 30s
    #[arg(long, value_parser = humantime::parse_duration, help = "Relay lifetime (e.g., 30s)")]
    pub relay_timeout: Option<Duration>,

    /// Buffer size in bytes
    #[arg(long, help = "Relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level (overrides config file)")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = load_config(&args)?;

    init_tracing(&args, &config)?;

    info!("Starting minisocks v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Relay timeout: {:?}", config.server.relay_timeout);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!(
            "  Handshake timeout: {}",
            match config.server.handshake_timeout {
                Some(limit) => format!("{:?}", limit),
                None => "none".to_string(),
            }
        );
        return Ok(());
    }

    info!("Bind address: {}", config.server.bind_addr);
    info!("Max connections: {}", config.server.max_connections);
    info!("Relay timeout: {:?}", config.server.relay_timeout);

    let shutdown_coordinator = ShutdownCoordinator::new();

    let mut connection_manager = ConnectionManager::new(Arc::new(config));
    connection_manager
        .bind()
        .await
        .context("Failed to start listener")?;

    // Subscribed before any signal can arrive
    let shutdown_rx = shutdown_coordinator.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = connection_manager.run_until_shutdown(shutdown_rx).await {
            error!("Server error: {}", e);
        }
    });

    info!("minisocks started, press Ctrl+C or send SIGTERM/SIGINT to stop");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    info!("Initiating graceful shutdown...");

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Load configuration with priority: CLI args > config file > environment > defaults
fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.relay_timeout,
        args.buffer_size,
    )?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    Ok(config)
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
