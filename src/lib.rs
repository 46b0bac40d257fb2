//! minisocks Library
//!
//! A small SOCKS5 proxy: no authentication, CONNECT only, IPv4 and domain
//! targets, a fixed session cap and an absolute lifetime per relay.

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod resource;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use error::SessionError;
pub use resource::ResourceManager;
pub use shutdown::ShutdownCoordinator;

/// Common error type for process-level operations
pub type Result<T> = anyhow::Result<T>;
