//! SOCKS5 Protocol Implementation
//!
//! Wire model, greeting negotiation and request parsing.

pub mod constants;
pub mod handler;
pub mod types;

pub use constants::*;
pub use handler::Socks5Handler;
pub use types::*;
