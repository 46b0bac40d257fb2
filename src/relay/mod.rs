//! Target Dialing and Data Relay
//!
//! Opens the outbound connection for a CONNECT request and relays bytes
//! between client and target for the lifetime of the session.

pub mod engine;
pub mod session;

pub use engine::{RelayEngine, DEFAULT_BUFFER_SIZE, DEFAULT_RELAY_TIMEOUT};
pub use session::{RelayEnd, RelaySession, RelayStats};
