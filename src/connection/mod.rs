//! Connection Management Module
//!
//! Accepts clients, applies the session cap and drives each session from
//! negotiation to relay teardown.

pub mod manager;
pub mod session;

pub use manager::ConnectionManager;
pub use session::{Session, SessionState};
