//! Session Errors
//!
//! Everything that can end a single client session. None of these are fatal
//! to the listener; they are handled at the boundary of the session task.

use std::io;

use thiserror::Error;

use crate::protocol::ReplyStatus;

/// Why a session ended before (or during) relaying
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed version or reserved field, the session is dropped without a reply
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A well-formed request this server does not serve
    #[error("unsupported request: {reason}")]
    UnsupportedRequest { status: ReplyStatus, reason: String },

    /// The requested target could not be reached
    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        status: ReplyStatus,
        #[source]
        source: io::Error,
    },

    /// I/O failure on either socket
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl SessionError {
    pub fn unsupported(status: ReplyStatus, reason: impl Into<String>) -> Self {
        SessionError::UnsupportedRequest {
            status,
            reason: reason.into(),
        }
    }

    /// The reply owed to the client, if any
    pub fn reply_status(&self) -> Option<ReplyStatus> {
        match self {
            SessionError::UnsupportedRequest { status, .. } | SessionError::Dial { status, .. } => {
                Some(*status)
            }
            SessionError::ProtocolViolation(_) | SessionError::Transport(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_owed_only_for_rejections() {
        let unsupported = SessionError::unsupported(ReplyStatus::CommandNotSupported, "BIND");
        assert_eq!(unsupported.reply_status(), Some(ReplyStatus::CommandNotSupported));

        let dial = SessionError::Dial {
            target: "127.0.0.1:9".to_string(),
            status: ReplyStatus::GeneralFailure,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(dial.reply_status(), Some(ReplyStatus::GeneralFailure));

        let violation = SessionError::ProtocolViolation("version 4".to_string());
        assert_eq!(violation.reply_status(), None);

        let transport = SessionError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(transport.reply_status(), None);
    }
}
