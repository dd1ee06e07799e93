//! Server error types.

use jt808_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the gateway.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("terminal database line {line}: {reason}")]
    RegistryLoad { line: usize, reason: String },

    #[error("unexpected message {0:#06x} during handshake")]
    ProtocolViolation(u16),

    #[error("terminal is not in the database")]
    RegistryMiss,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("terminal connection lost")]
    TerminalGone,

    #[error("firmware upgrade aborted")]
    UpgradeAborted,

    #[error("dialog aborted before completion")]
    DialogAborted,

    #[error("server is shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Whether the underlying I/O condition is transient and worth
    /// retrying on the same socket.
    pub fn is_transient(&self) -> bool {
        match self {
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
