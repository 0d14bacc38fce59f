use std::io;
use thiserror::Error;

/// Result type for TWAMP client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for TWAMP control and test operations
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to connect to the control port of the target
    #[error("failed to connect to {0}: {1}")]
    ConnectFailed(String, #[source] io::Error),

    /// Server does not offer a mode we can speak
    #[error("server offers no supported mode (modes {0:#06x})")]
    UnsupportedMode(u32),

    /// Server refused the session request
    #[error("session request rejected (accept code {0})")]
    SessionRejected(u8),

    /// Server refused to start the negotiated sessions
    #[error("start-sessions rejected (accept code {0})")]
    StartRejected(u8),

    /// Connection closed by peer
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Timed out waiting for a reply
    #[error("timed out waiting for a reply")]
    Timeout,

    /// Received a message we cannot decode
    #[error("malformed message: {0}")]
    InvalidMessage(String),

    /// Measurement run was cancelled before completion
    #[error("measurement run cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if the underlying connection is no longer usable and
    /// the session should be discarded rather than reused.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Returns true if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_closed_classification() {
        assert!(Error::ConnectionClosed.is_connection_closed());
        assert!(Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")).is_connection_closed());
        assert!(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).is_connection_closed());
        assert!(Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).is_connection_closed());

        // A refused connect or a bad payload does not condemn the session
        assert!(!Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")).is_connection_closed());
        assert!(!Error::InvalidMessage("truncated".to_string()).is_connection_closed());
        assert!(!Error::Timeout.is_connection_closed());
        assert!(!Error::Cancelled.is_connection_closed());
    }

    #[test]
    fn test_timeout_classification() {
        assert!(Error::Timeout.is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
        assert!(!Error::SessionRejected(1).is_timeout());
    }
}
