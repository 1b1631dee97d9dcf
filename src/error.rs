//! Error types for WebSocket connection operations.
//!
//! Every failure the connection can observe maps onto one variant here.
//! Receiver-side protocol failures additionally map onto the close code the
//! connection answers with (see [`Error::close_code`]).

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Operation requires an open connection.
    #[error("WebSocket is not open (state: {0})")]
    NotOpen(ConnectionState),

    /// Protocol violation detected in inbound frames.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Payload exceeds the configured maximum.
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Close code that may not appear in a close frame.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Close reason longer than fits in a control frame.
    #[error("Close reason too long: {0} bytes (max: 123)")]
    CloseReasonTooLong(usize),

    /// The underlying socket failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A queued frame could not be written.
    #[error("Write failed: {0}")]
    Write(String),

    /// Extension-related error (e.g. compression failure).
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension configuration.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// The connection was torn down before the operation completed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Close code sent to the peer when this error is detected on inbound data.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidUtf8 | Error::Extension(_) => CloseCode::InvalidPayload,
            Error::PayloadTooLarge { .. } | Error::TooManyFragments { .. } => {
                CloseCode::MessageTooBig
            }
            _ => CloseCode::ProtocolError,
        }
    }

    /// Returns `true` for failures caused by the peer's frames.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        !matches!(
            self,
            Error::NotOpen(_)
                | Error::Transport(_)
                | Error::Write(_)
                | Error::ConnectionClosed
                | Error::InvalidExtension(_)
                | Error::CloseReasonTooLong(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PayloadTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(err.to_string(), "Payload too large: 2048 bytes (max: 1024)");

        let err = Error::NotOpen(ConnectionState::Closing);
        assert_eq!(err.to_string(), "WebSocket is not open (state: Closing)");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Transport(ref msg) if msg == "pipe broken"));
    }

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(Error::InvalidUtf8.close_code(), CloseCode::InvalidPayload);
        assert_eq!(
            Error::PayloadTooLarge { size: 2, max: 1 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(
            Error::TooManyFragments { count: 2, max: 1 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(Error::ReservedBitsSet.close_code(), CloseCode::ProtocolError);
        assert_eq!(
            Error::ProtocolViolation("x".into()).close_code(),
            CloseCode::ProtocolError
        );
    }

    #[test]
    fn test_is_protocol() {
        assert!(Error::UnmaskedClientFrame.is_protocol());
        assert!(Error::InvalidCloseCode(1005).is_protocol());
        assert!(!Error::Transport("reset".into()).is_protocol());
        assert!(!Error::NotOpen(ConnectionState::Closed).is_protocol());
    }
}
