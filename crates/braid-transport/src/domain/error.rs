//! Error types surfaced by the transport.
//!
//! # How errors travel (for beginners)
//!
//! - **Bind and handshake failures** go straight back to whoever called
//!   `bind`, `accept`, or `connect`.  The transport never retries them.
//! - **Connection failures** (the peer closed, or the channel broke) reach
//!   every stream operation that was waiting on that connection, once each.
//! - **Stream aborts** only affect the one stream that was aborted.
//!
//! Backpressure is *not* an error: a writer with no credit simply waits.

use std::net::SocketAddr;

use braid_core::ErrorCode;
use thiserror::Error;

use crate::domain::config::ConfigError;

/// The listener (or connector) could not start.
#[derive(Debug, Error)]
pub enum BindError {
    /// The secure-channel provider cannot run on this platform.
    #[error("secure transport is not supported on this platform")]
    Unsupported,

    /// The local endpoint could not be reserved.
    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The transport configuration was rejected before binding.
    #[error("invalid transport configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A connection attempt failed before it produced a `Connection`.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Neither side offered an application protocol the other accepts.
    #[error("no common application protocol")]
    NoCommonProtocol,

    /// The peer refused the handshake.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// A handshake message could not be parsed.
    #[error("malformed handshake message: {0}")]
    Malformed(String),

    /// The multiplexing `Settings` preface was missing or invalid.
    #[error("invalid multiplexing preface: {0}")]
    Preface(String),
}

/// Every error a transport operation can return.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The connection was closed (locally, or by the peer's close frame).
    #[error("connection closed")]
    ConnectionClosed,

    /// The secure channel failed without a close frame.
    #[error("connection reset")]
    ConnectionReset,

    /// The stream was aborted by either side with the given code.
    #[error("stream aborted with code {0}")]
    StreamAborted(ErrorCode),

    /// The operation was unblocked by its owner shutting down.
    #[error("operation cancelled")]
    Cancelled,

    /// The listener has been shut down.
    #[error("listener closed")]
    Closed,

    /// The operation does not fit the stream's direction.
    #[error("invalid direction: {0}")]
    InvalidDirection(&'static str),

    /// Data was written after `finish()`.
    #[error("stream already finished")]
    StreamFinished,

    /// `read_to_end` found more bytes than its limit allows.
    #[error("stream data exceeds the {limit} byte limit")]
    ReadLimitExceeded { limit: usize },
}

impl TransportError {
    /// The abort code carried by this error, if any.
    pub fn abort_code(&self) -> Option<ErrorCode> {
        match self {
            TransportError::StreamAborted(code) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_code_is_only_present_on_stream_aborted() {
        assert_eq!(
            TransportError::StreamAborted(ErrorCode(7)).abort_code(),
            Some(ErrorCode(7))
        );
        assert_eq!(TransportError::ConnectionReset.abort_code(), None);
    }

    #[test]
    fn test_bind_error_converts_into_transport_error() {
        let err: TransportError = BindError::Unsupported.into();
        assert!(matches!(err, TransportError::Bind(BindError::Unsupported)));
    }

    #[test]
    fn test_handshake_error_message_is_transparent() {
        let err: TransportError = HandshakeError::NoCommonProtocol.into();
        assert_eq!(err.to_string(), "no common application protocol");
    }
}
