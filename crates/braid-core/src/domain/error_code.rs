//! Application and transport error codes carried by aborts and closes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque 64-bit code sent with `ResetStream` and `ConnectionClose`.
///
/// Applications choose their own codes and the transport carries them
/// verbatim to the peer.  A handful of values at the top of the 32-bit range
/// are reserved for errors the transport itself detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u64);

impl ErrorCode {
    /// Graceful termination with nothing to report.
    pub const NO_ERROR: ErrorCode = ErrorCode(0);

    /// The peer sent a frame that breaks the multiplexing protocol.
    pub const PROTOCOL_VIOLATION: ErrorCode = ErrorCode(0xFFFF_FF01);

    /// The peer sent more stream data than the advertised window allowed.
    pub const FLOW_CONTROL: ErrorCode = ErrorCode(0xFFFF_FF02);

    /// The peer opened more concurrent streams than the advertised limit.
    pub const STREAM_LIMIT: ErrorCode = ErrorCode(0xFFFF_FF03);

    /// Returns `true` for the codes the transport reserves for itself.
    pub fn is_transport_reserved(self) -> bool {
        matches!(
            self,
            Self::PROTOCOL_VIOLATION | Self::FLOW_CONTROL | Self::STREAM_LIMIT
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u64> for ErrorCode {
    fn from(value: u64) -> Self {
        ErrorCode(value)
    }
}
