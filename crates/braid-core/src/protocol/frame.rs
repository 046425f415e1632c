//! All Braid multiplexing frame types.
//!
//! Frames travel *inside* the secure channel.  The channel itself (TLS or any
//! other provider) takes care of encryption, retransmission, and packet
//! boundaries; frames only say which stream a chunk of bytes belongs to and
//! carry the small amount of control traffic needed for stream lifecycle and
//! flow control.

use serde::{Deserialize, Serialize};

use crate::domain::error_code::ErrorCode;
use crate::protocol::stream_id::StreamId;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest payload the codec accepts (1 MiB).
///
/// Decoding rejects anything larger before allocating, so a corrupt or hostile
/// length field cannot make the reader reserve gigabytes of memory.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

/// Size of the fixed-layout `Settings` payload.
pub const SETTINGS_PAYLOAD_SIZE: usize = 24;

/// Bit flags carried in the header's flags byte.
pub mod flags {
    /// On a `Stream` frame: this is the last frame of the sender's direction.
    pub const FIN: u8 = 1 << 0;
}

// ── Frame type codes ──────────────────────────────────────────────────────────

/// All frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    Settings = 0x01,
    Stream = 0x02,
    WindowUpdate = 0x03,
    ResetStream = 0x04,
    ConnectionClose = 0x05,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameType::Settings),
            0x02 => Ok(FrameType::Stream),
            0x03 => Ok(FrameType::WindowUpdate),
            0x04 => Ok(FrameType::ResetStream),
            0x05 => Ok(FrameType::ConnectionClose),
            _ => Err(()),
        }
    }
}

// ── Payload structs ───────────────────────────────────────────────────────────

/// SETTINGS (0x01): the multiplexing preface each side sends exactly once,
/// right after the secure-channel handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Bytes the sender is willing to buffer per stream before the peer must
    /// wait for a `WindowUpdate`.
    pub initial_stream_window: u32,
    /// Largest `Stream` payload the sender wants to receive.
    pub max_frame_payload: u32,
    /// Concurrently live bidirectional streams the peer may open.
    pub max_inbound_bidi_streams: u64,
    /// Concurrently live unidirectional streams the peer may open.
    pub max_inbound_uni_streams: u64,
}

// ── Top-level frame enum ──────────────────────────────────────────────────────

/// A decoded multiplexing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Connection preface.
    Settings(Settings),
    /// Stream data.  The first `Stream` frame for an id is what makes the
    /// stream visible to the receiver.  `fin` with empty `data` is the
    /// explicit finishing write.
    Stream {
        id: StreamId,
        fin: bool,
        data: Vec<u8>,
    },
    /// Returns `increment` bytes of send credit for `id` to the peer.
    WindowUpdate { id: StreamId, increment: u32 },
    /// Abrupt termination of both directions of `id`.
    ResetStream { id: StreamId, code: ErrorCode },
    /// Terminates the whole connection.
    ConnectionClose { code: ErrorCode, reason: String },
}

impl Frame {
    /// Returns the wire type code for this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Settings(_) => FrameType::Settings,
            Frame::Stream { .. } => FrameType::Stream,
            Frame::WindowUpdate { .. } => FrameType::WindowUpdate,
            Frame::ResetStream { .. } => FrameType::ResetStream,
            Frame::ConnectionClose { .. } => FrameType::ConnectionClose,
        }
    }

    /// Returns the stream this frame addresses, if it is stream-scoped.
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::Stream { id, .. }
            | Frame::WindowUpdate { id, .. }
            | Frame::ResetStream { id, .. } => Some(*id),
            Frame::Settings(_) | Frame::ConnectionClose { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_try_from_accepts_all_known_codes() {
        for code in 0x01..=0x05u8 {
            let ft = FrameType::try_from(code).expect("known code");
            assert_eq!(ft as u8, code);
        }
    }

    #[test]
    fn test_frame_type_try_from_rejects_unknown_code() {
        assert!(FrameType::try_from(0x00).is_err());
        assert!(FrameType::try_from(0x06).is_err());
        assert!(FrameType::try_from(0xFF).is_err());
    }

    #[test]
    fn test_connection_close_is_not_stream_scoped() {
        let frame = Frame::ConnectionClose {
            code: ErrorCode(0x0B),
            reason: String::new(),
        };
        assert_eq!(frame.stream_id(), None);
        assert_eq!(frame.frame_type(), FrameType::ConnectionClose);
    }

    #[test]
    fn test_reset_stream_reports_its_stream_id() {
        let id = StreamId::from_raw(4);
        let frame = Frame::ResetStream {
            id,
            code: ErrorCode(7),
        };
        assert_eq!(frame.stream_id(), Some(id));
    }
}
