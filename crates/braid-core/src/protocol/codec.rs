//! Binary codec for encoding and decoding Braid multiplexing frames.
//!
//! Wire format:
//! ```text
//! [version:1][frame_type:1][flags:1][reserved:1][payload_len:4][stream_id:8][payload:N]
//! ```
//! Total header size: 16 bytes. All multi-byte integers are big-endian.
//! Frames that are not stream-scoped (`Settings`, `ConnectionClose`) carry a
//! zero stream id, which the decoder ignores.

use crate::domain::error_code::ErrorCode;
use crate::protocol::frame::{
    flags, Frame, FrameType, Settings, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
    SETTINGS_PAYLOAD_SIZE,
};
use crate::protocol::stream_id::StreamId;
use thiserror::Error;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame type byte in the header is not a recognized value.
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (wrong fixed size, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// The decoded fixed-size header of a frame.
///
/// Readers decode the header first, learn `payload_len`, and then read exactly
/// that many more bytes before calling [`decode_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: u8,
    pub payload_len: usize,
    pub stream_id: StreamId,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Frame`] into a byte vector including the 16-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload would exceed
/// [`MAX_PAYLOAD_SIZE`].
///
/// # Examples
///
/// ```rust
/// use braid_core::protocol::{decode_frame, encode_frame, Frame, StreamId};
///
/// let frame = Frame::WindowUpdate { id: StreamId::from_raw(4), increment: 1024 };
/// let bytes = encode_frame(&frame).unwrap();
/// let (decoded, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, frame);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let payload_len = payload_len(frame);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);

    let frame_flags = match frame {
        Frame::Stream { fin: true, .. } => flags::FIN,
        _ => 0,
    };
    let stream_id = frame.stream_id().map(StreamId::as_u64).unwrap_or(0);

    buf.push(PROTOCOL_VERSION);
    buf.push(frame.frame_type() as u8);
    buf.push(frame_flags);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
    buf.extend_from_slice(&stream_id.to_be_bytes());

    encode_payload(&mut buf, frame);
    Ok(buf)
}

/// Decodes and validates the 16-byte header at the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] for short input, an unknown version or type, or a
/// declared payload larger than [`MAX_PAYLOAD_SIZE`].
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let type_byte = bytes[1];
    let frame_type =
        FrameType::try_from(type_byte).map_err(|_| ProtocolError::UnknownFrameType(type_byte))?;

    // bytes[3] is reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let stream_id = StreamId::from_raw(read_u64(&bytes[8..16]));

    Ok(FrameHeader {
        frame_type,
        flags: bytes[2],
        payload_len,
        stream_id,
    })
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the decoded frame and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or incomplete.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let header = decode_header(bytes)?;

    let total_needed = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: header.payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let frame = decode_payload(&header, payload)?;
    Ok((frame, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn payload_len(frame: &Frame) -> usize {
    match frame {
        Frame::Settings(_) => SETTINGS_PAYLOAD_SIZE,
        Frame::Stream { data, .. } => data.len(),
        Frame::WindowUpdate { .. } => 4,
        Frame::ResetStream { .. } => 8,
        Frame::ConnectionClose { reason, .. } => 8 + reason.len(),
    }
}

fn encode_payload(buf: &mut Vec<u8>, frame: &Frame) {
    match frame {
        Frame::Settings(s) => {
            buf.extend_from_slice(&s.initial_stream_window.to_be_bytes());
            buf.extend_from_slice(&s.max_frame_payload.to_be_bytes());
            buf.extend_from_slice(&s.max_inbound_bidi_streams.to_be_bytes());
            buf.extend_from_slice(&s.max_inbound_uni_streams.to_be_bytes());
        }
        Frame::Stream { data, .. } => buf.extend_from_slice(data),
        Frame::WindowUpdate { increment, .. } => buf.extend_from_slice(&increment.to_be_bytes()),
        Frame::ResetStream { code, .. } => buf.extend_from_slice(&code.0.to_be_bytes()),
        Frame::ConnectionClose { code, reason } => {
            buf.extend_from_slice(&code.0.to_be_bytes());
            buf.extend_from_slice(reason.as_bytes());
        }
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(header: &FrameHeader, payload: &[u8]) -> Result<Frame, ProtocolError> {
    match header.frame_type {
        FrameType::Settings => {
            require_exact(payload, SETTINGS_PAYLOAD_SIZE, "SETTINGS")?;
            Ok(Frame::Settings(Settings {
                initial_stream_window: read_u32(&payload[0..4]),
                max_frame_payload: read_u32(&payload[4..8]),
                max_inbound_bidi_streams: read_u64(&payload[8..16]),
                max_inbound_uni_streams: read_u64(&payload[16..24]),
            }))
        }
        FrameType::Stream => Ok(Frame::Stream {
            id: header.stream_id,
            fin: header.flags & flags::FIN != 0,
            data: payload.to_vec(),
        }),
        FrameType::WindowUpdate => {
            require_exact(payload, 4, "WINDOW_UPDATE")?;
            Ok(Frame::WindowUpdate {
                id: header.stream_id,
                increment: read_u32(payload),
            })
        }
        FrameType::ResetStream => {
            require_exact(payload, 8, "RESET_STREAM")?;
            Ok(Frame::ResetStream {
                id: header.stream_id,
                code: ErrorCode(read_u64(payload)),
            })
        }
        FrameType::ConnectionClose => {
            if payload.len() < 8 {
                return Err(ProtocolError::MalformedPayload(format!(
                    "CONNECTION_CLOSE payload must be at least 8 bytes, got {}",
                    payload.len()
                )));
            }
            let reason = std::str::from_utf8(&payload[8..])
                .map_err(|e| ProtocolError::MalformedPayload(format!("close reason: {e}")))?
                .to_string();
            Ok(Frame::ConnectionClose {
                code: ErrorCode(read_u64(&payload[0..8])),
                reason,
            })
        }
    }
}

fn require_exact(payload: &[u8], len: usize, what: &str) -> Result<(), ProtocolError> {
    if payload.len() != len {
        return Err(ProtocolError::MalformedPayload(format!(
            "{what} payload must be {len} bytes, got {}",
            payload.len()
        )));
    }
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
