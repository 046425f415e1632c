//! # braid-core
//!
//! Shared library for Braid containing the multiplexing frame codec, stream
//! identifiers, flow-control windows, and the state enums that describe
//! connections and streams.
//!
//! This crate is used by `braid-transport` on both the server and the client
//! side. It has zero dependencies on sockets, async runtimes, or TLS.
//!
//! # Architecture overview (for beginners)
//!
//! Braid carries many independent byte streams over a single secure channel.
//! Each side wraps the bytes of every stream into small *frames* that name the
//! stream they belong to, so the receiver can sort them back into the right
//! buffers.  This crate defines:
//!
//! - **`protocol`** – How frames look on the wire.  Every frame has a 16-byte
//!   header followed by a payload, and is encoded/decoded by the codec.  The
//!   stream-id scheme also lives here.
//!
//! - **`domain`** – Pure state with no I/O: error codes, the connection and
//!   stream state enums, and the credit-based flow-control windows that make
//!   writers wait instead of flooding a slow reader.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `braid_core::StreamId` instead of `braid_core::protocol::stream_id::StreamId`.
pub use domain::connection::{CloseReason, ConnectionId, ConnectionState};
pub use domain::error_code::ErrorCode;
pub use domain::flow_control::{FlowControlViolation, RecvWindow, SendCredit};
pub use domain::stream_state::{Direction, RecvState, SendState, StreamState};
pub use protocol::codec::{decode_frame, decode_header, encode_frame, FrameHeader, ProtocolError};
pub use protocol::frame::{Frame, FrameType, Settings};
pub use protocol::stream_id::{
    RemoteStreamIds, Side, StreamId, StreamIdAllocator, StreamIdObservation, StreamKind,
};
