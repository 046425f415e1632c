//! Protocol module containing frame types, the binary codec, and stream ids.

pub mod codec;
pub mod frame;
pub mod stream_id;

pub use codec::{decode_frame, decode_header, encode_frame, FrameHeader, ProtocolError};
pub use frame::*;
pub use stream_id::{Side, StreamId, StreamIdAllocator, StreamKind};
