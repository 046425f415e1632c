//! Integration tests for the braid-core frame codec.
//!
//! These tests drive the codec the way the connection reader does: decode a
//! header, then the whole frame, over a byte buffer that holds several frames
//! back to back.  They also check the stream-id and flow-control helpers that
//! the reader consults for each decoded frame.

use braid_core::{
    decode_frame, decode_header, encode_frame, Direction, ErrorCode, Frame, FrameType,
    RecvWindow, RemoteStreamIds, Settings, Side, StreamId, StreamIdAllocator,
    StreamIdObservation, StreamKind,
};

fn settings() -> Settings {
    Settings {
        initial_stream_window: 256 * 1024,
        max_frame_payload: 16 * 1024,
        max_inbound_bidi_streams: 100,
        max_inbound_uni_streams: 10,
    }
}

/// Splits a buffer of coalesced frames the way a reader would.
fn decode_all(mut buf: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while !buf.is_empty() {
        let (frame, consumed) = decode_frame(buf).expect("decode must succeed");
        frames.push(frame);
        buf = &buf[consumed..];
    }
    frames
}

#[test]
fn test_settings_preface_survives_the_wire() {
    let bytes = encode_frame(&Frame::Settings(settings())).expect("encode must succeed");

    let header = decode_header(&bytes).expect("header must decode");
    let (frame, _) = decode_frame(&bytes).expect("frame must decode");

    assert_eq!(header.frame_type, FrameType::Settings);
    assert_eq!(header.payload_len, 24);
    assert_eq!(frame, Frame::Settings(settings()));
}

#[test]
fn test_connection_close_keeps_code_and_reason() {
    let original = Frame::ConnectionClose {
        code: ErrorCode(0x0B),
        reason: "shutting down".to_string(),
    };

    let bytes = encode_frame(&original).expect("encode must succeed");
    let (decoded, _) = decode_frame(&bytes).expect("decode must succeed");

    assert_eq!(decoded, original);
}

#[test]
fn test_stream_conversation_decodes_in_order() {
    // Arrange – a client opens one bidi stream, sends PING, finishes, and the
    // server answers on the same id.
    let mut client_ids = StreamIdAllocator::new(Side::Client);
    let id = client_ids.next(StreamKind::Bidirectional);
    let frames = vec![
        Frame::Settings(settings()),
        Frame::Stream {
            id,
            fin: false,
            data: b"PING".to_vec(),
        },
        Frame::Stream {
            id,
            fin: true,
            data: Vec::new(),
        },
        Frame::WindowUpdate { id, increment: 4 },
        Frame::ResetStream {
            id,
            code: ErrorCode(7),
        },
    ];
    let mut wire = Vec::new();
    for frame in &frames {
        wire.extend(encode_frame(frame).expect("encode must succeed"));
    }

    // Act
    let decoded = decode_all(&wire);

    // Assert
    assert_eq!(decoded, frames);
}

#[test]
fn test_peer_ids_map_to_local_directions() {
    let mut server_ids = StreamIdAllocator::new(Side::Server);
    let uni = server_ids.next(StreamKind::Unidirectional);
    let bidi = server_ids.next(StreamKind::Bidirectional);

    assert_eq!(Direction::for_stream(uni, Side::Client), Direction::ReceiveOnly);
    assert_eq!(Direction::for_stream(uni, Side::Server), Direction::SendOnly);
    assert_eq!(Direction::for_stream(bidi, Side::Client), Direction::Bidirectional);
}

#[test]
fn test_late_frame_for_finished_stream_is_not_a_new_stream() {
    // Arrange – the server has seen client streams 0 and 4 (indices 0 and 1).
    let mut seen = RemoteStreamIds::new();
    for raw in [0u64, 4] {
        let id = StreamId::from_raw(raw);
        assert_eq!(seen.observe(id.index()), StreamIdObservation::New);
    }

    // Act – a straggling WindowUpdate for stream 0 arrives after it closed.
    let late = StreamId::from_raw(0);

    // Assert
    assert_eq!(seen.observe(late.index()), StreamIdObservation::Seen);
}

#[test]
fn test_reader_enforces_window_across_several_frames() {
    // Arrange
    let mut window = RecvWindow::new(8);
    let chunks: [&[u8]; 3] = [b"abc", b"defgh", b"i"];

    // Act
    let results: Vec<bool> = chunks
        .iter()
        .map(|chunk| window.on_receive(chunk.len()).is_ok())
        .collect();

    // Assert – the third chunk would push the total to 9 bytes
    assert_eq!(results, vec![true, true, false]);
}
