//! Per-connection driver: the preface exchange plus the reader and writer tasks.
//!
//! ```text
//!                 ┌──────────── control_rx (unbounded) ─┐
//!  streams ──────►│                                     ▼
//!                 └──────────── data_rx (bounded) ──► writer ──► channel
//!
//!  channel ──► reader ──► dispatch ──► stream buffers / accept queue
//! ```
//!
//! The writer always drains control frames first, so a window update or an
//! abortive close never waits behind a queue full of stream data.
//!
//! Once the connection is cancelled no write may block forever: a frame in
//! flight is abandoned with the socket, and the farewell `ConnectionClose`
//! gets `FAREWELL_GRACE` to go out.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use braid_core::protocol::frame::{HEADER_SIZE, SETTINGS_PAYLOAD_SIZE};
use braid_core::{
    decode_frame, decode_header, encode_frame, CloseReason, ConnectionId, ConnectionState,
    Direction, ErrorCode, Frame, FrameType, ProtocolError, RecvState, SendState, Settings, Side,
    StreamId, StreamIdObservation, StreamKind,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::domain::config::TransportConfig;
use crate::domain::error::HandshakeError;
use crate::infrastructure::channel::{ChannelIo, SecureChannel};
use crate::infrastructure::connection::state::{
    lock, ConnState, Shared, StreamShared, Terminal,
};
use crate::infrastructure::connection::Connection;

type Io = Box<dyn ChannelIo>;

/// How long a cancelled writer keeps trying to deliver `ConnectionClose`.
pub(crate) const FAREWELL_GRACE: Duration = Duration::from_millis(250);

// ── Establishment ─────────────────────────────────────────────────────────────

/// Exchanges `Settings` prefaces over a fresh channel and starts the driver.
///
/// Both sides write first and read second.  The preface is a few dozen
/// bytes, so the writes never block on each other.
pub(crate) async fn establish(
    channel: SecureChannel,
    side: Side,
    config: TransportConfig,
) -> Result<Connection, HandshakeError> {
    let SecureChannel {
        mut io,
        local_addr,
        remote_addr,
        application_protocol,
    } = channel;

    let preface = encode_frame(&Frame::Settings(config.local_settings()))
        .map_err(|e| HandshakeError::Preface(e.to_string()))?;
    io.write_all(&preface).await?;
    io.flush().await?;

    let peer = read_preface(&mut io).await?;

    let (data_tx, data_rx) = mpsc::channel(config.outbound_queue_frames.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, _) = watch::channel(ConnectionState::Open);
    let max_send_payload = config.max_frame_payload.min(peer.max_frame_payload) as usize;

    let shared = Arc::new(Shared {
        id: ConnectionId::new(),
        side,
        local_addr,
        remote_addr,
        application_protocol,
        config,
        peer,
        max_send_payload,
        state: Mutex::new(ConnState::new(side)),
        state_tx,
        accept_notify: Notify::new(),
        data_tx,
        control_tx,
        cancel: CancellationToken::new(),
    });

    debug!(
        connection_id = %shared.id,
        ?side,
        %remote_addr,
        protocol = %shared.application_protocol,
        "connection established"
    );

    let (rd, wr) = tokio::io::split(io);
    tokio::spawn(run_reader(Arc::clone(&shared), rd));
    tokio::spawn(run_writer(Arc::clone(&shared), wr, data_rx, control_rx));

    Ok(Connection::from_shared(shared))
}

async fn read_preface(io: &mut Io) -> Result<Settings, HandshakeError> {
    let mut buf = vec![0u8; HEADER_SIZE];
    io.read_exact(&mut buf).await?;

    let header = decode_header(&buf).map_err(|e| HandshakeError::Preface(e.to_string()))?;
    if header.frame_type != FrameType::Settings || header.payload_len != SETTINGS_PAYLOAD_SIZE {
        return Err(HandshakeError::Preface(format!(
            "expected SETTINGS, got {:?} with {} payload bytes",
            header.frame_type, header.payload_len
        )));
    }

    buf.resize(HEADER_SIZE + SETTINGS_PAYLOAD_SIZE, 0);
    io.read_exact(&mut buf[HEADER_SIZE..]).await?;

    let settings = match decode_frame(&buf) {
        Ok((Frame::Settings(settings), _)) => settings,
        Ok((other, _)) => {
            return Err(HandshakeError::Preface(format!(
                "unexpected {:?} frame",
                other.frame_type()
            )))
        }
        Err(e) => return Err(HandshakeError::Preface(e.to_string())),
    };

    if settings.initial_stream_window == 0 || settings.max_frame_payload == 0 {
        return Err(HandshakeError::Preface(
            "peer advertised a zero window or frame size".to_string(),
        ));
    }
    Ok(settings)
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Resolves when a write that is still pending must be given up.
async fn write_deadline(shared: &Shared, farewell: bool) {
    shared.cancel.cancelled().await;
    if farewell {
        tokio::time::sleep(FAREWELL_GRACE).await;
    }
}

async fn run_writer<W>(
    shared: Arc<Shared>,
    mut wr: W,
    mut data_rx: mpsc::Receiver<Frame>,
    mut control_rx: mpsc::UnboundedReceiver<Frame>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = control_rx.recv() => frame,
            _ = shared.cancel.cancelled() => break,
            Some(frame) = data_rx.recv() => frame,
        };

        let close_code = match &frame {
            Frame::ConnectionClose { code, .. } => Some(*code),
            _ => None,
        };

        let bytes = match encode_frame(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(connection_id = %shared.id, error = %e, "dropping unencodable frame");
                continue;
            }
        };
        trace!(connection_id = %shared.id, frame_type = ?frame.frame_type(), len = bytes.len(), "send");

        let written = tokio::select! {
            biased;
            result = wr.write_all(&bytes) => result,
            _ = write_deadline(&shared, close_code.is_some()) => {
                debug!(connection_id = %shared.id, "abandoning a blocked write");
                break;
            }
        };
        if let Err(e) = written {
            debug!(connection_id = %shared.id, error = %e, "channel write failed");
            shared.terminate(CloseReason::Reset, Terminal::Reset, None);
            break;
        }

        if let Some(code) = close_code {
            let _ = tokio::time::timeout(FAREWELL_GRACE, async {
                let _ = wr.flush().await;
                let _ = wr.shutdown().await;
            })
            .await;
            shared.terminate(CloseReason::Local(code), Terminal::Aborted(code), None);
            break;
        }
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

enum ReadFailure {
    /// EOF or an I/O error.
    Channel(std::io::Error),
    Protocol(ProtocolError),
}

async fn read_frame<R>(rd: &mut R) -> Result<Frame, ReadFailure>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; HEADER_SIZE];
    rd.read_exact(&mut buf).await.map_err(ReadFailure::Channel)?;
    let header = decode_header(&buf).map_err(ReadFailure::Protocol)?;

    buf.resize(HEADER_SIZE + header.payload_len, 0);
    rd.read_exact(&mut buf[HEADER_SIZE..])
        .await
        .map_err(ReadFailure::Channel)?;

    decode_frame(&buf)
        .map(|(frame, _)| frame)
        .map_err(ReadFailure::Protocol)
}

async fn run_reader(shared: Arc<Shared>, mut rd: ReadHalf<Io>) {
    loop {
        let result = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            result = read_frame(&mut rd) => result,
        };

        match result {
            Ok(frame) => {
                trace!(connection_id = %shared.id, frame_type = ?frame.frame_type(), "recv");
                match dispatch(&shared, frame) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => return,
                    Err(violation) => {
                        warn!(
                            connection_id = %shared.id,
                            code = %violation.code,
                            reason = violation.reason,
                            "peer violated the protocol"
                        );
                        shared.abort(violation.code, violation.reason);
                        return;
                    }
                }
            }
            Err(ReadFailure::Channel(e)) => {
                debug!(connection_id = %shared.id, error = %e, "channel closed without a close frame");
                shared.terminate(CloseReason::Reset, Terminal::Reset, None);
                return;
            }
            Err(ReadFailure::Protocol(e)) => {
                warn!(connection_id = %shared.id, error = %e, "undecodable frame");
                shared.abort(ErrorCode::PROTOCOL_VIOLATION, "undecodable frame");
                return;
            }
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

enum Flow {
    Continue,
    Stop,
}

struct Violation {
    code: ErrorCode,
    reason: &'static str,
}

fn violation(reason: &'static str) -> Violation {
    Violation {
        code: ErrorCode::PROTOCOL_VIOLATION,
        reason,
    }
}

fn dispatch(shared: &Shared, frame: Frame) -> Result<Flow, Violation> {
    match frame {
        Frame::Settings(_) => Err(violation("repeated SETTINGS")),
        Frame::Stream { id, fin, data } => {
            on_stream_data(shared, id, fin, data)?;
            Ok(Flow::Continue)
        }
        Frame::WindowUpdate { id, increment } => {
            on_window_update(shared, id, increment);
            Ok(Flow::Continue)
        }
        Frame::ResetStream { id, code } => {
            on_reset(shared, id, code)?;
            Ok(Flow::Continue)
        }
        Frame::ConnectionClose { code, reason } => {
            if code.is_transport_reserved() {
                warn!(connection_id = %shared.id, %code, %reason, "peer closed the connection with a transport error");
            } else {
                debug!(connection_id = %shared.id, %code, %reason, "peer closed the connection");
            }
            shared.terminate(CloseReason::Remote(code), Terminal::Aborted(code), None);
            Ok(Flow::Stop)
        }
    }
}

/// Finds the stream an incoming frame belongs to, creating it if this is the
/// first frame of a new peer stream.
///
/// `Ok(None)` means the frame should be ignored: the stream already ended,
/// the connection is closing, or the stream was refused.
fn incoming_stream(
    shared: &Shared,
    id: StreamId,
    creates: bool,
) -> Result<Option<Arc<StreamShared>>, Violation> {
    let mut st = lock(&shared.state);

    if id.initiator() == shared.side {
        if id.index() >= st.local_ids.allocated(id.kind()) {
            return Err(violation("frame for a stream this side never opened"));
        }
        return Ok(st.streams.get(&id).cloned());
    }

    match st.remote_ids(id.kind()).observe(id.index()) {
        StreamIdObservation::Seen => return Ok(st.streams.get(&id).cloned()),
        StreamIdObservation::OutOfRange => {
            drop(st);
            refuse(shared, id);
            return Ok(None);
        }
        StreamIdObservation::New => {}
    }

    if !creates || st.phase != ConnectionState::Open {
        return Ok(None);
    }

    let limit = match id.kind() {
        StreamKind::Bidirectional => shared.config.max_inbound_bidi_streams,
        StreamKind::Unidirectional => shared.config.max_inbound_uni_streams,
    };
    if *st.remote_live(id.kind()) >= limit {
        drop(st);
        refuse(shared, id);
        return Ok(None);
    }

    let direction = Direction::for_stream(id, shared.side);
    let stream = Arc::new(StreamShared::new(
        id,
        direction,
        SendState::Open,
        shared.peer.initial_stream_window,
        shared.config.stream_window,
    ));
    *st.remote_live(id.kind()) += 1;
    st.streams.insert(id, Arc::clone(&stream));
    st.pending_accept.push_back(Arc::clone(&stream));
    drop(st);

    trace!(connection_id = %shared.id, stream_id = %id, "peer opened stream");
    shared.accept_notify.notify_waiters();
    Ok(Some(stream))
}

fn refuse(shared: &Shared, id: StreamId) {
    debug!(connection_id = %shared.id, stream_id = %id, "refusing peer stream over the limit");
    shared.send_control(Frame::ResetStream {
        id,
        code: ErrorCode::STREAM_LIMIT,
    });
}

fn on_stream_data(
    shared: &Shared,
    id: StreamId,
    fin: bool,
    data: Vec<u8>,
) -> Result<(), Violation> {
    if !Direction::for_stream(id, shared.side).can_receive() {
        return Err(violation("data on a send-only stream"));
    }
    if data.len() > shared.config.max_frame_payload as usize {
        return Err(violation("stream frame larger than advertised"));
    }

    let Some(stream) = incoming_stream(shared, id, true)? else {
        return Ok(());
    };

    {
        let mut inner = lock(&stream.inner);
        if inner.terminal.is_some() {
            return Ok(());
        }
        if inner.recv != RecvState::Open {
            return if data.is_empty() {
                Ok(())
            } else {
                Err(violation("data after FIN"))
            };
        }
        inner.window.on_receive(data.len()).map_err(|_| Violation {
            code: ErrorCode::FLOW_CONTROL,
            reason: "stream window exceeded",
        })?;
        inner.buffer.extend(data);
        if fin {
            inner.recv = RecvState::FinReceived;
        }
        trace!(
            connection_id = %shared.id,
            stream_id = %id,
            buffered = inner.window.buffered(),
            fin,
            "stream data buffered"
        );
    }
    stream.readable.notify_waiters();
    Ok(())
}

fn on_window_update(shared: &Shared, id: StreamId, increment: u32) {
    let stream = lock(&shared.state).streams.get(&id).cloned();
    if let Some(stream) = stream {
        lock(&stream.inner).credit.grant(increment);
        stream.writable.notify_waiters();
    }
}

fn on_reset(shared: &Shared, id: StreamId, code: ErrorCode) -> Result<(), Violation> {
    let Some(stream) = incoming_stream(shared, id, false)? else {
        return Ok(());
    };
    if stream.terminate(Terminal::Aborted(code)) {
        debug!(connection_id = %shared.id, stream_id = %id, %code, "peer aborted stream");
    }
    shared.remove_stream(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Room for the preface and a little more, so a data frame backs up.
    const PIPE_CAPACITY: usize = 64;

    /// Establishes a client connection whose peer is the returned raw pipe.
    ///
    /// The peer preface is already consumed and the client preface already
    /// read back, so the pipe carries nothing but what the driver writes next.
    async fn raw_peer_connection() -> (Connection, DuplexStream) {
        let (local, mut raw) = tokio::io::duplex(PIPE_CAPACITY);
        let config = TransportConfig::default();

        let preface = encode_frame(&Frame::Settings(config.local_settings())).unwrap();
        raw.write_all(&preface).await.unwrap();

        let channel = SecureChannel {
            io: Box::new(local),
            local_addr: "127.0.0.1:1".parse().unwrap(),
            remote_addr: "127.0.0.1:2".parse().unwrap(),
            application_protocol: "test".to_string(),
        };
        let conn = establish(channel, Side::Client, config).await.unwrap();

        let mut client_preface = vec![0u8; HEADER_SIZE + SETTINGS_PAYLOAD_SIZE];
        raw.read_exact(&mut client_preface).await.unwrap();
        (conn, raw)
    }

    // ── Writer cancellation ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_abort_releases_the_channel_while_a_write_is_blocked() {
        // Arrange – the peer never reads, so a 4 KiB frame stalls the writer
        let (conn, mut raw) = raw_peer_connection().await;
        let stream = conn.open_stream(Direction::Bidirectional).unwrap();
        tokio::spawn(async move {
            let _ = stream.write_all(&[7u8; 4096]).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        conn.abort(ErrorCode(1));

        // Assert – the driver dropped its end, so the peer's writes now fail
        let outcome = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Err(e) = raw.write_all(&[0]).await {
                    return e.kind();
                }
            }
        })
        .await
        .expect("driver kept the channel open after abort");
        assert_eq!(outcome, std::io::ErrorKind::BrokenPipe);
        assert_eq!(conn.close_reason(), Some(CloseReason::Local(ErrorCode(1))));
    }

    #[tokio::test]
    async fn test_abort_on_an_idle_writer_still_sends_the_farewell() {
        // Arrange
        let (conn, mut raw) = raw_peer_connection().await;

        // Act
        conn.abort(ErrorCode(5));

        // Assert – exactly one ConnectionClose, then end of stream
        let mut bytes = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), raw.read_to_end(&mut bytes))
            .await
            .expect("writer never finished")
            .unwrap();
        let (frame, used) = decode_frame(&bytes).unwrap();
        assert!(matches!(
            frame,
            Frame::ConnectionClose { code: ErrorCode(5), .. }
        ));
        assert_eq!(used, bytes.len());
    }

    // ── Preface ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_preface_rejects_a_zero_stream_window() {
        // Arrange
        let (local, mut raw) = tokio::io::duplex(PIPE_CAPACITY);
        let settings = Settings {
            initial_stream_window: 0,
            ..TransportConfig::default().local_settings()
        };
        raw.write_all(&encode_frame(&Frame::Settings(settings)).unwrap())
            .await
            .unwrap();
        let channel = SecureChannel {
            io: Box::new(local),
            local_addr: "127.0.0.1:1".parse().unwrap(),
            remote_addr: "127.0.0.1:2".parse().unwrap(),
            application_protocol: "test".to_string(),
        };

        // Act
        let result = establish(channel, Side::Server, TransportConfig::default()).await;

        // Assert
        assert!(matches!(result, Err(HandshakeError::Preface(_))));
    }
}
