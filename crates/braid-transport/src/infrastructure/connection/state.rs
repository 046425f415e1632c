//! State shared between a connection's handles, its streams, and its driver.
//!
//! # Locking rules
//!
//! - `Shared::state` guards the stream map, id allocation, and the accept
//!   queue.  It is one short critical section per operation.
//! - Each `StreamShared::inner` guards one stream's buffers and credit, so
//!   streams never contend with each other.
//! - The connection lock is **never** held while a stream lock is taken.
//!   Code that needs both copies the `Arc<StreamShared>` out first.
//!
//! Neither lock is held across an `.await`.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use braid_core::{
    CloseReason, ConnectionId, ConnectionState, Direction, ErrorCode, Frame, RecvState,
    RecvWindow, RemoteStreamIds, SendCredit, SendState, Settings, Side, StreamId,
    StreamIdAllocator, StreamKind, StreamState,
};
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::config::TransportConfig;
use crate::domain::error::TransportError;

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Streams ───────────────────────────────────────────────────────────────────

/// How a stream ended abruptly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Aborted(ErrorCode),
    Reset,
}

impl Terminal {
    pub(crate) fn to_error(self) -> TransportError {
        match self {
            Terminal::Aborted(code) => TransportError::StreamAborted(code),
            Terminal::Reset => TransportError::ConnectionReset,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StreamInner {
    pub send: SendState,
    pub recv: RecvState,
    pub credit: SendCredit,
    pub window: RecvWindow,
    pub buffer: VecDeque<u8>,
    pub terminal: Option<Terminal>,
}

impl StreamInner {
    pub(crate) fn state(&self, direction: Direction) -> StreamState {
        StreamState::compute(direction, self.send, self.recv, self.terminal.is_some())
    }
}

/// One stream's buffers, credit, and wakeups.
#[derive(Debug)]
pub(crate) struct StreamShared {
    pub id: StreamId,
    pub direction: Direction,
    pub inner: Mutex<StreamInner>,
    /// Woken when data, a FIN, or an abort arrives.
    pub readable: Notify,
    /// Woken when credit returns or the stream is aborted.
    pub writable: Notify,
    /// Serializes writers so concurrent `write` calls cannot interleave chunks.
    pub send_lock: tokio::sync::Mutex<()>,
}

impl StreamShared {
    pub(crate) fn new(
        id: StreamId,
        direction: Direction,
        send: SendState,
        send_credit: u32,
        recv_window: u32,
    ) -> Self {
        Self {
            id,
            direction,
            inner: Mutex::new(StreamInner {
                send,
                recv: RecvState::Open,
                credit: SendCredit::new(send_credit),
                window: RecvWindow::new(recv_window),
                buffer: VecDeque::new(),
                terminal: None,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        lock(&self.inner).state(self.direction)
    }

    /// Ends the stream abruptly unless it already ended.
    ///
    /// Both buffers are discarded under the same lock that records the
    /// terminal state.  Returns `false` if nothing changed.
    pub(crate) fn terminate(&self, terminal: Terminal) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.terminal.is_some() || inner.state(self.direction) == StreamState::Closed {
                return false;
            }
            inner.terminal = Some(terminal);
            inner.buffer.clear();
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        true
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// Everything guarded by the connection lock.
pub(crate) struct ConnState {
    pub phase: ConnectionState,
    pub close_reason: Option<CloseReason>,
    pub streams: HashMap<StreamId, Arc<StreamShared>>,
    pub local_ids: StreamIdAllocator,
    pub remote_bidi: RemoteStreamIds,
    pub remote_uni: RemoteStreamIds,
    pub remote_live_bidi: u64,
    pub remote_live_uni: u64,
    /// Peer streams that arrived but were not yet handed out by `accept_stream`.
    pub pending_accept: VecDeque<Arc<StreamShared>>,
}

impl ConnState {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            phase: ConnectionState::Open,
            close_reason: None,
            streams: HashMap::new(),
            local_ids: StreamIdAllocator::new(side),
            remote_bidi: RemoteStreamIds::new(),
            remote_uni: RemoteStreamIds::new(),
            remote_live_bidi: 0,
            remote_live_uni: 0,
            pending_accept: VecDeque::new(),
        }
    }

    pub(crate) fn remote_ids(&mut self, kind: StreamKind) -> &mut RemoteStreamIds {
        match kind {
            StreamKind::Bidirectional => &mut self.remote_bidi,
            StreamKind::Unidirectional => &mut self.remote_uni,
        }
    }

    pub(crate) fn remote_live(&mut self, kind: StreamKind) -> &mut u64 {
        match kind {
            StreamKind::Bidirectional => &mut self.remote_live_bidi,
            StreamKind::Unidirectional => &mut self.remote_live_uni,
        }
    }

    /// The error an operation gets once the connection is over.
    pub(crate) fn closed_error(&self) -> TransportError {
        match self.close_reason {
            Some(CloseReason::Reset) => TransportError::ConnectionReset,
            _ => TransportError::ConnectionClosed,
        }
    }
}

/// State shared by every handle to one connection.
pub(crate) struct Shared {
    pub id: ConnectionId,
    pub side: Side,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub application_protocol: String,
    pub config: TransportConfig,
    /// What the peer advertised in its preface.
    pub peer: Settings,
    /// Largest `Stream` payload we send: the smaller of both sides' limits.
    pub max_send_payload: usize,
    pub state: Mutex<ConnState>,
    pub state_tx: watch::Sender<ConnectionState>,
    /// Woken when a peer stream is queued or the connection ends.
    pub accept_notify: Notify,
    /// Stream data, FIN frames, and the graceful `ConnectionClose`, in order.
    pub data_tx: mpsc::Sender<Frame>,
    /// Window updates, resets, and abortive closes; written ahead of data.
    pub control_tx: mpsc::UnboundedSender<Frame>,
    /// Cancelled once the connection is `Closed`; stops both driver tasks.
    pub cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn phase(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn closed_error(&self) -> TransportError {
        lock(&self.state).closed_error()
    }

    /// Sends a control frame.  Fails only once the writer has exited, which
    /// means the connection is already over and the frame is moot.
    pub(crate) fn send_control(&self, frame: Frame) {
        let _ = self.control_tx.send(frame);
    }

    /// Forgets a stream that reached a terminal state.
    pub(crate) fn remove_stream(&self, id: StreamId) {
        let mut st = lock(&self.state);
        if st.streams.remove(&id).is_some() && id.initiator() == self.side.peer() {
            let live = st.remote_live(id.kind());
            *live = live.saturating_sub(1);
        }
    }

    /// Removes `stream` from the map if it has fully closed.
    pub(crate) fn release_if_closed(&self, stream: &StreamShared) {
        if stream.state() == StreamState::Closed {
            self.remove_stream(stream.id);
        }
    }

    /// Aborts one stream locally and tells the peer.
    pub(crate) fn abort_stream(&self, stream: &StreamShared, code: ErrorCode) {
        let peer_knows = {
            let inner = lock(&stream.inner);
            stream.id.initiator() == self.side.peer() || inner.send != SendState::Idle
        };
        if !stream.terminate(Terminal::Aborted(code)) {
            return;
        }
        debug!(connection_id = %self.id, stream_id = %stream.id, %code, "stream aborted locally");
        if peer_knows {
            self.send_control(Frame::ResetStream {
                id: stream.id,
                code,
            });
        }
        self.remove_stream(stream.id);
    }

    /// Moves the connection to `Closed` and ends every live stream.
    ///
    /// `farewell`, if any, is queued on the control channel before the
    /// driver tasks are cancelled, so the writer still gets to send it.
    /// Returns `false` if the connection was already closed.
    pub(crate) fn terminate(
        &self,
        reason: CloseReason,
        stream_terminal: Terminal,
        farewell: Option<Frame>,
    ) -> bool {
        let streams: Vec<Arc<StreamShared>> = {
            let mut st = lock(&self.state);
            if st.phase == ConnectionState::Closed {
                return false;
            }
            st.phase = ConnectionState::Closed;
            st.close_reason.get_or_insert(reason);
            st.pending_accept.clear();
            st.streams.drain().map(|(_, s)| s).collect()
        };

        for stream in &streams {
            stream.terminate(stream_terminal);
        }
        if let Some(frame) = farewell {
            self.send_control(frame);
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        self.accept_notify.notify_waiters();
        self.cancel.cancel();

        debug!(
            connection_id = %self.id,
            ?reason,
            aborted_streams = streams.len(),
            "connection closed"
        );
        true
    }

    /// Immediate teardown: streams aborted with `code`, unsent data dropped,
    /// `ConnectionClose` sent best-effort ahead of anything still queued.
    pub(crate) fn abort(&self, code: ErrorCode, reason: &str) {
        self.terminate(
            CloseReason::Local(code),
            Terminal::Aborted(code),
            Some(Frame::ConnectionClose {
                code,
                reason: reason.to_string(),
            }),
        );
    }
}
