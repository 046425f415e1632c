//! `Connection`: one multiplexed session over a secure channel.
//!
//! # Lifecycle (for beginners)
//!
//! A connection starts `Open`.  From there:
//!
//! - [`Connection::close`] moves it to `Closing`, aborts every stream that is
//!   still open, queues a `ConnectionClose` frame *behind* all data already
//!   written, and reaches `Closed` once that frame is on the wire.
//! - [`Connection::abort`] goes straight to `Closed`.  Queued data is
//!   discarded and the close frame is sent best-effort, ahead of it.
//! - The peer's `ConnectionClose` aborts every local stream with the peer's
//!   code.  A channel that simply breaks resets every stream instead.
//!
//! A `Connection` is a cheap handle: clone it to share it between tasks.
//! When the last handle is dropped before the connection closed, it is
//! aborted with the configured default close code.  A [`WeakConnection`]
//! (what a `ConnectionRegistry` holds) does not count as a handle.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use braid_core::{
    CloseReason, ConnectionId, ConnectionState, Direction, ErrorCode, Frame, SendState, Side,
};
use tokio::sync::watch;
use tracing::debug;

use crate::domain::error::TransportError;
use crate::infrastructure::connection::state::{lock, Shared, StreamShared, Terminal};
use crate::infrastructure::stream::Stream;

pub(crate) mod driver;
pub(crate) mod state;

pub(crate) use driver::establish;

/// Owns the abort-on-drop behaviour shared by all clones of a `Connection`.
struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.shared.phase() != ConnectionState::Closed {
            let code = self.shared.config.default_close_error_code;
            debug!(connection_id = %self.shared.id, %code, "last handle dropped; aborting");
            self.shared.abort(code, "connection dropped");
        }
    }
}

/// A multiplexed session carrying many independent streams.
#[derive(Clone)]
pub struct Connection {
    handle: Arc<ConnectionHandle>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("side", &self.side())
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .finish()
    }
}

/// A non-owning reference to a [`Connection`].
///
/// Does not keep the connection alive: once every `Connection` handle is
/// gone the connection aborts and [`upgrade`](Self::upgrade) returns `None`.
#[derive(Clone)]
pub struct WeakConnection {
    id: ConnectionId,
    handle: Weak<ConnectionHandle>,
}

impl WeakConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Connection> {
        self.handle.upgrade().map(|handle| Connection { handle })
    }
}

impl std::fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakConnection")
            .field("id", &self.id)
            .field("alive", &(self.handle.strong_count() > 0))
            .finish()
    }
}

impl Connection {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self {
            handle: Arc::new(ConnectionHandle { shared }),
        }
    }

    /// A reference that does not count as a handle for abort-on-drop.
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            id: self.id(),
            handle: Arc::downgrade(&self.handle),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.handle.shared
    }

    pub fn id(&self) -> ConnectionId {
        self.shared().id
    }

    /// Whether this end dialed (`Client`) or accepted (`Server`).
    pub fn side(&self) -> Side {
        self.shared().side
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared().local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared().remote_addr
    }

    /// The application protocol negotiated during the handshake.
    pub fn application_protocol(&self) -> &str {
        &self.shared().application_protocol
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().phase()
    }

    /// Why the connection ended, or `None` while it is still open.
    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.shared().state).close_reason
    }

    pub fn default_stream_error_code(&self) -> ErrorCode {
        self.shared().config.default_stream_error_code
    }

    pub fn default_close_error_code(&self) -> ErrorCode {
        self.shared().config.default_close_error_code
    }

    /// Opens a new local stream.
    ///
    /// Only allocates an id: the peer learns about the stream when the first
    /// byte (or a `finish()`) is written.  Never blocks.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidDirection`] for `ReceiveOnly`, which only
    ///   the peer can open.
    /// - [`TransportError::ConnectionClosed`] unless the connection is `Open`.
    pub fn open_stream(&self, direction: Direction) -> Result<Stream, TransportError> {
        let kind = direction.local_kind().ok_or(TransportError::InvalidDirection(
            "receive-only streams can only be opened by the peer",
        ))?;
        let shared = self.shared();

        let stream = {
            let mut st = lock(&shared.state);
            if st.phase.is_terminating() {
                return Err(TransportError::ConnectionClosed);
            }
            let id = st.local_ids.next(kind);
            let stream = Arc::new(StreamShared::new(
                id,
                direction,
                SendState::Idle,
                shared.peer.initial_stream_window,
                shared.config.stream_window,
            ));
            st.streams.insert(id, Arc::clone(&stream));
            stream
        };

        debug!(connection_id = %shared.id, stream_id = %stream.id, ?direction, "stream opened");
        Ok(Stream::new(Arc::clone(shared), stream))
    }

    /// Waits for the next stream opened by the peer.
    ///
    /// Streams are returned in the order their first frame arrived.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionReset`] if the channel failed, otherwise
    /// [`TransportError::ConnectionClosed`] once the connection is closing.
    pub async fn accept_stream(&self) -> Result<Stream, TransportError> {
        let shared = self.shared();
        loop {
            let notified = shared.accept_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = lock(&shared.state);
                if let Some(stream) = st.pending_accept.pop_front() {
                    return Ok(Stream::new(Arc::clone(shared), stream));
                }
                if st.phase.is_terminating() {
                    return Err(st.closed_error());
                }
            }

            notified.await;
        }
    }

    /// Closes gracefully with `code` and waits until the connection is `Closed`.
    ///
    /// Every stream that is not yet closed is aborted with `code`; streams
    /// that were already aborted keep their own code.  The `ConnectionClose`
    /// frame is queued behind all stream data written before this call.
    /// Calling `close` again just waits for the first close to finish.
    pub async fn close(&self, code: ErrorCode) {
        let shared = self.shared();

        let streams: Option<Vec<Arc<StreamShared>>> = {
            let mut st = lock(&shared.state);
            if st.phase == ConnectionState::Open {
                st.phase = ConnectionState::Closing;
                st.close_reason = Some(CloseReason::Local(code));
                st.pending_accept.clear();
                Some(st.streams.drain().map(|(_, s)| s).collect())
            } else {
                None
            }
        };

        if let Some(streams) = streams {
            shared.state_tx.send_replace(ConnectionState::Closing);
            shared.accept_notify.notify_waiters();
            for stream in &streams {
                stream.terminate(Terminal::Aborted(code));
            }
            debug!(connection_id = %shared.id, %code, aborted_streams = streams.len(), "closing");

            let farewell = Frame::ConnectionClose {
                code,
                reason: String::new(),
            };
            if shared.data_tx.send(farewell).await.is_err() {
                // The writer is gone, so nothing will ever flush the frame.
                shared.terminate(CloseReason::Local(code), Terminal::Aborted(code), None);
            }
        }

        self.closed().await;
    }

    /// Tears the connection down immediately.
    ///
    /// No-op if the connection is already `Closed`.
    pub fn abort(&self, code: ErrorCode) {
        self.shared().abort(code, "");
    }

    /// Waits until the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.shared().state_tx.subscribe();
        // The sender lives in `Shared`, which `self` keeps alive.
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// A receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared().state_tx.subscribe()
    }
}
