//! `Stream`: one flow-controlled byte channel inside a connection.
//!
//! # Reading and writing (for beginners)
//!
//! - [`Stream::write`] hands bytes to the connection.  It waits while the
//!   peer has not granted enough credit, so a fast writer cannot bury a slow
//!   reader.  It may accept fewer bytes than offered; [`Stream::write_all`]
//!   loops until everything is accepted.
//! - [`Stream::finish`] ends the local direction.  The peer's reads return
//!   `None` (end of stream) once it has consumed everything before it.
//! - [`Stream::read`] returns the next chunk, `None` at end of stream, or an
//!   error if the stream was aborted.
//! - [`Stream::abort`] ends both directions at once and throws away anything
//!   still buffered.
//!
//! A `Stream` is a cheap handle.  Dropping the last clone of a stream that
//! has not closed aborts it with the connection's default stream error code.

use std::sync::Arc;

use braid_core::{
    ConnectionId, Direction, ErrorCode, Frame, RecvState, SendState, StreamId, StreamState,
};
use tracing::trace;

use crate::domain::error::TransportError;
use crate::infrastructure::connection::state::{lock, Shared, StreamInner, StreamShared};

struct StreamHandle {
    conn: Arc<Shared>,
    stream: Arc<StreamShared>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.stream.state() != StreamState::Closed {
            let code = self.conn.config.default_stream_error_code;
            self.conn.abort_stream(&self.stream, code);
        }
    }
}

/// A handle to one stream of a [`Connection`](crate::Connection).
#[derive(Clone)]
pub struct Stream {
    handle: Arc<StreamHandle>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("direction", &self.direction())
            .field("state", &self.state())
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(conn: Arc<Shared>, stream: Arc<StreamShared>) -> Self {
        Self {
            handle: Arc::new(StreamHandle { conn, stream }),
        }
    }

    fn conn(&self) -> &Shared {
        &self.handle.conn
    }

    fn stream(&self) -> &StreamShared {
        &self.handle.stream
    }

    pub fn id(&self) -> StreamId {
        self.stream().id
    }

    /// Direction as seen from this side of the connection.
    pub fn direction(&self) -> Direction {
        self.stream().direction
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn().id
    }

    pub fn state(&self) -> StreamState {
        self.stream().state()
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Writes up to `buf.len()` bytes and returns how many were accepted.
    ///
    /// Waits while the stream has no send credit.  Accepts at most the
    /// available credit and one frame's worth of payload per call.
    ///
    /// # Errors
    ///
    /// - [`TransportError::StreamAborted`] if either side aborted the stream.
    /// - [`TransportError::ConnectionReset`] if the channel failed.
    /// - [`TransportError::StreamFinished`] after [`finish`](Self::finish).
    /// - [`TransportError::InvalidDirection`] on a receive-only stream.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.ensure_can_send()?;
        let stream = self.stream();
        let conn = self.conn();
        let _writer = stream.send_lock.lock().await;

        // Wait for credit without holding any of it: if this future is
        // dropped while waiting, nothing has been spent.
        loop {
            let notified = stream.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = lock(&stream.inner);
                Self::check_writable(&inner)?;
                if buf.is_empty() {
                    return Ok(0);
                }
                if !inner.credit.is_blocked() {
                    break;
                }
            }

            notified.await;
        }

        let permit = match conn.data_tx.reserve().await {
            Ok(permit) => permit,
            Err(_) => return Err(self.terminal_error()),
        };

        let len = {
            let mut inner = lock(&stream.inner);
            Self::check_writable(&inner)?;
            let len = inner.credit.take(buf.len().min(conn.max_send_payload));
            if inner.send == SendState::Idle {
                inner.send = SendState::Open;
            }
            len
        };

        trace!(connection_id = %conn.id, stream_id = %stream.id, len, "write");
        permit.send(Frame::Stream {
            id: stream.id,
            fin: false,
            data: buf[..len].to_vec(),
        });
        Ok(len)
    }

    /// Writes every byte of `buf`, waiting for credit as needed.
    pub async fn write_all(&self, mut buf: &[u8]) -> Result<(), TransportError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Ends the local sending direction.
    ///
    /// Sends a zero-byte frame carrying the finish flag, so it also makes a
    /// never-written stream visible to the peer.  Calling it again is a
    /// no-op.
    pub async fn finish(&self) -> Result<(), TransportError> {
        self.ensure_can_send()?;
        let stream = self.stream();
        let conn = self.conn();
        let _writer = stream.send_lock.lock().await;

        {
            let inner = lock(&stream.inner);
            if let Some(terminal) = inner.terminal {
                return Err(terminal.to_error());
            }
            if inner.send == SendState::Finished {
                return Ok(());
            }
        }

        let permit = match conn.data_tx.reserve().await {
            Ok(permit) => permit,
            Err(_) => return Err(self.terminal_error()),
        };

        {
            let mut inner = lock(&stream.inner);
            if let Some(terminal) = inner.terminal {
                return Err(terminal.to_error());
            }
            inner.send = SendState::Finished;
        }

        trace!(connection_id = %conn.id, stream_id = %stream.id, "finish");
        permit.send(Frame::Stream {
            id: stream.id,
            fin: true,
            data: Vec::new(),
        });
        conn.release_if_closed(stream);
        Ok(())
    }

    // ── Receiving ─────────────────────────────────────────────────────────────

    /// Reads up to `max` bytes.
    ///
    /// Returns `Ok(None)` once the peer finished and everything before the
    /// finish has been read.
    ///
    /// # Errors
    ///
    /// - [`TransportError::StreamAborted`] if either side aborted the stream;
    ///   any unread bytes are discarded.
    /// - [`TransportError::ConnectionReset`] if the channel failed.
    /// - [`TransportError::InvalidDirection`] on a send-only stream.
    pub async fn read(&self, max: usize) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.direction().can_receive() {
            return Err(TransportError::InvalidDirection("stream is send-only"));
        }
        let stream = self.stream();
        let conn = self.conn();
        let max = max.max(1);

        loop {
            let notified = stream.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = lock(&stream.inner);
                if let Some(terminal) = inner.terminal {
                    return Err(terminal.to_error());
                }

                if !inner.buffer.is_empty() {
                    let n = max.min(inner.buffer.len());
                    let chunk: Vec<u8> = inner.buffer.drain(..n).collect();
                    let update = if inner.recv == RecvState::Open {
                        inner.window.on_consume(n)
                    } else {
                        None
                    };
                    drop(inner);

                    if let Some(increment) = update {
                        conn.send_control(Frame::WindowUpdate {
                            id: stream.id,
                            increment,
                        });
                    }
                    return Ok(Some(chunk));
                }

                match inner.recv {
                    RecvState::Open => {}
                    RecvState::FinReceived => {
                        inner.recv = RecvState::EndDelivered;
                        drop(inner);
                        conn.release_if_closed(stream);
                        return Ok(None);
                    }
                    RecvState::EndDelivered => return Ok(None),
                }
            }

            notified.await;
        }
    }

    /// Reads until end of stream.
    ///
    /// # Errors
    ///
    /// [`TransportError::ReadLimitExceeded`] if more than `limit` bytes
    /// arrive, plus the errors of [`read`](Self::read).
    pub async fn read_to_end(&self, limit: usize) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read(limit.saturating_sub(out.len()).saturating_add(1)).await? {
            out.extend_from_slice(&chunk);
            if out.len() > limit {
                return Err(TransportError::ReadLimitExceeded { limit });
            }
        }
        Ok(out)
    }

    // ── Termination ───────────────────────────────────────────────────────────

    /// Ends both directions immediately and discards buffered data.
    ///
    /// The peer's pending and future operations on this stream fail with
    /// [`TransportError::StreamAborted`] carrying `code`.  No-op on a stream
    /// that already closed or was aborted.
    pub fn abort(&self, code: ErrorCode) {
        self.conn().abort_stream(self.stream(), code);
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn ensure_can_send(&self) -> Result<(), TransportError> {
        if self.direction().can_send() {
            Ok(())
        } else {
            Err(TransportError::InvalidDirection("stream is receive-only"))
        }
    }

    fn check_writable(inner: &StreamInner) -> Result<(), TransportError> {
        if let Some(terminal) = inner.terminal {
            return Err(terminal.to_error());
        }
        if inner.send == SendState::Finished {
            return Err(TransportError::StreamFinished);
        }
        Ok(())
    }

    /// The error for an operation that found the connection's writer gone.
    fn terminal_error(&self) -> TransportError {
        match lock(&self.stream().inner).terminal {
            Some(terminal) => terminal.to_error(),
            None => self.conn().closed_error(),
        }
    }
}
