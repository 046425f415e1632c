//! Stream directions and the per-direction state machines.
//!
//! Each direction of a stream moves on its own:
//!
//! ```text
//!   send:  Idle ──first frame──► Open ──finish()──► Finished
//!   recv:  Open ──FIN arrives──► FinReceived ──app reads EndOfStream──► EndDelivered
//! ```
//!
//! The overall [`StreamState`] is *computed* from the two directions (plus the
//! abort flag) instead of being stored, so it can never disagree with them.

use serde::{Deserialize, Serialize};

use crate::protocol::stream_id::{Side, StreamId, StreamKind};

/// Which ways bytes can flow on a stream, seen from the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bidirectional,
    SendOnly,
    ReceiveOnly,
}

impl Direction {
    /// Direction of stream `id` as seen by `local`.
    ///
    /// A unidirectional stream is send-only for its initiator and
    /// receive-only for the other side.
    pub fn for_stream(id: StreamId, local: Side) -> Direction {
        match id.kind() {
            StreamKind::Bidirectional => Direction::Bidirectional,
            StreamKind::Unidirectional if id.initiator() == local => Direction::SendOnly,
            StreamKind::Unidirectional => Direction::ReceiveOnly,
        }
    }

    pub fn can_send(self) -> bool {
        !matches!(self, Direction::ReceiveOnly)
    }

    pub fn can_receive(self) -> bool {
        !matches!(self, Direction::SendOnly)
    }

    /// The id kind used for a stream opened locally with this direction.
    ///
    /// Returns `None` for `ReceiveOnly`, which only the peer can open.
    pub fn local_kind(self) -> Option<StreamKind> {
        match self {
            Direction::Bidirectional => Some(StreamKind::Bidirectional),
            Direction::SendOnly => Some(StreamKind::Unidirectional),
            Direction::ReceiveOnly => None,
        }
    }
}

/// Local sending half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Opened locally; the peer has not seen any frame yet.
    Idle,
    Open,
    /// The FIN frame has been queued.
    Finished,
}

/// Local receiving half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Open,
    /// The peer's FIN arrived but buffered bytes may remain.
    FinReceived,
    /// The application has observed end-of-stream.
    EndDelivered,
}

/// Overall stream state, derived from both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    /// Opened locally, nothing sent yet.
    Idle,
    Open,
    /// One applicable direction has ended.
    HalfClosed,
    /// Every applicable direction has ended, or the stream was aborted.
    Closed,
}

impl StreamState {
    /// Combines the direction halves into one state.
    ///
    /// Halves that do not apply to `direction` count as already ended.
    pub fn compute(direction: Direction, send: SendState, recv: RecvState, aborted: bool) -> Self {
        if aborted {
            return StreamState::Closed;
        }

        let send_finished = direction.can_send() && send == SendState::Finished;
        let recv_finished = direction.can_receive() && recv == RecvState::EndDelivered;
        let send_ended = !direction.can_send() || send_finished;
        let recv_ended = !direction.can_receive() || recv_finished;

        if send_ended && recv_ended {
            StreamState::Closed
        } else if direction.can_send() && send == SendState::Idle {
            StreamState::Idle
        } else if send_finished || recv_finished {
            StreamState::HalfClosed
        } else {
            StreamState::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uni_stream_direction_depends_on_initiator() {
        // Arrange
        let id = StreamId::new(Side::Client, StreamKind::Unidirectional, 0);

        // Act / Assert
        assert_eq!(Direction::for_stream(id, Side::Client), Direction::SendOnly);
        assert_eq!(Direction::for_stream(id, Side::Server), Direction::ReceiveOnly);
    }

    #[test]
    fn test_receive_only_has_no_local_kind() {
        assert_eq!(Direction::ReceiveOnly.local_kind(), None);
        assert_eq!(
            Direction::SendOnly.local_kind(),
            Some(StreamKind::Unidirectional)
        );
    }

    #[test]
    fn test_fresh_local_stream_is_idle() {
        let state = StreamState::compute(
            Direction::Bidirectional,
            SendState::Idle,
            RecvState::Open,
            false,
        );
        assert_eq!(state, StreamState::Idle);
    }

    #[test]
    fn test_finished_send_with_open_recv_is_half_closed() {
        let state = StreamState::compute(
            Direction::Bidirectional,
            SendState::Finished,
            RecvState::FinReceived,
            false,
        );
        assert_eq!(state, StreamState::HalfClosed);
    }

    #[test]
    fn test_both_halves_ended_is_closed() {
        let state = StreamState::compute(
            Direction::Bidirectional,
            SendState::Finished,
            RecvState::EndDelivered,
            false,
        );
        assert_eq!(state, StreamState::Closed);
    }

    #[test]
    fn test_send_only_stream_closes_on_finish() {
        let state = StreamState::compute(
            Direction::SendOnly,
            SendState::Finished,
            RecvState::Open,
            false,
        );
        assert_eq!(state, StreamState::Closed);
    }

    #[test]
    fn test_receive_only_stream_is_open_until_end_delivered() {
        let open = StreamState::compute(
            Direction::ReceiveOnly,
            SendState::Idle,
            RecvState::FinReceived,
            false,
        );
        let closed = StreamState::compute(
            Direction::ReceiveOnly,
            SendState::Idle,
            RecvState::EndDelivered,
            false,
        );
        assert_eq!(open, StreamState::Open);
        assert_eq!(closed, StreamState::Closed);
    }

    #[test]
    fn test_abort_always_closes() {
        let state = StreamState::compute(
            Direction::Bidirectional,
            SendState::Idle,
            RecvState::Open,
            true,
        );
        assert_eq!(state, StreamState::Closed);
    }
}
