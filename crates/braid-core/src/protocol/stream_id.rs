//! Stream identifiers, local id allocation, and tracking of peer-opened ids.
//!
//! # How stream ids are laid out (for beginners)
//!
//! A stream id is a plain `u64`, but its two lowest bits carry meaning:
//!
//! ```text
//!   bit 0   initiator   0 = client opened it, 1 = server opened it
//!   bit 1   kind        0 = bidirectional,    1 = unidirectional
//!   bits 2+ index       0, 1, 2, … counted separately per (initiator, kind)
//! ```
//!
//! Because the initiator is part of the id, the client and the server can both
//! allocate ids at the same time without ever agreeing on anything: the
//! client's first bidirectional stream is `0`, the server's is `1`, and they
//! can never collide.
//!
//! Allocating an id is purely local bookkeeping.  The peer learns about a
//! stream only when the first frame carrying that id arrives.

use std::collections::BTreeSet;
use std::fmt;

/// Upper bound on how many skipped peer indices are remembered at once.
///
/// A peer may legitimately write to its stream 5 before its stream 3, which
/// leaves 3 and 4 as "may still arrive".  Remembering gaps costs memory, so a
/// peer that skips further than this is refused.
pub const MAX_TRACKED_GAPS: usize = 4096;

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// The other end of the connection.
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }

    fn bit(self) -> u64 {
        match self {
            Side::Client => 0,
            Side::Server => 1,
        }
    }
}

/// Whether a stream carries bytes both ways or only from initiator to peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Bidirectional,
    Unidirectional,
}

impl StreamKind {
    fn bit(self) -> u64 {
        match self {
            StreamKind::Bidirectional => 0,
            StreamKind::Unidirectional => 1 << 1,
        }
    }
}

/// A stream identifier, unique within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Wraps a raw wire value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Builds the id for the `index`-th stream of `kind` opened by `initiator`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use braid_core::protocol::{Side, StreamId, StreamKind};
    ///
    /// let id = StreamId::new(Side::Server, StreamKind::Unidirectional, 2);
    /// assert_eq!(id.as_u64(), 0b1011);
    /// assert_eq!(id.initiator(), Side::Server);
    /// assert_eq!(id.index(), 2);
    /// ```
    pub fn new(initiator: Side, kind: StreamKind, index: u64) -> Self {
        Self((index << 2) | kind.bit() | initiator.bit())
    }

    /// The raw wire value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn initiator(self) -> Side {
        if self.0 & 1 == 0 {
            Side::Client
        } else {
            Side::Server
        }
    }

    pub fn kind(self) -> StreamKind {
        if self.0 & 0b10 == 0 {
            StreamKind::Bidirectional
        } else {
            StreamKind::Unidirectional
        }
    }

    /// Position of this stream in its initiator's sequence for its kind.
    pub fn index(self) -> u64 {
        self.0 >> 2
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Local allocation ──────────────────────────────────────────────────────────

/// Hands out ids for streams opened by the local side.
///
/// Each kind has its own counter, so opening a unidirectional stream does not
/// consume a bidirectional index.  The allocator lives inside the
/// connection's lock, so plain integers are enough here.
///
/// # Examples
///
/// ```rust
/// use braid_core::protocol::{Side, StreamIdAllocator, StreamKind};
///
/// let mut ids = StreamIdAllocator::new(Side::Client);
/// assert_eq!(ids.next(StreamKind::Bidirectional).as_u64(), 0);
/// assert_eq!(ids.next(StreamKind::Bidirectional).as_u64(), 4);
/// assert_eq!(ids.next(StreamKind::Unidirectional).as_u64(), 2);
/// ```
#[derive(Debug)]
pub struct StreamIdAllocator {
    side: Side,
    next_bidi: u64,
    next_uni: u64,
}

impl StreamIdAllocator {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            next_bidi: 0,
            next_uni: 0,
        }
    }

    /// Returns a fresh id of `kind` and advances that kind's counter.
    pub fn next(&mut self, kind: StreamKind) -> StreamId {
        let counter = match kind {
            StreamKind::Bidirectional => &mut self.next_bidi,
            StreamKind::Unidirectional => &mut self.next_uni,
        };
        let index = *counter;
        *counter += 1;
        StreamId::new(self.side, kind, index)
    }

    /// How many ids of `kind` have been handed out so far.
    pub fn allocated(&self, kind: StreamKind) -> u64 {
        match kind {
            StreamKind::Bidirectional => self.next_bidi,
            StreamKind::Unidirectional => self.next_uni,
        }
    }
}

// ── Remote tracking ───────────────────────────────────────────────────────────

/// Result of [`RemoteStreamIds::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdObservation {
    /// First frame ever seen for this index: a new peer stream.
    New,
    /// The index was already seen.  Its stream is either live or finished.
    Seen,
    /// The index skips too far ahead of anything seen so far.
    OutOfRange,
}

/// Remembers which peer-initiated indices of one kind have already appeared.
///
/// Without this, a late frame for a stream that was already closed and
/// removed would look like a brand-new stream.  The tracker keeps the next
/// never-seen index plus the set of skipped indices below it.
#[derive(Debug)]
pub struct RemoteStreamIds {
    next_unseen: u64,
    gaps: BTreeSet<u64>,
    max_gaps: usize,
}

impl RemoteStreamIds {
    pub fn new() -> Self {
        Self::with_max_gaps(MAX_TRACKED_GAPS)
    }

    pub fn with_max_gaps(max_gaps: usize) -> Self {
        Self {
            next_unseen: 0,
            gaps: BTreeSet::new(),
            max_gaps,
        }
    }

    /// Records that a frame for `index` arrived and classifies it.
    pub fn observe(&mut self, index: u64) -> StreamIdObservation {
        if index < self.next_unseen {
            return if self.gaps.remove(&index) {
                StreamIdObservation::New
            } else {
                StreamIdObservation::Seen
            };
        }

        let skipped = index - self.next_unseen;
        if skipped > (self.max_gaps - self.gaps.len().min(self.max_gaps)) as u64 {
            return StreamIdObservation::OutOfRange;
        }

        self.gaps.extend(self.next_unseen..index);
        self.next_unseen = index + 1;
        StreamIdObservation::New
    }
}

impl Default for RemoteStreamIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_client_and_server_first_bidi_ids_differ() {
        // Arrange
        let mut client = StreamIdAllocator::new(Side::Client);
        let mut server = StreamIdAllocator::new(Side::Server);

        // Act
        let c = client.next(StreamKind::Bidirectional);
        let s = server.next(StreamKind::Bidirectional);

        // Assert
        assert_eq!(c.as_u64(), 0);
        assert_eq!(s.as_u64(), 1);
    }

    #[test]
    fn test_id_fields_survive_raw_conversion() {
        let id = StreamId::new(Side::Client, StreamKind::Unidirectional, 41);
        let raw = StreamId::from_raw(id.as_u64());

        assert_eq!(raw.initiator(), Side::Client);
        assert_eq!(raw.kind(), StreamKind::Unidirectional);
        assert_eq!(raw.index(), 41);
    }

    #[test]
    fn test_allocator_ids_are_pairwise_distinct_across_kinds() {
        // Arrange
        let mut ids = StreamIdAllocator::new(Side::Server);

        // Act – interleave both kinds
        let all: Vec<StreamId> = (0..200)
            .map(|i| {
                if i % 3 == 0 {
                    ids.next(StreamKind::Unidirectional)
                } else {
                    ids.next(StreamKind::Bidirectional)
                }
            })
            .collect();

        // Assert
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "every allocated id must be unique");
        assert!(all.iter().all(|id| id.initiator() == Side::Server));
    }

    #[test]
    fn test_allocator_counts_each_kind_separately() {
        let mut ids = StreamIdAllocator::new(Side::Client);
        ids.next(StreamKind::Bidirectional);
        ids.next(StreamKind::Bidirectional);
        ids.next(StreamKind::Unidirectional);

        assert_eq!(ids.allocated(StreamKind::Bidirectional), 2);
        assert_eq!(ids.allocated(StreamKind::Unidirectional), 1);
    }

    #[test]
    fn test_side_peer_is_an_involution() {
        assert_eq!(Side::Client.peer(), Side::Server);
        assert_eq!(Side::Server.peer().peer(), Side::Server);
    }

    #[test]
    fn test_remote_in_order_indices_are_new_once() {
        let mut seen = RemoteStreamIds::new();

        assert_eq!(seen.observe(0), StreamIdObservation::New);
        assert_eq!(seen.observe(1), StreamIdObservation::New);
        assert_eq!(seen.observe(0), StreamIdObservation::Seen);
        assert_eq!(seen.observe(1), StreamIdObservation::Seen);
    }

    #[test]
    fn test_remote_skipped_index_is_new_when_it_finally_arrives() {
        // Arrange – the peer writes to its stream 3 before streams 0..3
        let mut seen = RemoteStreamIds::new();
        assert_eq!(seen.observe(3), StreamIdObservation::New);

        // Act / Assert – the gaps arrive later and each counts as new once
        assert_eq!(seen.observe(1), StreamIdObservation::New);
        assert_eq!(seen.observe(1), StreamIdObservation::Seen);
        assert_eq!(seen.observe(0), StreamIdObservation::New);
        assert_eq!(seen.observe(2), StreamIdObservation::New);
        assert_eq!(seen.observe(3), StreamIdObservation::Seen);
    }

    #[test]
    fn test_remote_skip_beyond_gap_budget_is_out_of_range() {
        let mut seen = RemoteStreamIds::with_max_gaps(4);

        assert_eq!(seen.observe(5), StreamIdObservation::OutOfRange);
        assert_eq!(seen.observe(4), StreamIdObservation::New);
        // 4 gaps are now outstanding; no further skipping is allowed.
        assert_eq!(seen.observe(6), StreamIdObservation::OutOfRange);
        assert_eq!(seen.observe(5), StreamIdObservation::New);
    }
}
