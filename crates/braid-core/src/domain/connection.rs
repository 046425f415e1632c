//! Connection identity and lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error_code::ErrorCode;

/// Unique identifier for a connection, derived from UUID v4.
///
/// Used as the registry key and as the `connection_id` field on every
/// tracing event a connection emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a connection.
///
/// ```text
///   Open ──close()──► Closing ──ConnectionClose flushed──► Closed
///     │                                                      ▲
///     └──────────── abort() / peer close / channel failure ──┘
/// ```
///
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Returns `true` once no new streams may be opened or accepted.
    pub fn is_terminating(self) -> bool {
        !matches!(self, ConnectionState::Open)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// This side called `close` or `abort` with the code.
    Local(ErrorCode),
    /// The peer sent `ConnectionClose` with the code.
    Remote(ErrorCode),
    /// The secure channel failed or hit EOF without a close frame.
    Reset,
}

impl CloseReason {
    /// The code carried by the close, if there was one.
    pub fn code(self) -> Option<ErrorCode> {
        match self {
            CloseReason::Local(code) | CloseReason::Remote(code) => Some(code),
            CloseReason::Reset => None,
        }
    }
}
