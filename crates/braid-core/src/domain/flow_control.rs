//! Credit-based flow control for one stream direction.
//!
//! # How it works (for beginners)
//!
//! The receiver announces how many bytes it is willing to buffer for a stream
//! (the *window*).  The sender holds that many bytes of *credit* and spends it
//! with every `Stream` frame.  When credit hits zero the writer waits.
//!
//! As the receiving application reads bytes out of its buffer, the receiver
//! hands credit back with a `WindowUpdate` frame.  It batches these: an update
//! is sent only once at least half a window has been consumed, so a reader
//! pulling one byte at a time does not produce one frame per byte.
//!
//! Neither side ever buffers more than one window per stream, which keeps
//! memory bounded no matter how fast the sender is.

use thiserror::Error;

/// The peer sent more bytes than the window it was given.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("flow control violated: {attempted} bytes exceed the limit of {limit}")]
pub struct FlowControlViolation {
    pub limit: u64,
    pub attempted: u64,
}

/// Sender-side credit for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCredit {
    available: u64,
}

impl SendCredit {
    pub fn new(initial: u32) -> Self {
        Self {
            available: u64::from(initial),
        }
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn is_blocked(&self) -> bool {
        self.available == 0
    }

    /// Spends up to `wanted` bytes of credit and returns how many were granted.
    pub fn take(&mut self, wanted: usize) -> usize {
        let granted = (wanted as u64).min(self.available);
        self.available -= granted;
        granted as usize
    }

    /// Adds credit returned by a `WindowUpdate`.
    pub fn grant(&mut self, increment: u32) {
        self.available = self.available.saturating_add(u64::from(increment));
    }
}

/// Receiver-side window for one stream.
///
/// # Examples
///
/// ```rust
/// use braid_core::RecvWindow;
///
/// let mut window = RecvWindow::new(100);
/// window.on_receive(60).unwrap();
/// assert_eq!(window.on_consume(40), None);      // below half a window
/// assert_eq!(window.on_consume(20), Some(60));  // 60 >= 50: hand it back
/// assert!(window.on_receive(100).is_ok());      // limit is now 160
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvWindow {
    window: u32,
    received: u64,
    limit: u64,
    consumed: u64,
    advertised_at: u64,
}

impl RecvWindow {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            received: 0,
            limit: u64::from(window),
            consumed: 0,
            advertised_at: 0,
        }
    }

    /// Accounts for `len` newly arrived bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FlowControlViolation`] if the bytes go past the advertised
    /// limit.  Nothing is recorded in that case.
    pub fn on_receive(&mut self, len: usize) -> Result<(), FlowControlViolation> {
        let attempted = self.received + len as u64;
        if attempted > self.limit {
            return Err(FlowControlViolation {
                limit: self.limit,
                attempted,
            });
        }
        self.received = attempted;
        Ok(())
    }

    /// Accounts for `n` bytes the application took out of the buffer.
    ///
    /// Returns the increment to advertise in a `WindowUpdate` once at least
    /// half a window has been consumed since the previous update.
    pub fn on_consume(&mut self, n: usize) -> Option<u32> {
        self.consumed += n as u64;
        let pending = self.consumed - self.advertised_at;
        let threshold = u64::from((self.window / 2).max(1));
        if pending < threshold {
            return None;
        }
        self.advertised_at = self.consumed;
        self.limit += pending;
        Some(pending.min(u64::from(u32::MAX)) as u32)
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> u64 {
        self.received - self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_capped_by_available_credit() {
        // Arrange
        let mut credit = SendCredit::new(10);

        // Act
        let first = credit.take(7);
        let second = credit.take(7);

        // Assert
        assert_eq!(first, 7);
        assert_eq!(second, 3);
        assert!(credit.is_blocked());
    }

    #[test]
    fn test_grant_unblocks_sender() {
        let mut credit = SendCredit::new(0);
        assert!(credit.is_blocked());

        credit.grant(5);

        assert_eq!(credit.available(), 5);
    }

    #[test]
    fn test_receive_beyond_window_is_a_violation() {
        let mut window = RecvWindow::new(8);
        window.on_receive(8).unwrap();

        let result = window.on_receive(1);

        assert_eq!(
            result,
            Err(FlowControlViolation {
                limit: 8,
                attempted: 9
            })
        );
        assert_eq!(window.buffered(), 8, "a rejected frame must not be counted");
    }

    #[test]
    fn test_update_waits_for_half_a_window() {
        let mut window = RecvWindow::new(10);
        window.on_receive(10).unwrap();

        assert_eq!(window.on_consume(4), None);
        assert_eq!(window.on_consume(1), Some(5));
        assert_eq!(window.on_consume(4), None);
    }

    #[test]
    fn test_update_raises_the_receive_limit() {
        // Arrange
        let mut window = RecvWindow::new(4);
        window.on_receive(4).unwrap();

        // Act
        let inc = window.on_consume(4);

        // Assert
        assert_eq!(inc, Some(4));
        assert!(window.on_receive(4).is_ok());
        assert!(window.on_receive(1).is_err());
    }

    #[test]
    fn test_one_byte_window_still_returns_credit() {
        let mut window = RecvWindow::new(1);
        window.on_receive(1).unwrap();
        assert_eq!(window.on_consume(1), Some(1));
    }
}
