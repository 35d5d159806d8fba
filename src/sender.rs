//! Outbound sequence state for stop-and-wait reliability.
//!
//! [`SendState`] tracks the sequence number of the single in-flight message
//! and how many times it has been transmitted.  It does **not** touch the
//! socket; [`crate::connection::Connection`] calls these methods and owns the
//! actual transmit / ACK-wait loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** message is in flight at any moment.
//! - Every transmission of that message counts as one attempt.
//! - Only an ACK echoing `next_seq` completes it; `next_seq` then advances by
//!   one, wrapping modulo 65536.
//! - An exhausted retry budget leaves `next_seq` untouched, so the next send
//!   reuses the same sequence number.

use std::num::NonZeroU32;

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendState {
    /// Sequence number carried by the current (or next) outgoing message.
    pub next_seq: u16,
    /// Transmissions of the current message so far.
    pub attempts: u32,
}

impl SendState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new message: clear the attempt counter.
    pub fn begin(&mut self) {
        self.attempts = 0;
    }

    /// `true` if another transmission is allowed under `limit`.
    pub fn may_attempt(&self, limit: Option<NonZeroU32>) -> bool {
        limit.map_or(true, |limit| self.attempts < limit.get())
    }

    /// Record one transmission of the current message.
    pub fn on_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// `true` if `ack` acknowledges the in-flight message.
    ///
    /// ACKs for any other sequence number (typically a stale ACK for the
    /// previous message) are not accepted.
    pub fn accepts(&self, ack: u16) -> bool {
        ack == self.next_seq
    }

    /// The in-flight message was acknowledged.
    pub fn on_acked(&mut self) {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.attempts = 0;
    }

    /// The retry budget ran out.  Returns the number of attempts made.
    pub fn on_exhausted(&mut self) -> u32 {
        std::mem::take(&mut self.attempts)
    }

    /// Return to sequence 0, as for a brand new peer.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
