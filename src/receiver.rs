//! Per-peer receive sequence bookkeeping.
//!
//! A single connection can be the target of many senders at once.  The
//! [`ReceiveState`] keeps one "next expected sequence" per peer and decides,
//! for every inbound data frame, whether it is a duplicate to be re-ACKed or
//! a message to hand to the application.
//!
//! - A peer is added lazily on its first frame, expecting sequence 0.
//! - `seq < expected` → [`Verdict::Duplicate`]: ACK again, do not deliver.
//! - `seq == expected` → [`Verdict::InOrder`]: deliver.
//! - `seq > expected` → [`Verdict::CatchUp`]: the receiver fell behind (for
//!   example after a reset on this side); deliver and jump forward.
//!
//! Comparison is on plain 16-bit values; wraparound is not special-cased.
//! The [`ReceiveState`] does **not** send ACKs itself; the connection does.

use std::collections::HashMap;
use std::net::SocketAddr;

/// What to do with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Already delivered; ACK but keep waiting.
    Duplicate,
    /// Exactly the expected sequence.
    InOrder,
    /// Ahead of the expected sequence by `skipped` messages.
    CatchUp { skipped: u16 },
}

impl Verdict {
    /// `true` if the frame's payload goes to the application.
    pub fn delivers(self) -> bool {
        !matches!(self, Verdict::Duplicate)
    }
}

/// Receive-side sequence table for one connection.
#[derive(Debug, Default)]
pub struct ReceiveState {
    expected: HashMap<SocketAddr, u16>,
}

impl ReceiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a datagram from `peer` and return the sequence expected from it.
    ///
    /// Registers `peer` with an expected sequence of 0 if it is new.
    pub fn observe(&mut self, peer: SocketAddr) -> u16 {
        *self.expected.entry(peer).or_insert(0)
    }

    /// Classify a frame carrying `seq` from `peer`.
    pub fn classify(&mut self, peer: SocketAddr, seq: u16) -> Verdict {
        let expected = self.observe(peer);
        if seq < expected {
            Verdict::Duplicate
        } else if seq == expected {
            Verdict::InOrder
        } else {
            Verdict::CatchUp {
                skipped: seq - expected,
            }
        }
    }

    /// Record that the frame `seq` from `peer` was delivered.
    ///
    /// The peer's expected sequence becomes `seq + 1`, which is the normal
    /// increment for an in-order frame and the catch-up jump otherwise.
    pub fn on_delivered(&mut self, peer: SocketAddr, seq: u16) {
        self.expected.insert(peer, seq.wrapping_add(1));
    }

    /// Next sequence expected from `peer`, if it has been seen.
    pub fn expected(&self, peer: &SocketAddr) -> Option<u16> {
        self.expected.get(peer).copied()
    }

    /// Number of peers seen since the last reset.
    pub fn peer_count(&self) -> usize {
        self.expected.len()
    }

    /// Forget every peer.
    pub fn reset(&mut self) {
        self.expected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn new_peer_expects_zero() {
        let mut r = ReceiveState::new();
        assert_eq!(r.expected(&peer(1)), None);
        assert_eq!(r.classify(peer(1), 0), Verdict::InOrder);
        assert_eq!(r.expected(&peer(1)), Some(0));
    }

    #[test]
    fn observe_registers_without_advancing() {
        let mut r = ReceiveState::new();
        assert_eq!(r.observe(peer(9)), 0);
        assert_eq!(r.observe(peer(9)), 0);
        assert_eq!(r.peer_count(), 1);
    }

    #[test]
    fn delivered_frame_becomes_duplicate() {
        let mut r = ReceiveState::new();
        assert_eq!(r.classify(peer(1), 0), Verdict::InOrder);
        r.on_delivered(peer(1), 0);
        assert_eq!(r.classify(peer(1), 0), Verdict::Duplicate);
        assert!(!Verdict::Duplicate.delivers());
        assert_eq!(r.expected(&peer(1)), Some(1));
    }

    #[test]
    fn catch_up_jumps_past_the_gap() {
        let mut r = ReceiveState::new();
        let verdict = r.classify(peer(1), 3);
        assert_eq!(verdict, Verdict::CatchUp { skipped: 3 });
        assert!(verdict.delivers());
        r.on_delivered(peer(1), 3);
        assert_eq!(r.expected(&peer(1)), Some(4));
    }

    #[test]
    fn peers_are_tracked_independently() {
        let mut r = ReceiveState::new();
        r.classify(peer(1), 0);
        r.on_delivered(peer(1), 0);
        assert_eq!(r.classify(peer(2), 0), Verdict::InOrder);
        assert_eq!(r.classify(peer(1), 0), Verdict::Duplicate);
        assert_eq!(r.peer_count(), 2);
    }

    #[test]
    fn same_address_different_port_is_a_different_peer() {
        let mut r = ReceiveState::new();
        r.classify(peer(1), 5);
        r.on_delivered(peer(1), 5);
        assert_eq!(r.classify(peer(2), 0), Verdict::InOrder);
    }

    #[test]
    fn reset_forgets_all_peers() {
        let mut r = ReceiveState::new();
        r.classify(peer(1), 0);
        r.on_delivered(peer(1), 0);
        r.reset();
        assert_eq!(r.peer_count(), 0);
        assert_eq!(r.classify(peer(1), 0), Verdict::InOrder);
    }

    #[test]
    fn expected_wraps_after_max_sequence() {
        let mut r = ReceiveState::new();
        r.classify(peer(1), u16::MAX);
        r.on_delivered(peer(1), u16::MAX);
        assert_eq!(r.expected(&peer(1)), Some(0));
    }
}
