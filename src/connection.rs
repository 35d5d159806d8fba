//! Per-connection protocol engine.
//!
//! A [`Connection`] owns one UDP socket, an optional local and remote
//! endpoint, the send sequence counter and the per-peer receive sequence
//! table.  Its responsibilities are:
//! - Endpoint configuration and sequence resets.
//! - [`Connection::send`]: transmit one data frame and retransmit it until an
//!   ACK echoing its sequence number arrives or the retry budget runs out.
//! - [`Connection::receive`]: wait for the next new message from any peer,
//!   ACKing duplicates along the way.
//!
//! Every operation takes the connection-wide lock for its full duration, so
//! a `send` and a `receive` on the same connection never overlap.  The ACK
//! wait in `send` is bounded by the connection's [`DeadlineActor`]; the
//! receive wait is not bounded at all.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::packet::{AckFrame, DataFrame, PacketError, ACK_LEN, MAX_DATAGRAM};
use crate::receiver::{ReceiveState, Verdict};
use crate::registry::Handle;
use crate::sender::SendState;
use crate::socket::Socket;
use crate::timer::DeadlineActor;

/// ACK wait used when no timeout is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Address the socket is opened on before a local endpoint is configured.
const UNBOUND: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised by connection operations.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Socket could not be opened or bound, or an endpoint is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no remote endpoint set")]
    NoRemoteEndpoint,
    #[error("no local endpoint set")]
    NoLocalEndpoint,
    /// Transmitting a frame failed.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    #[error("cannot encode frame: {0}")]
    Encode(PacketError),
    #[error("cannot decode frame: {0}")]
    Decode(PacketError),
    #[error("receive buffer too small: message needs {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("message {sequence} not acknowledged after {attempts} attempts")]
    RetriesExhausted { attempts: u32, sequence: u16 },
    #[error("unknown connection handle {0}")]
    UnknownHandle(Handle),
}

impl ConnError {
    /// Stable non-zero code for reporting across an error-code boundary.
    ///
    /// `0` is never returned; callers reserve it for success.
    pub fn code(&self) -> i32 {
        match self {
            ConnError::Configuration(_) => 1,
            ConnError::InvalidArgument(_) => 2,
            ConnError::NoRemoteEndpoint => 3,
            ConnError::NoLocalEndpoint => 4,
            ConnError::Transport(_) => 5,
            ConnError::Encode(_) => 6,
            ConnError::Decode(_) => 7,
            ConnError::BufferTooSmall { .. } => 8,
            ConnError::RetriesExhausted { .. } => 9,
            ConnError::UnknownHandle(_) => 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time parameters of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// ACK wait per transmission; also the retransmit interval.
    pub timeout: Duration,
    /// Maximum transmissions per `send`; `None` retries forever.
    pub send_retry_limit: Option<NonZeroU32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            send_retry_limit: None,
        }
    }
}

impl ConnectionConfig {
    pub fn from_millis(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            ..Self::default()
        }
    }
}

/// Outcome of one bounded wait for an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    /// A reply carrying this sequence number arrived.
    Reply(u16),
    /// A reply arrived but was too short to hold a sequence number.
    Malformed,
    /// The deadline fired first.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// State guarded by the connection-wide lock.
#[derive(Debug)]
struct Inner {
    socket: Socket,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    sender: SendState,
    receiver: ReceiveState,
    send_retry_limit: Option<NonZeroU32>,
}

/// A reliable, stop-and-wait message channel over one UDP socket.
///
/// Dropping the connection closes the socket and stops its deadline actor.
#[derive(Debug)]
pub struct Connection {
    inner: Mutex<Inner>,
    timeout: Duration,
    deadline: DeadlineActor,
}

impl Connection {
    /// Open the socket and start the deadline actor.
    ///
    /// The socket starts out on an OS-chosen port; no endpoint is configured.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ConnError> {
        let socket = Socket::bind(UNBOUND)
            .await
            .map_err(|e| ConnError::Configuration(format!("cannot open socket: {e}")))?;
        log::debug!("[rudp:init] socket opened on {}", socket.local_addr);

        Ok(Self {
            inner: Mutex::new(Inner {
                socket,
                local: None,
                remote: None,
                sender: SendState::new(),
                receiver: ReceiveState::new(),
                send_retry_limit: config.send_retry_limit,
            }),
            timeout: config.timeout,
            deadline: DeadlineActor::spawn(),
        })
    }

    /// Shorthand for [`Connection::open`] with only a timeout.
    pub async fn with_timeout(timeout: Duration) -> Result<Self, ConnError> {
        Self::open(ConnectionConfig {
            timeout,
            ..ConnectionConfig::default()
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Bind to `port` on all interfaces and forget every known peer.
    ///
    /// Port `0` picks an ephemeral port.  Returns the address actually bound.
    /// On failure the local endpoint is left unchanged.
    pub async fn set_local_endpoint(&self, port: u16) -> Result<SocketAddr, ConnError> {
        let mut inner = self.inner.lock().await;

        let bound = match inner.local {
            // Rebinding the port we already hold would collide with ourselves.
            Some(local) if port != 0 && local.port() == port => local,
            _ => {
                let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
                let socket = Socket::bind(addr).await.map_err(|e| {
                    ConnError::Configuration(format!(
                        "cannot set local endpoint to port {port}: {e}"
                    ))
                })?;
                let bound = socket.local_addr;
                inner.socket = socket;
                inner.local = Some(bound);
                bound
            }
        };

        let forgotten = inner.receiver.peer_count();
        inner.receiver.reset();
        log::info!("[rudp:init] local endpoint set: {bound} ({forgotten} peer(s) forgotten)");
        Ok(bound)
    }

    /// Direct subsequent sends to `address:port` and restart at sequence 0.
    ///
    /// `address` must be a dotted-quad IPv4 address and `port` non-zero.
    pub async fn set_remote_endpoint(
        &self,
        address: &str,
        port: u16,
    ) -> Result<SocketAddr, ConnError> {
        let ip: Ipv4Addr = address.trim().parse().map_err(|e| {
            ConnError::Configuration(format!("invalid remote address {address:?}: {e}"))
        })?;
        if port == 0 {
            return Err(ConnError::Configuration(
                "remote port must be non-zero".into(),
            ));
        }
        let remote = SocketAddr::from((ip, port));

        let mut inner = self.inner.lock().await;
        inner.remote = Some(remote);
        inner.sender.reset();
        log::info!("[rudp:init] remote endpoint set: {remote}");
        Ok(remote)
    }

    /// Bound the number of transmissions per `send` to `limit`.
    ///
    /// `limit` must be positive.
    pub async fn set_send_retry_limit(&self, limit: u32) -> Result<(), ConnError> {
        let limit = NonZeroU32::new(limit).ok_or_else(|| {
            ConnError::InvalidArgument("send retry limit must be a positive number".into())
        })?;
        let mut inner = self.inner.lock().await;
        inner.send_retry_limit = Some(limit);
        log::info!("[rudp:init] send retry limit set: {limit}");
        Ok(())
    }

    /// Restart outgoing messages at sequence 0.
    pub async fn reset_send(&self) {
        self.inner.lock().await.sender.reset();
    }

    /// Forget every peer; the next frame from any peer is expected to be 0.
    pub async fn reset_receive(&self) {
        let mut inner = self.inner.lock().await;
        log::debug!(
            "[rudp:recv] receive state reset; {} peer(s) forgotten",
            inner.receiver.peer_count()
        );
        inner.receiver.reset();
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn local_endpoint(&self) -> Option<SocketAddr> {
        self.inner.lock().await.local
    }

    pub async fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.inner.lock().await.remote
    }

    pub async fn send_retry_limit(&self) -> Option<NonZeroU32> {
        self.inner.lock().await.send_retry_limit
    }

    /// Sequence number the next `send` will use.
    pub async fn send_sequence(&self) -> u16 {
        self.inner.lock().await.sender.next_seq
    }

    /// Sequence number next expected from `peer`, if it has been seen.
    pub async fn expected_sequence(&self, peer: SocketAddr) -> Option<u16> {
        self.inner.lock().await.receiver.expected(&peer)
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Deliver `buf` to the remote endpoint as one message.
    ///
    /// Retransmits every `timeout` until an ACK carrying the current send
    /// sequence arrives, then advances the sequence and returns `buf.len()`.
    /// With a retry limit set, fails with [`ConnError::RetriesExhausted`]
    /// after that many transmissions and leaves the sequence unchanged.
    /// A failed transmission is returned immediately as
    /// [`ConnError::Transport`].
    pub async fn send(&self, buf: &[u8]) -> Result<usize, ConnError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let remote = inner.remote.ok_or(ConnError::NoRemoteEndpoint)?;
        let seq = inner.sender.next_seq;
        let frame = DataFrame::new(seq, buf)
            .encode()
            .map_err(ConnError::Encode)?;

        inner.sender.begin();
        while inner.sender.may_attempt(inner.send_retry_limit) {
            inner.sender.on_attempt();

            if let Err(e) = inner.socket.send_to(&frame, remote).await {
                inner.sender.begin();
                return Err(ConnError::Transport(e));
            }
            log::debug!(
                "[rudp:send] (seq {seq}) → DATA {} bytes to {remote} attempt={}",
                frame.len(),
                inner.sender.attempts
            );

            match self.wait_for_ack(&inner.socket).await {
                AckWait::Reply(ack) if inner.sender.accepts(ack) => {
                    inner.sender.on_acked();
                    log::debug!("[rudp:send] (seq {seq}) ← ACK from {remote}");
                    return Ok(buf.len());
                }
                AckWait::Reply(ack) => {
                    log::debug!("[rudp:send] (seq {seq}) ← ACK {ack} ignored");
                }
                AckWait::Malformed => {
                    log::debug!("[rudp:send] (seq {seq}) ← short reply ignored");
                }
                AckWait::TimedOut => {
                    log::debug!("[rudp:send] (seq {seq}) timed out waiting for ACK from {remote}");
                }
            }
        }

        let attempts = inner.sender.on_exhausted();
        log::warn!("[rudp:send] (seq {seq}) no ACK from {remote} after {attempts} attempts");
        Err(ConnError::RetriesExhausted {
            attempts,
            sequence: seq,
        })
    }

    /// Wait up to one timeout for a reply datagram on `socket`.
    ///
    /// A socket error while waiting is logged and the wait runs out the
    /// deadline, so retransmissions stay paced.
    async fn wait_for_ack(&self, socket: &Socket) -> AckWait {
        let deadline = self.deadline.arm(self.timeout);

        let reply = async {
            let mut buf = [0u8; ACK_LEN];
            let (n, from) = socket.recv_from(&mut buf).await?;
            Ok::<_, io::Error>((AckFrame::decode(&buf[..n]), from))
        };

        let outcome = tokio::select! {
            received = reply => match received {
                Ok((Some(ack), from)) => {
                    log::trace!("[rudp:send] reply {} from {from}", ack.sequence);
                    AckWait::Reply(ack.sequence)
                }
                Ok((None, _)) => AckWait::Malformed,
                Err(e) => {
                    log::warn!("[rudp:send] error waiting for ACK: {e}");
                    self.deadline.expired(deadline).await;
                    AckWait::TimedOut
                }
            },
            _ = self.deadline.expired(deadline) => AckWait::TimedOut,
        };

        self.deadline.disarm();
        outcome
    }

    /// Wait for the next new message from any peer and copy it into `buf`.
    ///
    /// Returns the payload length and the sender's address.  Duplicates of
    /// already delivered messages are ACKed again and skipped.  Blocks
    /// indefinitely while no new message arrives.
    ///
    /// Fails with [`ConnError::BufferTooSmall`] if a message does not fit in
    /// `buf` (no ACK is sent for it) and with [`ConnError::Decode`] if a
    /// datagram is not a well-formed data frame.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ConnError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if inner.local.is_none() {
            return Err(ConnError::NoLocalEndpoint);
        }

        let capacity = buf.len();
        let mut datagram = vec![0u8; MAX_DATAGRAM];

        loop {
            let (n, peer) = match inner.socket.recv_from(&mut datagram).await {
                Ok(received) => received,
                Err(e) => {
                    log::warn!("[rudp:recv] error receiving datagram: {e}");
                    continue;
                }
            };
            let expected = inner.receiver.observe(peer);
            log::debug!("[rudp:recv] (expect {expected}) ← {n} bytes from {peer}");

            let frame = DataFrame::decode(&datagram[..n], capacity).map_err(|e| match e {
                PacketError::TooLarge { len, capacity } => ConnError::BufferTooSmall {
                    needed: len,
                    capacity,
                },
                other => ConnError::Decode(other),
            })?;
            let seq = frame.sequence;
            let verdict = inner.receiver.classify(peer, seq);

            let ack = AckFrame { sequence: seq }.encode();
            if let Err(e) = inner.socket.send_to(&ack, peer).await {
                // Without an ACK the peer retransmits; deliver it then.
                log::warn!("[rudp:recv] (seq {seq}) error sending ACK to {peer}: {e}");
                continue;
            }

            if !verdict.delivers() {
                log::debug!("[rudp:recv] (seq {seq}) duplicate from {peer}; → ACK");
                continue;
            }
            if let Verdict::CatchUp { skipped } = verdict {
                log::debug!(
                    "[rudp:recv] (seq {seq}) catching up {skipped} message(s) from {peer}; → ACK"
                );
            } else {
                log::debug!("[rudp:recv] (seq {seq}) → ACK to {peer}");
            }

            let len = frame.payload.len();
            buf[..len].copy_from_slice(&frame.payload);
            inner.receiver.on_delivered(peer, seq);
            return Ok((len, peer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct_and_non_zero() {
        let errors = [
            ConnError::Configuration(String::new()),
            ConnError::InvalidArgument(String::new()),
            ConnError::NoRemoteEndpoint,
            ConnError::NoLocalEndpoint,
            ConnError::Transport(io::Error::new(io::ErrorKind::Other, "x")),
            ConnError::Encode(PacketError::PayloadTooLarge(0)),
            ConnError::Decode(PacketError::NegativeLength(-1)),
            ConnError::BufferTooSmall {
                needed: 2,
                capacity: 1,
            },
            ConnError::RetriesExhausted {
                attempts: 1,
                sequence: 0,
            },
            ConnError::UnknownHandle(Handle::from(7)),
        ];
        let mut codes: Vec<i32> = errors.iter().map(ConnError::code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn default_config_retries_forever() {
        let config = ConnectionConfig::default();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.send_retry_limit, None);
        assert_eq!(
            ConnectionConfig::from_millis(250).timeout,
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn new_connection_has_no_endpoints() {
        let conn = Connection::with_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(conn.local_endpoint().await, None);
        assert_eq!(conn.remote_endpoint().await, None);
        assert_eq!(conn.send_sequence().await, 0);
        assert_eq!(conn.timeout(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn zero_retry_limit_is_rejected() {
        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        let err = conn.set_send_retry_limit(0).await.unwrap_err();
        assert!(matches!(err, ConnError::InvalidArgument(_)));
        assert_eq!(conn.send_retry_limit().await, None);

        conn.set_send_retry_limit(4).await.unwrap();
        assert_eq!(conn.send_retry_limit().await, NonZeroU32::new(4));
    }

    #[tokio::test]
    async fn invalid_remote_address_is_a_configuration_error() {
        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        for bad in ["", "localhost", "256.0.0.1", "::1"] {
            let err = conn.set_remote_endpoint(bad, 3200).await.unwrap_err();
            assert!(matches!(err, ConnError::Configuration(_)), "{bad:?}: {err}");
        }
        let err = conn.set_remote_endpoint("127.0.0.1", 0).await.unwrap_err();
        assert!(matches!(err, ConnError::Configuration(_)));
        assert_eq!(conn.remote_endpoint().await, None);
    }

    #[tokio::test]
    async fn send_without_remote_fails() {
        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        let err = conn.send(b"hello").await.unwrap_err();
        assert!(matches!(err, ConnError::NoRemoteEndpoint));
    }

    #[tokio::test]
    async fn receive_without_local_fails() {
        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        let mut buf = [0u8; 16];
        let err = conn.receive(&mut buf).await.unwrap_err();
        assert!(matches!(err, ConnError::NoLocalEndpoint));
    }

    #[tokio::test]
    async fn oversized_payload_is_an_encode_error() {
        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        conn.set_remote_endpoint("127.0.0.1", 9).await.unwrap();
        let payload = vec![0u8; crate::packet::MAX_PAYLOAD + 1];
        let err = conn.send(&payload).await.unwrap_err();
        assert!(matches!(err, ConnError::Encode(PacketError::PayloadTooLarge(_))));
        assert_eq!(conn.send_sequence().await, 0);
    }

    #[tokio::test]
    async fn binding_a_taken_port_leaves_local_unset() {
        let holder = Connection::open(ConnectionConfig::default()).await.unwrap();
        let taken = holder.set_local_endpoint(0).await.unwrap();

        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        let err = conn.set_local_endpoint(taken.port()).await.unwrap_err();
        assert!(matches!(err, ConnError::Configuration(_)));
        assert_eq!(conn.local_endpoint().await, None);
    }

    #[tokio::test]
    async fn setting_same_local_port_again_succeeds() {
        let conn = Connection::open(ConnectionConfig::default()).await.unwrap();
        let first = conn.set_local_endpoint(0).await.unwrap();
        let second = conn.set_local_endpoint(first.port()).await.unwrap();
        assert_eq!(first, second);
    }
}
