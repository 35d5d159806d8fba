//! Lossy network simulator for exercising the retransmission paths.
//!
//! Real networks drop and duplicate datagrams.  To test the stop-and-wait
//! machinery without depending on actual network conditions, a
//! [`Simulator`] is a UDP relay placed between a sender and a receiver:
//!
//! ```text
//!  sender ──▶ Simulator ──▶ receiver (upstream)
//!         ◀──           ◀──
//! ```
//!
//! The sender targets [`Simulator::local_addr`]; the relay forwards its
//! datagrams upstream and forwards upstream replies back to the last address
//! it heard from.  Every forwarded datagram is subject to the fault model:
//!
//! | Fault        | Description                                         |
//! |--------------|-----------------------------------------------------|
//! | Packet loss  | Drop a datagram with probability `loss_rate`.       |
//! | Duplication  | Deliver a datagram twice with `duplicate_rate`.     |
//!
//! Faults are drawn from a `StdRng` seeded with `seed`, so a failing run can
//! be reproduced.

use std::io;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;

use crate::packet::MAX_DATAGRAM;
use crate::socket::Socket;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// A running fault-injecting relay.
///
/// The relay task stops when the simulator is dropped.
#[derive(Debug)]
pub struct Simulator {
    /// Address senders should target instead of the upstream receiver.
    pub local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Simulator {
    /// Bind a relay on loopback forwarding to `upstream`.
    pub async fn spawn(config: SimulatorConfig, upstream: SocketAddr) -> io::Result<Self> {
        for (name, p) in [
            ("loss_rate", config.loss_rate),
            ("duplicate_rate", config.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{name} must be within [0, 1], got {p}"),
                ));
            }
        }

        let socket = Socket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let local_addr = socket.local_addr;
        let task = tokio::spawn(relay(socket, upstream, config));
        Ok(Self { local_addr, task })
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay(socket: Socket, upstream: SocketAddr, config: SimulatorConfig) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut client: Option<SocketAddr> = None;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("[sim] receive error: {e}");
                continue;
            }
        };

        let dest = if from == upstream {
            match client {
                Some(client) => client,
                None => continue,
            }
        } else {
            client = Some(from);
            upstream
        };

        if rng.random_bool(config.loss_rate) {
            log::trace!("[sim] dropped {n} bytes {from} → {dest}");
            continue;
        }
        let copies = if rng.random_bool(config.duplicate_rate) { 2 } else { 1 };
        for _ in 0..copies {
            if let Err(e) = socket.send_to(&buf[..n], dest).await {
                log::warn!("[sim] forward to {dest} failed: {e}");
            }
        }
    }
}
