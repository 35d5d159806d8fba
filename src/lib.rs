//! `rudp`: reliable point-to-multipoint messaging over UDP.
//!
//! Each [`Connection`] runs a Stop-and-Wait ARQ protocol: `send` retransmits
//! one message until the peer ACKs its sequence number, `receive` delivers
//! each distinct message exactly once, in order, per sending peer.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────┐        ┌──────────────────────┐
//!  │ Connection (sender)  │  DATA  │ Connection (receiver)│
//!  │  SendState           │───────▶│  ReceiveState        │
//!  │  DeadlineActor       │◀───────│  (seq per peer)      │
//!  └────┬─────────────────┘  ACK   └─────┬────────────────┘
//!       │ raw UDP datagrams              │
//!  ┌────▼──────┐                   ┌─────▼─────┐
//!  │  Socket   │                   │  Socket   │
//!  └───────────┘                   └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      : wire format (serialise / deserialise)
//! - [`connection`]  : the per-connection protocol engine
//! - [`sender`]      : stop-and-wait outbound sequence state
//! - [`receiver`]    : per-peer inbound sequence state and dedup policy
//! - [`timer`]       : deadline actor bounding the ACK wait
//! - [`registry`]    : handle-based connection table
//! - [`simulator`]   : lossy relay for testing
//! - [`socket`]      : async UDP socket abstraction

pub mod connection;
pub mod packet;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod timer;

pub use connection::{ConnError, Connection, ConnectionConfig, DEFAULT_TIMEOUT};
pub use registry::{ConnectionRegistry, Handle};
