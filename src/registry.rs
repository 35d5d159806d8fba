//! Handle-based registry of open connections.
//!
//! The registry hands out small integer [`Handle`]s for connections so that
//! callers that cannot hold a [`Connection`] directly (an error-code facade,
//! a CLI) can address them by number.  It is an ordinary value: construct
//! one, share it behind an `Arc` if several tasks need it.
//!
//! The handle table has its own lock, separate from each connection's lock,
//! and that lock is never held across an `.await`.  Lookups return an
//! `Arc<Connection>`; a removed connection is destroyed once the last clone
//! is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connection::{ConnError, Connection, ConnectionConfig};

/// Number identifying a connection within one [`ConnectionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Table {
    /// Last handle issued; handles start at 1 and are never reused.
    last: u32,
    connections: HashMap<Handle, Arc<Connection>>,
}

/// Thread-safe table of connections keyed by [`Handle`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    table: Mutex<Table>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection with a `timeout_ms` ACK timeout and register it.
    pub async fn create(&self, timeout_ms: u64) -> Result<Handle, ConnError> {
        self.create_with(ConnectionConfig::from_millis(timeout_ms))
            .await
    }

    /// Open a connection from a full [`ConnectionConfig`] and register it.
    pub async fn create_with(&self, config: ConnectionConfig) -> Result<Handle, ConnError> {
        let connection = Arc::new(Connection::open(config).await?);

        let mut table = self.lock();
        table.last += 1;
        let handle = Handle(table.last);
        table.connections.insert(handle, connection);
        log::debug!("[rudp:registry] opened connection {handle}");
        Ok(handle)
    }

    /// Look up the connection registered under `handle`.
    pub fn get(&self, handle: Handle) -> Result<Arc<Connection>, ConnError> {
        self.lock()
            .connections
            .get(&handle)
            .cloned()
            .ok_or(ConnError::UnknownHandle(handle))
    }

    /// Unregister `handle`.  Returns `false` if it was not registered.
    pub fn remove(&self, handle: Handle) -> bool {
        let removed = self.lock().connections.remove(&handle);
        if removed.is_some() {
            log::debug!("[rudp:registry] removed connection {handle}");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the table lock cannot leave it half-updated.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
