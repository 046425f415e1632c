//! `ConnectionRegistry`: bookkeeping of live connections for coordinated shutdown.
//!
//! Each `Listener` and `Connector` owns one registry.  There is no global
//! state: two listeners in the same process never see each other's
//! connections.
//!
//! The registry only holds [`WeakConnection`]s.  It never keeps a connection
//! alive on its own: dropping the last application handle still aborts the
//! connection, exactly as if it had never been registered.
//!
//! Entries are removed automatically once their connection reaches `Closed`,
//! so the registry only ever holds connections that still have work to do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use braid_core::{ConnectionId, ConnectionState, ErrorCode};
use tokio::task::JoinSet;
use tracing::debug;

use crate::infrastructure::connection::{Connection, WeakConnection};

/// Concurrency-safe map of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, WeakConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, WeakConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `conn` and arranges for its removal once it closes.
    ///
    /// Returns `false` (and registers nothing) if the connection is already
    /// `Closed`.  Must be called from within a Tokio runtime.
    pub fn register(self: &Arc<Self>, conn: &Connection) -> bool {
        if conn.state() == ConnectionState::Closed {
            return false;
        }

        let id = conn.id();
        self.entries().insert(id, conn.downgrade());

        // The watcher holds only a weak reference so a dropped registry
        // does not stay alive just to clean up after itself.
        let registry: Weak<Self> = Arc::downgrade(self);
        let mut changes = conn.state_changes();
        tokio::spawn(async move {
            let _ = changes.wait_for(|s| *s == ConnectionState::Closed).await;
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });

        debug!(connection_id = %id, "connection registered");
        true
    }

    /// Removes the entry for `id`, returning the connection if it is still
    /// alive.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.entries().remove(&id).and_then(|weak| weak.upgrade())
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.entries().get(&id).and_then(WeakConnection::upgrade)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries().keys().copied().collect()
    }

    /// Closes every registered connection with `code`, concurrently, and
    /// waits until all of them are `Closed`.
    ///
    /// Entries whose handles were all dropped are skipped; those connections
    /// already aborted.  The registry is empty afterwards.
    pub async fn close_all(&self, code: ErrorCode) {
        let connections: Vec<Connection> = self
            .entries()
            .drain()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        debug!(count = connections.len(), %code, "closing all connections");

        let mut closing = JoinSet::new();
        for conn in connections {
            closing.spawn(async move { conn.close(code).await });
        }
        while closing.join_next().await.is_some() {}
    }
}
