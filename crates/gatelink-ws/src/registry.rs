//! Connection registry and poller
//!
//! The registry holds non-owning references to connections for tick-driven
//! polling. `poll_all` walks a snapshot, so handlers invoked during the pass
//! may register or unregister connections without disturbing it.

use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use uuid::Uuid;

use gatelink_common::WebSocketConfig;

use crate::connection::{Shared, WsConnection, WsState};
use crate::error::WsResult;
use crate::stream::Connector;

/// Set of connections driven together
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<Uuid, Weak<Shared>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect over TCP and register the new connection
    pub fn connect(&self, url: &str, config: WebSocketConfig) -> WsResult<WsConnection> {
        let conn = WsConnection::connect(url, config)?;
        self.register(&conn);
        Ok(conn)
    }

    /// Connect through a custom connector and register the new connection
    pub fn connect_with(
        &self,
        url: &str,
        config: WebSocketConfig,
        connector: Arc<dyn Connector>,
    ) -> WsResult<WsConnection> {
        let conn = WsConnection::connect_with(url, config, connector)?;
        self.register(&conn);
        Ok(conn)
    }

    /// Start polling a connection
    pub fn register(&self, conn: &WsConnection) {
        self.entries.insert(conn.id(), Arc::downgrade(conn.shared()));
        tracing::trace!(connection_id = %conn.id(), "Connection registered");
    }

    /// Stop polling a connection; returns whether it was registered
    pub fn unregister(&self, id: Uuid) -> bool {
        self.entries.remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered connections, including ones not yet unlinked
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handle to a registered, still-alive connection
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<WsConnection> {
        self.entries
            .get(&id)
            .and_then(|weak| weak.upgrade())
            .map(WsConnection::from_shared)
    }

    /// Poll every registered connection once
    ///
    /// Connections that are closed after their poll, or whose owners have
    /// dropped them, are unlinked. Returns the number of connections polled.
    pub fn poll_all(&self, now: Instant) -> usize {
        let snapshot: Vec<(Uuid, Weak<Shared>)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut polled = 0;
        for (id, weak) in snapshot {
            let Some(shared) = weak.upgrade() else {
                self.entries.remove(&id);
                continue;
            };
            let conn = WsConnection::from_shared(shared);
            polled += 1;
            if conn.poll(now) == WsState::Closed {
                self.entries.remove(&id);
                tracing::trace!(connection_id = %id, "Closed connection unlinked");
            }
        }
        polled
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}
