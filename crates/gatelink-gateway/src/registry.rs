//! Gateway session registry
//!
//! Holds non-owning references to sessions for tick-driven enumeration.
//! `tick_all` walks a snapshot, so session handlers may create or drop
//! sessions while a pass is running.

use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use uuid::Uuid;

use crate::session::{GatewaySession, Shared};

/// Set of gateway sessions ticked together
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    entries: Arc<DashMap<Uuid, Weak<Shared>>>,
}

impl GatewayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking a session
    pub fn register(&self, session: &GatewaySession) {
        self.entries
            .insert(session.id(), Arc::downgrade(session.shared()));
        tracing::trace!(session_id = %session.id(), "Gateway session registered");
    }

    /// Stop ticking a session; returns whether it was registered
    pub fn unregister(&self, id: Uuid) -> bool {
        self.entries.remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// Handle to a registered, still-alive session
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<GatewaySession> {
        self.entries
            .get(&id)
            .and_then(|weak| weak.upgrade())
            .map(GatewaySession::from_shared)
    }

    /// Number of registered sessions, including ones not yet unlinked
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any registered session is still alive
    #[must_use]
    pub fn has_sessions(&self) -> bool {
        self.sessions().next().is_some()
    }

    /// Whether any session still needs ticking
    ///
    /// Sessions in `Disconnected` or `Error` only move again on an explicit
    /// `connect()`.
    #[must_use]
    pub fn has_active_sessions(&self) -> bool {
        self.sessions().any(|session| session.state().is_active())
    }

    /// Tick every registered session once
    ///
    /// Call after the connection registry's `poll_all` so frames read this
    /// pass are already queued. Dropped sessions are unlinked. Returns the
    /// number of sessions ticked.
    pub fn tick_all(&self, now: Instant) -> usize {
        let snapshot: Vec<(Uuid, Weak<Shared>)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut ticked = 0;
        for (id, weak) in snapshot {
            let Some(shared) = weak.upgrade() else {
                self.entries.remove(&id);
                tracing::trace!(session_id = %id, "Dropped gateway session unlinked");
                continue;
            };
            GatewaySession::from_shared(shared).tick(now);
            ticked += 1;
        }
        ticked
    }

    fn sessions(&self) -> impl Iterator<Item = GatewaySession> {
        let live: Vec<GatewaySession> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(GatewaySession::from_shared)
            .collect();
        live.into_iter()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::session::SessionState;
    use gatelink_common::{GatewayConfig, WebSocketConfig};
    use gatelink_ws::testing::MemoryConnector;

    const HELLO: &str = r#"{"op":10,"d":{"heartbeat_interval":45000}}"#;
    const READY: &str = r#"{"op":0,"t":"READY","s":1,"d":{"session_id":"abc"}}"#;

    fn runtime() -> (Runtime, Arc<MemoryConnector>) {
        let connector = MemoryConnector::new();
        let runtime = Runtime::with_connector(
            WebSocketConfig::default().without_keepalive(),
            connector.clone(),
        );
        (runtime, connector)
    }

    fn config() -> GatewayConfig {
        GatewayConfig::new("ws://gateway.test/").with_token("secret")
    }

    #[test]
    fn test_register_and_lookup() {
        let (runtime, _) = runtime();
        let registry = runtime.sessions();
        assert!(registry.is_empty());

        let session = runtime.create_session(config()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(session.id()));
        assert_eq!(registry.get(session.id()), Some(session.clone()));
        assert!(registry.has_sessions());

        assert!(registry.unregister(session.id()));
        assert!(!registry.unregister(session.id()));
        assert!(registry.get(session.id()).is_none());
    }

    #[test]
    fn test_dropped_sessions_are_unlinked() {
        let (runtime, _) = runtime();
        let kept = runtime.create_session(config()).unwrap();
        let dropped = runtime.create_session(config()).unwrap();
        let dropped_id = dropped.id();
        drop(dropped);

        assert_eq!(runtime.sessions().len(), 2);
        assert!(runtime.sessions().get(dropped_id).is_none());

        assert_eq!(runtime.sessions().tick_all(Instant::now()), 1);
        assert_eq!(runtime.sessions().len(), 1);
        assert!(runtime.sessions().contains(kept.id()));
    }

    #[test]
    fn test_has_active_sessions() {
        let (runtime, _) = runtime();
        let session = runtime.create_session(config()).unwrap();
        assert!(!runtime.has_active_sessions());

        session.connect().unwrap();
        assert!(runtime.has_active_sessions());

        session.disconnect();
        assert!(!runtime.has_active_sessions());
    }

    #[test]
    fn test_handlers_may_create_and_drop_sessions() {
        let (runtime, connector) = runtime();
        let session = runtime.create_session(config()).unwrap();
        let doomed = runtime.create_session(config()).unwrap();
        let doomed_id = doomed.id();

        let spawned = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let rt = runtime.clone();
        let sink = Arc::clone(&spawned);
        let doomed = parking_lot::Mutex::new(Some(doomed));
        session.on_ready(move |_| {
            let child = rt.create_session(config()).unwrap();
            sink.lock().push(child);
            if let Some(session) = doomed.lock().take() {
                rt.remove_session(&session);
            }
        });

        session.connect().unwrap();
        let peer = connector.last_peer().unwrap();
        peer.push_text(HELLO);
        peer.push_text(READY);
        runtime.tick(Instant::now());

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(spawned.lock().len(), 1);
        assert!(!runtime.sessions().contains(doomed_id));

        let child_id = spawned.lock()[0].id();
        assert!(runtime.sessions().contains(child_id));
        assert_eq!(runtime.sessions().tick_all(Instant::now()), 2);
    }
}
