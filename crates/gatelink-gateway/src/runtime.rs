//! Runtime context
//!
//! Owns the connection and session registries. Independent runtimes share
//! nothing, so several can coexist in one process.

use std::sync::Arc;
use std::time::Instant;

use gatelink_common::{GatewayConfig, WebSocketConfig};
use gatelink_ws::{ConnectionRegistry, Connector};

use crate::error::GatewayResult;
use crate::registry::GatewayRegistry;
use crate::session::{GatewaySession, Transport};

/// What one [`Runtime::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Connections polled
    pub connections: usize,
    /// Sessions ticked
    pub sessions: usize,
}

/// Driver for a set of connections and gateway sessions
#[derive(Debug, Clone)]
pub struct Runtime {
    transport: Transport,
    sessions: GatewayRegistry,
}

impl Runtime {
    /// Runtime whose sessions connect over TCP (and rustls for `wss://`)
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self::from_transport(Transport::new(ConnectionRegistry::new(), config))
    }

    /// Runtime whose sessions connect through `connector`
    #[must_use]
    pub fn with_connector(config: WebSocketConfig, connector: Arc<dyn Connector>) -> Self {
        Self::from_transport(Transport::with_connector(
            ConnectionRegistry::new(),
            config,
            connector,
        ))
    }

    fn from_transport(transport: Transport) -> Self {
        Self {
            transport,
            sessions: GatewayRegistry::new(),
        }
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        self.transport.connections()
    }

    #[must_use]
    pub fn sessions(&self) -> &GatewayRegistry {
        &self.sessions
    }

    /// Create and register a disconnected session
    pub fn create_session(&self, config: GatewayConfig) -> GatewayResult<GatewaySession> {
        let session = GatewaySession::new(config, self.transport.clone())?;
        self.sessions.register(&session);
        Ok(session)
    }

    /// Disconnect a session and stop ticking it
    pub fn remove_session(&self, session: &GatewaySession) -> bool {
        session.disconnect();
        self.sessions.unregister(session.id())
    }

    /// Poll every connection, then tick every session
    pub fn tick(&self, now: Instant) -> TickReport {
        let connections = self.connections().poll_all(now);
        let sessions = self.sessions.tick_all(now);
        TickReport {
            connections,
            sessions,
        }
    }

    #[must_use]
    pub fn has_active_sessions(&self) -> bool {
        self.sessions.has_active_sessions()
    }
}
