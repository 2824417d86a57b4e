//! Gateway session handle

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gatelink_common::{GatewayConfig, GatewayConfigUpdate};
use gatelink_ws::{Callback, CloseFrame, WsConnection};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use uuid::Uuid;

use super::events::{GatewayEvent, SessionHandlers};
use super::machine::SessionCore;
use super::state::SessionState;
use super::transport::Transport;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::OpCode;

pub(crate) struct Shared {
    pub(crate) id: Uuid,
    inner: Mutex<SessionCore>,
}

/// One logical session with a gateway server
///
/// Clones refer to the same session. Frames are read by the connection
/// registry's poll; the session reacts to them, heartbeats and reconnects
/// when [`tick`](Self::tick) is called. Handlers run at the end of each tick
/// with no lock held, so they may call back into any session.
#[derive(Clone)]
pub struct GatewaySession {
    shared: Arc<Shared>,
}

impl GatewaySession {
    /// Create a disconnected session
    pub fn new(config: GatewayConfig, transport: Transport) -> GatewayResult<Self> {
        config.validate()?;
        let core = SessionCore::new(config, transport);
        if core.config.compression {
            tracing::warn!(
                session_id = %core.id,
                "Payload compression is not supported, continuing uncompressed"
            );
        }
        tracing::debug!(session_id = %core.id, url = %core.config.url, "Gateway session created");
        Ok(Self {
            shared: Arc::new(Shared {
                id: core.id,
                inner: Mutex::new(core),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.shared.inner.lock()
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Server-assigned session id, set by `READY`
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Endpoint the server asked resumes to use
    #[must_use]
    pub fn resume_gateway_url(&self) -> Option<String> {
        self.lock().resume_gateway_url.clone()
    }

    /// Highest sequence number received
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.lock().can_resume
    }

    /// Time between the last heartbeat and its acknowledgement
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.lock().latency()
    }

    /// Heartbeat interval in use (the server's, once Hello arrived)
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.lock().heartbeat_interval
    }

    #[must_use]
    pub fn waiting_for_ack(&self) -> bool {
        self.lock().waiting_for_ack
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// The current transport, if any
    #[must_use]
    pub fn connection(&self) -> Option<WsConnection> {
        self.lock().connection.clone()
    }

    /// Open the transport
    ///
    /// Blocks for the TCP connect and upgrade handshake. Does nothing while
    /// the session is already active. On failure the session is left in
    /// `Error`.
    pub fn connect(&self) -> GatewayResult<()> {
        self.lock().connect()
    }

    /// Close the transport and stop reconnecting; no handler fires
    pub fn disconnect(&self) {
        self.lock().disconnect();
    }

    /// Change timing and reconnect options on a live session
    ///
    /// Accepts `heartbeatInterval`, `heartbeatTimeout`, `reconnectDelay`,
    /// `maxReconnectAttempts` and `autoReconnect`; absent keys keep their
    /// current value. On error the session is left unchanged.
    pub fn set_config(&self, options: &Value) -> GatewayResult<()> {
        let update = GatewayConfigUpdate::from_options(options)?;
        self.lock().update_config(&update)
    }

    /// Current session options
    #[must_use]
    pub fn config(&self) -> GatewayConfig {
        self.lock().config.clone()
    }

    /// Send an arbitrary op code with a payload
    pub fn send(&self, op: OpCode, data: Value) -> GatewayResult<()> {
        self.lock().send_op(op, data)
    }

    pub fn on_ready<F>(&self, f: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.lock().handlers.on_ready = Some(Callback::new(f));
    }

    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.lock().handlers.on_event = Some(Callback::new(f));
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&GatewayError) + Send + Sync + 'static,
    {
        self.lock().handlers.on_error = Some(Callback::new(f));
    }

    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&CloseFrame) + Send + Sync + 'static,
    {
        self.lock().handlers.on_close = Some(Callback::new(f));
    }

    /// Remove all handlers
    pub fn clear_handlers(&self) {
        self.lock().handlers = SessionHandlers::default();
    }

    /// Process transport events, check heartbeat liveness, send a due
    /// heartbeat or reconnect, then invoke handlers
    ///
    /// Returns the state after the tick.
    pub fn tick(&self, now: Instant) -> SessionState {
        let (events, handlers) = {
            let mut core = self.lock();
            core.tick(now);
            (std::mem::take(&mut core.pending), core.handlers.clone())
        };
        handlers.dispatch(events);
        self.state()
    }
}

impl PartialEq for GatewaySession {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for GatewaySession {}

impl fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("GatewaySession")
            .field("id", &core.id)
            .field("state", &core.state)
            .field("sequence", &core.sequence)
            .field("can_resume", &core.can_resume)
            .finish()
    }
}
