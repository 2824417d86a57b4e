//! Session state machine
//!
//! Everything here runs under the session lock. Nothing calls a host
//! handler directly: handlers are queued in `pending` and invoked by
//! [`GatewaySession::tick`](super::GatewaySession::tick) once the lock is
//! released.

use std::time::{Duration, Instant};

use gatelink_common::{GatewayConfig, GatewayConfigUpdate};
use gatelink_ws::{CloseCode, CloseFrame, WsConnection};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::events::{SessionEvent, SessionHandlers};
use super::state::SessionState;
use super::transport::{Inbound, Transport, TransportEvent};
use crate::error::{GatewayError, GatewayResult};
use crate::handlers::MessageDispatcher;
use crate::protocol::{GatewayCloseCode, GatewayMessage, IdentifyPayload, OpCode, ResumePayload};

/// Close code used when dropping a connection we intend to resume
///
/// Closing with 1000 or 1001 tells the server the session is over.
const RESUMABLE_CLOSE_CODE: u16 = 4000;

pub(crate) struct SessionCore {
    pub(crate) id: Uuid,
    pub(crate) config: GatewayConfig,
    transport: Transport,
    pub(crate) connection: Option<WsConnection>,
    inbox_tx: UnboundedSender<Inbound>,
    inbox_rx: UnboundedReceiver<Inbound>,

    pub(crate) state: SessionState,
    pub(crate) session_id: Option<String>,
    pub(crate) resume_gateway_url: Option<String>,
    pub(crate) sequence: u64,
    pub(crate) can_resume: bool,

    pub(crate) heartbeat_interval: Duration,
    pub(crate) last_heartbeat_time: Option<Instant>,
    pub(crate) last_heartbeat_ack_time: Option<Instant>,
    pub(crate) waiting_for_ack: bool,

    pub(crate) reconnect_attempts: u32,
    next_reconnect_at: Option<Instant>,
    /// Whether the connection being opened should Resume instead of Identify
    pub(crate) resume_pending: bool,
    /// Fresh Identify scheduled after an Invalid Session
    pub(crate) identify_at: Option<Instant>,

    pub(crate) handlers: SessionHandlers,
    pub(crate) pending: Vec<SessionEvent>,
}

impl SessionCore {
    pub(crate) fn new(config: GatewayConfig, transport: Transport) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4(),
            heartbeat_interval: config.heartbeat_interval(),
            config,
            transport,
            connection: None,
            inbox_tx,
            inbox_rx,
            state: SessionState::Disconnected,
            session_id: None,
            resume_gateway_url: None,
            sequence: 0,
            can_resume: false,
            last_heartbeat_time: None,
            last_heartbeat_ack_time: None,
            waiting_for_ack: false,
            reconnect_attempts: 0,
            next_reconnect_at: None,
            resume_pending: false,
            identify_at: None,
            handlers: SessionHandlers::default(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(
                session_id = %self.id,
                from = %self.state,
                to = %state,
                "Session state changed"
            );
            self.state = state;
        }
    }

    pub(crate) fn emit(&mut self, event: SessionEvent) {
        self.pending.push(event);
    }

    /// Keep the highest sequence number seen
    pub(crate) fn record_sequence(&mut self, seq: u64) {
        if seq > self.sequence {
            self.sequence = seq;
        }
    }

    /// Forget the server-side session
    pub(crate) fn invalidate(&mut self) {
        self.session_id = None;
        self.resume_gateway_url = None;
        self.sequence = 0;
        self.can_resume = false;
        self.resume_pending = false;
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        match (self.last_heartbeat_time, self.last_heartbeat_ack_time) {
            (Some(sent), Some(acked)) if acked >= sent => Some(acked - sent),
            _ => None,
        }
    }

    // === Transport ===

    /// Endpoint for the next connection
    fn endpoint(&self, resume: bool) -> String {
        match self.resume_gateway_url.as_deref() {
            Some(url) if resume => GatewayConfig {
                url: url.to_string(),
                ..self.config.clone()
            }
            .connect_url(),
            _ => self.config.connect_url(),
        }
    }

    /// Open a new connection; the session moves to `Connecting`
    pub(crate) fn open_transport(&mut self, resume: bool) -> GatewayResult<()> {
        let url = self.endpoint(resume);
        let conn = self.transport.open(&url, &self.inbox_tx)?;
        tracing::debug!(
            session_id = %self.id,
            connection_id = %conn.id(),
            resume,
            "Gateway transport opened"
        );
        self.connection = Some(conn);
        self.resume_pending = resume;
        self.waiting_for_ack = false;
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    /// Close and forget the current connection without notifying anyone
    pub(crate) fn drop_transport(&mut self, code: u16, reason: &str) {
        if let Some(conn) = self.connection.take() {
            conn.clear_handlers();
            conn.close_with(code, reason);
            tracing::trace!(session_id = %self.id, connection_id = %conn.id(), code, "Gateway transport dropped");
        }
        self.waiting_for_ack = false;
    }

    // === Sending ===

    pub(crate) fn send_message(&mut self, message: &GatewayMessage) -> GatewayResult<()> {
        let conn = self.connection.as_ref().ok_or(GatewayError::NotConnected)?;
        conn.send_text(message.to_json()?)?;
        tracing::trace!(session_id = %self.id, op = %message.op, "Gateway payload sent");
        Ok(())
    }

    pub(crate) fn send_op(&mut self, op: OpCode, data: Value) -> GatewayResult<()> {
        self.send_message(&GatewayMessage::new(op, data))
    }

    pub(crate) fn send_heartbeat(&mut self, now: Instant) -> GatewayResult<()> {
        self.send_message(&GatewayMessage::heartbeat(self.sequence))?;
        self.last_heartbeat_time = Some(now);
        self.waiting_for_ack = true;
        tracing::trace!(session_id = %self.id, seq = self.sequence, "Heartbeat sent");
        Ok(())
    }

    /// Send Identify; returns false when no token is configured
    pub(crate) fn send_identify(&mut self) -> GatewayResult<bool> {
        let Some(token) = self.config.token.clone() else {
            tracing::debug!(session_id = %self.id, "No token configured, not identifying");
            return Ok(false);
        };
        let payload = IdentifyPayload::new(token, self.config.properties.clone())
            .with_intents(self.config.intents);
        self.send_message(&GatewayMessage::identify(&payload)?)?;
        tracing::debug!(session_id = %self.id, intents = ?self.config.intents, "Identify sent");
        self.set_state(SessionState::Authenticating);
        Ok(true)
    }

    /// Send Resume for the stored session
    pub(crate) fn send_resume(&mut self) -> GatewayResult<()> {
        let session_id = self.session_id.clone().ok_or(GatewayError::InvalidSession)?;
        let payload = ResumePayload {
            token: self.config.token.clone().unwrap_or_default(),
            session_id,
            seq: self.sequence,
        };
        self.send_message(&GatewayMessage::resume(&payload)?)?;
        tracing::debug!(session_id = %self.id, seq = self.sequence, "Resume sent");
        self.set_state(SessionState::Resuming);
        Ok(())
    }

    // === Reconnection ===

    /// Drop the connection and schedule a new one after the reconnect delay
    ///
    /// Once `max_reconnect_attempts` is used up the session stops in `Error`
    /// and reports `ReconnectExhausted`.
    pub(crate) fn begin_reconnect(&mut self, now: Instant, resume: bool) {
        let code = if resume {
            RESUMABLE_CLOSE_CODE
        } else {
            CloseCode::NORMAL
        };
        self.drop_transport(code, "reconnecting");
        self.identify_at = None;

        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            tracing::error!(
                session_id = %self.id,
                attempts = self.reconnect_attempts,
                "Gateway reconnect attempts exhausted"
            );
            self.next_reconnect_at = None;
            self.set_state(SessionState::Error);
            self.emit(SessionEvent::Error(GatewayError::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            }));
            return;
        }

        self.resume_pending = resume;
        self.next_reconnect_at = Some(now + self.config.reconnect_delay());
        self.set_state(SessionState::Reconnecting);
        tracing::info!(
            session_id = %self.id,
            attempt = self.reconnect_attempts + 1,
            delay_ms = self.config.reconnect_delay_ms,
            resume,
            "Gateway reconnect scheduled"
        );
    }

    fn attempt_reconnect(&mut self, now: Instant) {
        self.next_reconnect_at = None;
        self.reconnect_attempts += 1;
        let resume = self.resume_pending;
        tracing::info!(
            session_id = %self.id,
            attempt = self.reconnect_attempts,
            resume,
            "Reconnecting to gateway"
        );
        if let Err(err) = self.open_transport(resume) {
            tracing::warn!(session_id = %self.id, error = %err, "Gateway reconnect failed");
            self.emit(SessionEvent::Error(err));
            self.begin_reconnect(now, resume);
        }
    }

    /// React to the transport closing underneath the session
    fn handle_close(&mut self, frame: CloseFrame, now: Instant) {
        if let Some(conn) = self.connection.take() {
            conn.clear_handlers();
        }
        self.waiting_for_ack = false;

        let gateway_code = GatewayCloseCode::from_u16(frame.code);
        if frame.is_normal() {
            tracing::debug!(session_id = %self.id, code = frame.code, "Gateway connection closed");
        } else {
            tracing::warn!(
                session_id = %self.id,
                code = frame.code,
                reason = %frame.reason,
                "Gateway connection closed"
            );
        }

        self.emit(SessionEvent::Error(GatewayError::Closed {
            code: frame.code,
            reason: frame.reason.clone(),
        }));
        self.emit(SessionEvent::Close(frame));

        if gateway_code.is_some_and(GatewayCloseCode::invalidates_session) {
            self.invalidate();
        }
        let reconnectable = gateway_code.map_or(true, GatewayCloseCode::should_reconnect);
        if !reconnectable || !self.config.auto_reconnect {
            self.identify_at = None;
            self.set_state(SessionState::Disconnected);
            return;
        }
        let resume = self.config.resume_on_reconnect && self.can_resume;
        self.begin_reconnect(now, resume);
    }

    // === Tick ===

    fn drain_inbox(&mut self, now: Instant) {
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            let current = self.connection.as_ref().map(WsConnection::id);
            if current != Some(inbound.connection_id) {
                tracing::trace!(
                    session_id = %self.id,
                    connection_id = %inbound.connection_id,
                    "Dropping event from a replaced connection"
                );
                continue;
            }
            match inbound.event {
                TransportEvent::Open => {
                    if self.state == SessionState::Connecting {
                        self.set_state(SessionState::Connected);
                    }
                }
                TransportEvent::Text(text) => MessageDispatcher::dispatch(self, &text, now),
                TransportEvent::Binary(len) => {
                    tracing::debug!(session_id = %self.id, len, "Ignoring binary gateway payload");
                }
                TransportEvent::Error(reason) => {
                    tracing::debug!(session_id = %self.id, %reason, "Gateway transport error");
                }
                TransportEvent::Close(frame) => self.handle_close(frame, now),
            }
        }
    }

    pub(crate) fn tick(&mut self, now: Instant) {
        self.drain_inbox(now);

        match self.state {
            SessionState::Reconnecting if self.next_reconnect_at.is_some_and(|at| now >= at) => {
                self.attempt_reconnect(now);
            }
            SessionState::Error
                if self.connection.is_some() && self.identify_at.is_some_and(|at| now >= at) =>
            {
                self.identify_at = None;
                match self.send_identify() {
                    Ok(true) => {}
                    Ok(false) => self.set_state(SessionState::Connected),
                    Err(err) => self.emit(SessionEvent::Error(err)),
                }
            }
            _ => {}
        }

        if self.connection.is_none() {
            return;
        }

        if self.waiting_for_ack {
            let timed_out = self
                .last_heartbeat_time
                .is_some_and(|sent| now.saturating_duration_since(sent) > self.config.heartbeat_timeout());
            if timed_out {
                tracing::warn!(
                    session_id = %self.id,
                    timeout_ms = self.config.heartbeat_timeout_ms,
                    "Heartbeat ACK timed out"
                );
                self.emit(SessionEvent::Error(GatewayError::HeartbeatTimeout));
                if self.config.auto_reconnect {
                    let resume = self.config.resume_on_reconnect && self.can_resume;
                    self.begin_reconnect(now, resume);
                } else {
                    self.drop_transport(RESUMABLE_CLOSE_CODE, "heartbeat timeout");
                    self.set_state(SessionState::Disconnected);
                }
                return;
            }
        }

        // No new heartbeat until the previous one is acknowledged
        if self.state == SessionState::Ready && !self.waiting_for_ack {
            let due = self
                .last_heartbeat_time
                .map_or(true, |sent| now.saturating_duration_since(sent) >= self.heartbeat_interval);
            if due {
                if let Err(err) = self.send_heartbeat(now) {
                    tracing::warn!(session_id = %self.id, error = %err, "Failed to send heartbeat");
                }
            }
        }
    }

    // === Host operations ===

    pub(crate) fn connect(&mut self) -> GatewayResult<()> {
        if self.state.is_active() {
            return Ok(());
        }
        self.reconnect_attempts = 0;
        self.next_reconnect_at = None;
        self.identify_at = None;
        if let Err(err) = self.open_transport(false) {
            tracing::warn!(session_id = %self.id, error = %err, "Gateway connect failed");
            self.set_state(SessionState::Error);
            return Err(err);
        }
        Ok(())
    }

    /// Apply a partial config; nothing changes unless the result validates
    ///
    /// An explicit heartbeat interval also replaces the one a Hello set.
    pub(crate) fn update_config(&mut self, update: &GatewayConfigUpdate) -> GatewayResult<()> {
        let next = self.config.updated(update)?;
        if let Some(ms) = update.heartbeat_interval_ms {
            self.heartbeat_interval = Duration::from_millis(ms);
        }
        self.config = next;
        tracing::debug!(session_id = %self.id, ?update, "Session config updated");
        Ok(())
    }

    pub(crate) fn disconnect(&mut self) {
        self.drop_transport(CloseCode::NORMAL, "");
        self.next_reconnect_at = None;
        self.identify_at = None;
        self.resume_pending = false;
        self.set_state(SessionState::Disconnected);
    }
}
