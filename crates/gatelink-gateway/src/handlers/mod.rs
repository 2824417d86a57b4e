//! Op code handlers
//!
//! Handles server payloads based on their operation code. Handlers run with
//! the session lock held and only queue host callbacks.

mod dispatch;
mod heartbeat;
mod hello;
mod invalid_session;
mod reconnect;

pub(crate) use dispatch::DispatchHandler;
pub(crate) use heartbeat::HeartbeatHandler;
pub(crate) use hello::HelloHandler;
pub(crate) use invalid_session::InvalidSessionHandler;
pub(crate) use reconnect::ReconnectHandler;

use std::time::Instant;

use crate::protocol::{GatewayMessage, OpCode};
use crate::session::SessionCore;

/// Dispatch incoming server payloads to the appropriate handlers
pub(crate) struct MessageDispatcher;

impl MessageDispatcher {
    /// Handle one text frame from the gateway
    ///
    /// Malformed payloads are logged and dropped; they never end the session.
    pub(crate) fn dispatch(core: &mut SessionCore, text: &str, now: Instant) {
        let message = match GatewayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    session_id = %core.id,
                    error = %e,
                    "Dropping malformed gateway payload"
                );
                return;
            }
        };

        if let Some(seq) = message.s {
            core.record_sequence(seq);
        }
        tracing::trace!(
            session_id = %core.id,
            op = %message.op,
            seq = ?message.s,
            event = ?message.t,
            "Gateway payload received"
        );

        let result = match message.op {
            OpCode::Hello => HelloHandler::handle(core, &message, now),
            OpCode::Dispatch => DispatchHandler::handle(core, message),
            OpCode::Heartbeat => HeartbeatHandler::handle(core, now),
            OpCode::HeartbeatAck => {
                HeartbeatHandler::handle_ack(core, now);
                Ok(())
            }
            OpCode::InvalidSession => {
                InvalidSessionHandler::handle(core, &message, now);
                Ok(())
            }
            OpCode::Reconnect => {
                ReconnectHandler::handle(core, &message, now);
                Ok(())
            }
            op => {
                tracing::trace!(session_id = %core.id, %op, "Ignoring op code");
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!(session_id = %core.id, error = %e, "Failed to handle gateway payload");
        }
    }
}
