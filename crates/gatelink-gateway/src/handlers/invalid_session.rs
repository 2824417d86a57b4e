//! Invalid Session handler (op 9)

use std::time::Instant;

use gatelink_ws::CloseCode;

use crate::error::GatewayError;
use crate::protocol::GatewayMessage;
use crate::session::{SessionCore, SessionEvent, SessionState};

/// Handles Invalid Session messages
pub(crate) struct InvalidSessionHandler;

impl InvalidSessionHandler {
    /// Forget the session and report the failure
    ///
    /// With auto reconnect a fresh Identify goes out on the same connection
    /// after the reconnect delay; otherwise the connection is closed.
    pub(crate) fn handle(core: &mut SessionCore, message: &GatewayMessage, now: Instant) {
        tracing::warn!(
            session_id = %core.id,
            resumable = message.flag(),
            "Gateway session invalidated"
        );
        core.invalidate();
        core.waiting_for_ack = false;
        core.set_state(SessionState::Error);
        core.emit(SessionEvent::Error(GatewayError::InvalidSession));

        if core.config.auto_reconnect {
            core.identify_at = Some(now + core.config.reconnect_delay());
        } else {
            core.drop_transport(CloseCode::NORMAL, "invalid session");
            core.set_state(SessionState::Disconnected);
        }
    }
}
