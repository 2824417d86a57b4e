//! Reconnect handler (op 7)

use std::time::Instant;

use gatelink_ws::CloseCode;

use crate::protocol::GatewayMessage;
use crate::session::{SessionCore, SessionState};

/// Handles server-requested reconnects
pub(crate) struct ReconnectHandler;

impl ReconnectHandler {
    /// Drop the connection and reconnect
    ///
    /// The new connection identifies from scratch unless the payload is
    /// literally `true` and the session is resumable.
    pub(crate) fn handle(core: &mut SessionCore, message: &GatewayMessage, now: Instant) {
        let resume = message.flag() && core.config.resume_on_reconnect && core.can_resume;
        tracing::info!(session_id = %core.id, resume, "Server requested reconnect");

        if core.config.auto_reconnect {
            core.begin_reconnect(now, resume);
        } else {
            core.drop_transport(CloseCode::NORMAL, "reconnect requested");
            core.set_state(SessionState::Disconnected);
        }
    }
}
