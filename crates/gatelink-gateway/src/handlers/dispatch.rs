//! Dispatch handler (op 0)

use crate::error::GatewayResult;
use crate::protocol::GatewayMessage;
use crate::session::{GatewayEvent, SessionCore, SessionEvent, SessionState};

/// Handles Dispatch messages
pub(crate) struct DispatchHandler;

impl DispatchHandler {
    /// Track session identity from `READY`/`RESUMED`, then hand the event
    /// to the host
    pub(crate) fn handle(core: &mut SessionCore, message: GatewayMessage) -> GatewayResult<()> {
        let Some(name) = message.t.clone() else {
            tracing::debug!(session_id = %core.id, "Dispatch without an event name");
            return Ok(());
        };

        if let Some(ready) = message.as_ready() {
            core.can_resume = ready.session_id.is_some();
            core.session_id = ready.session_id;
            core.resume_gateway_url = ready.resume_gateway_url;
            core.reconnect_attempts = 0;
            core.identify_at = None;
            core.set_state(SessionState::Ready);
            tracing::info!(
                session_id = %core.id,
                server_session_id = ?core.session_id,
                seq = core.sequence,
                "Gateway session ready"
            );
            core.emit(SessionEvent::Ready(message.d.clone()));
        } else if name == "READY" {
            tracing::warn!(
                session_id = %core.id,
                state = %core.state,
                "READY dispatch without a usable payload"
            );
        } else if name == "RESUMED" && core.state == SessionState::Resuming {
            core.reconnect_attempts = 0;
            core.set_state(SessionState::Ready);
            tracing::info!(session_id = %core.id, seq = core.sequence, "Gateway session resumed");
        }

        core.emit(SessionEvent::Dispatch(GatewayEvent {
            name,
            data: message.d,
            sequence: message.s,
        }));
        Ok(())
    }
}
