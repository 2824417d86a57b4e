//! Heartbeat handlers (op 1, op 11)

use std::time::Instant;

use crate::error::GatewayResult;
use crate::session::SessionCore;

/// Handles Heartbeat requests and acknowledgements
pub(crate) struct HeartbeatHandler;

impl HeartbeatHandler {
    /// The server asked for a heartbeat right away
    pub(crate) fn handle(core: &mut SessionCore, now: Instant) -> GatewayResult<()> {
        tracing::trace!(session_id = %core.id, "Heartbeat requested by server");
        core.send_heartbeat(now)
    }

    pub(crate) fn handle_ack(core: &mut SessionCore, now: Instant) {
        core.waiting_for_ack = false;
        core.last_heartbeat_ack_time = Some(now);
        tracing::trace!(
            session_id = %core.id,
            latency_ms = core.latency().map(|l| l.as_millis()),
            "Heartbeat acknowledged"
        );
    }
}
