//! Hello handler (op 10)

use std::time::{Duration, Instant};

use crate::error::GatewayResult;
use crate::protocol::GatewayMessage;
use crate::session::{SessionCore, SessionState};

/// Handles Hello messages
pub(crate) struct HelloHandler;

impl HelloHandler {
    /// Adopt the server's heartbeat interval and authenticate
    ///
    /// Resumes when the connection was opened by a resumable reconnect and
    /// a session id is stored; otherwise identifies if a token is configured.
    pub(crate) fn handle(core: &mut SessionCore, message: &GatewayMessage, now: Instant) -> GatewayResult<()> {
        match message.as_hello() {
            Some(hello) => {
                core.heartbeat_interval = Duration::from_millis(hello.heartbeat_interval);
                tracing::debug!(
                    session_id = %core.id,
                    heartbeat_interval_ms = hello.heartbeat_interval,
                    "Hello received"
                );
            }
            None => {
                tracing::warn!(session_id = %core.id, "Hello without a heartbeat interval, keeping configured value");
            }
        }
        // A Hello outside the handshake leaves heartbeat bookkeeping alone
        if !matches!(core.state, SessionState::Connecting | SessionState::Connected) {
            tracing::debug!(session_id = %core.id, state = %core.state, "Ignoring Hello outside the handshake");
            return Ok(());
        }
        core.last_heartbeat_time = Some(now);
        core.waiting_for_ack = false;
        core.set_state(SessionState::Connected);

        let resume = std::mem::take(&mut core.resume_pending)
            && core.config.resume_on_reconnect
            && core.session_id.is_some();
        if resume {
            core.send_resume()
        } else {
            core.send_identify().map(|_| ())
        }
    }
}
