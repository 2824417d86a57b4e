//! Gateway session
//!
//! One session wraps one WebSocket connection and runs the gateway
//! handshake, heartbeat liveness, sequence tracking and reconnection on top
//! of it.

mod events;
mod machine;
mod session;
mod state;
mod transport;

pub use events::GatewayEvent;
pub use session::GatewaySession;
pub use state::SessionState;
pub use transport::Transport;

pub(crate) use events::SessionEvent;
pub(crate) use machine::SessionCore;
pub(crate) use session::Shared;
