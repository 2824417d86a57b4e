//! # gatelink-gateway
//!
//! Gateway session protocol on top of `gatelink-ws`.
//!
//! A [`GatewaySession`] runs the hello/identify/resume handshake, heartbeats
//! with acknowledgement checking, sequence tracking and reconnection, and
//! hands dispatched events to host handlers. A [`Runtime`] drives every
//! connection and session once per tick.

pub mod error;
mod handlers;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod session;

pub use error::{GatewayError, GatewayResult};
pub use protocol::{GatewayCloseCode, GatewayIntents, GatewayMessage, OpCode};
pub use registry::GatewayRegistry;
pub use runtime::{Runtime, TickReport};
pub use session::{GatewayEvent, GatewaySession, SessionState, Transport};
