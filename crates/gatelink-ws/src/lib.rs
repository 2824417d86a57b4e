//! # gatelink-ws
//!
//! Non-blocking WebSocket client transport.
//!
//! Connections never own a thread. A host drives them by calling
//! [`ConnectionRegistry::poll_all`] (or [`WsConnection::poll`]) once per tick;
//! each poll performs bounded non-blocking reads, drains the outbound queue,
//! runs keepalive and reconnect bookkeeping, and then invokes the
//! connection's handlers with no internal lock held.

pub mod callback;
pub mod close;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod registry;
pub mod stream;
pub mod url;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use callback::Callback;
pub use close::{CloseCode, CloseFrame};
pub use connection::{Message, Role, WsConnection, WsEvent, WsState};
pub use error::{FrameError, HandshakeError, WsError, WsResult};
pub use frame::{Decoded, Frame, OpCode};
pub use registry::ConnectionRegistry;
pub use stream::{Connector, Stream, TcpConnector};
pub use url::WsUrl;

pub use gatelink_common::WebSocketConfig;
