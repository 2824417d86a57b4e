//! Transport plumbing for sessions
//!
//! Sessions never read from their socket directly. The connection registry
//! polls it and the connection's handlers forward what happened into the
//! session's inbox, tagged with the connection id so events from a replaced
//! connection can be told apart. The session drains the inbox on its own
//! tick.

use std::fmt;
use std::sync::Arc;

use gatelink_common::WebSocketConfig;
use gatelink_ws::{
    CloseFrame, ConnectionRegistry, Connector, Message, TcpConnector, WsConnection, WsResult,
};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// What a session's connection reported during a poll
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Open,
    Text(String),
    /// Binary payload of the given length
    Binary(usize),
    Close(CloseFrame),
    Error(String),
}

#[derive(Debug)]
pub(crate) struct Inbound {
    pub(crate) connection_id: Uuid,
    pub(crate) event: TransportEvent,
}

/// How sessions open and register their connections
#[derive(Clone)]
pub struct Transport {
    connections: ConnectionRegistry,
    config: WebSocketConfig,
    connector: Arc<dyn Connector>,
}

impl Transport {
    /// Plain TCP / rustls connections registered in `connections`
    #[must_use]
    pub fn new(connections: ConnectionRegistry, config: WebSocketConfig) -> Self {
        Self::with_connector(connections, config, Arc::new(TcpConnector::new()))
    }

    #[must_use]
    pub fn with_connector(
        connections: ConnectionRegistry,
        config: WebSocketConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            connections,
            config,
            connector,
        }
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Connect, register and wire a connection to `inbox`
    ///
    /// Transport-level reconnection is turned off: the session decides when
    /// and how to reconnect.
    pub(crate) fn open(&self, url: &str, inbox: &UnboundedSender<Inbound>) -> WsResult<WsConnection> {
        let mut config = self.config.clone();
        config.auto_reconnect = false;
        let conn = self
            .connections
            .connect_with(url, config, Arc::clone(&self.connector))?;
        forward_events(&conn, inbox);
        Ok(conn)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("connections", &self.connections)
            .field("config", &self.config)
            .finish()
    }
}

fn forward_events(conn: &WsConnection, inbox: &UnboundedSender<Inbound>) {
    let connection_id = conn.id();
    let send = {
        let inbox = inbox.clone();
        move |event: TransportEvent| {
            // The receiver only goes away with the session itself
            let _ = inbox.send(Inbound {
                connection_id,
                event,
            });
        }
    };

    let tx = send.clone();
    conn.on_open(move |_: &()| tx(TransportEvent::Open));

    let tx = send.clone();
    conn.on_message(move |message: &Message| match message {
        Message::Text(text) => tx(TransportEvent::Text(text.clone())),
        Message::Binary(data) => tx(TransportEvent::Binary(data.len())),
    });

    let tx = send.clone();
    conn.on_close(move |frame: &CloseFrame| tx(TransportEvent::Close(frame.clone())));

    conn.on_error(move |err: &gatelink_ws::WsError| send(TransportEvent::Error(err.to_string())));
}
