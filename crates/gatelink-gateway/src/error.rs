//! Gateway error types

use gatelink_common::ConfigError;
use gatelink_ws::WsError;
use thiserror::Error;

use crate::protocol::GatewayCloseCode;

/// Gateway error type
///
/// Errors reach the host through the session's `on_error` handler; only
/// `connect`, `send` and session creation return them directly.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] WsError),

    /// Payload could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Server rejected the session (op 9)
    #[error("Session invalidated by the server")]
    InvalidSession,

    /// No heartbeat ACK within the timeout
    #[error("Heartbeat not acknowledged in time")]
    HeartbeatTimeout,

    /// Gave up reconnecting
    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Connection closed by the peer or the transport
    #[error("Connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    /// Session has no transport
    #[error("Not connected")]
    NotConnected,

    /// Invalid session options
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GatewayError {
    /// Close code carried by this error, if any
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => Some(*code),
            Self::Transport(err) => Some(err.close_code()),
            _ => None,
        }
    }

    /// Gateway close code carried by this error, if any
    #[must_use]
    pub fn gateway_close_code(&self) -> Option<GatewayCloseCode> {
        self.close_code().and_then(GatewayCloseCode::from_u16)
    }

    /// Whether reconnecting may recover from this error
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::HeartbeatTimeout | Self::NotConnected => true,
            Self::Closed { code, .. } => {
                GatewayCloseCode::from_u16(*code).map_or(true, GatewayCloseCode::should_reconnect)
            }
            Self::Encode(_) | Self::InvalidSession | Self::ReconnectExhausted { .. } | Self::Config(_) => {
                false
            }
        }
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
