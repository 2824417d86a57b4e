//! Session lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway session state
///
/// `Disconnected` is the initial state. Neither it nor `Error` is terminal:
/// both are left again by an explicit `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport
    #[default]
    Disconnected,
    /// Transport opened, waiting for it to report open
    Connecting,
    /// Transport open, waiting for Hello
    Connected,
    /// Identify sent, waiting for READY
    Authenticating,
    /// Session established
    Ready,
    /// Waiting for the reconnect delay to pass
    Reconnecting,
    /// Resume sent, waiting for RESUMED
    Resuming,
    /// Failed; see the last `on_error`
    Error,
}

impl SessionState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Resuming => "resuming",
            Self::Error => "error",
        }
    }

    /// Whether the session still needs ticking to make progress
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether a transport handshake has completed
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Authenticating | Self::Ready | Self::Resuming
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
