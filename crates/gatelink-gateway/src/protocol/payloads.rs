//! Payload definitions
//!
//! Only the payloads the session itself needs to build or inspect are typed
//! here. Event payloads are passed to handlers as raw JSON values.

use gatelink_common::ClientProperties;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,

    pub properties: ClientProperties,

    /// Always an integer on the wire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intents: Option<u64>,
}

impl IdentifyPayload {
    #[must_use]
    pub fn new(token: impl Into<String>, properties: ClientProperties) -> Self {
        Self {
            token: token.into(),
            properties,
            intents: None,
        }
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Option<u64>) -> Self {
        self.intents = intents;
        self
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}

/// The parts of the `READY` dispatch the session keeps
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadyPayload {
    pub session_id: Option<String>,
    /// Endpoint to use when resuming this session
    pub resume_gateway_url: Option<String>,
}
