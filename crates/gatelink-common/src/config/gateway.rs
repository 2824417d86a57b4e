//! Gateway session configuration
//!
//! The field names follow the camelCase options object accepted by the
//! session constructor, so a host can hand over `{"heartbeatInterval": ...}`
//! verbatim. Numeric options tolerate JSON floats and are truncated.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::ConfigError;

/// Client identification properties sent with Identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "gatelink".to_string(),
            device: "gatelink".to_string(),
        }
    }
}

/// Gateway session options
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Gateway endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Authentication token; Identify is only sent when present
    pub token: Option<String>,
    /// Heartbeat interval until the server's Hello overrides it
    #[serde(rename = "heartbeatInterval", deserialize_with = "lenient_u64")]
    pub heartbeat_interval_ms: u64,
    /// Maximum wait for a HeartbeatAck before the connection is considered dead
    #[serde(rename = "heartbeatTimeout", deserialize_with = "lenient_u64")]
    pub heartbeat_timeout_ms: u64,
    #[serde(rename = "reconnectDelay", deserialize_with = "lenient_u64")]
    pub reconnect_delay_ms: u64,
    #[serde(deserialize_with = "lenient_u32")]
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
    pub resume_on_reconnect: bool,
    /// Gateway protocol version
    #[serde(deserialize_with = "lenient_u32")]
    pub version: u32,
    /// Payload encoding; only `json` is supported
    pub encoding: String,
    /// Request transport compression (accepted but not negotiated)
    pub compression: bool,
    /// Declared capability flags
    #[serde(deserialize_with = "lenient_intents")]
    pub intents: Option<u64>,
    /// Identify `properties` override
    pub properties: ClientProperties,
}

impl GatewayConfig {
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;
    pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 60_000;
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
    pub const DEFAULT_VERSION: u32 = 10;
    pub const DEFAULT_ENCODING: &'static str = "json";

    /// Create a configuration for the given endpoint with default options
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the authentication token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the declared intents
    #[must_use]
    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = Some(intents);
        self
    }

    /// Parse an options object as supplied by a host
    ///
    /// # Errors
    /// Returns an error if a key carries a value of the wrong shape
    pub fn from_options(url: impl Into<String>, options: &Value) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_value(options.clone())
            .map_err(|e| ConfigError::InvalidValue("gateway options", e.to_string()))?;
        config.url = url.into();
        Ok(config)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Endpoint with the protocol version and encoding appended
    ///
    /// A URL that already carries a query string is returned unchanged.
    #[must_use]
    pub fn connect_url(&self) -> String {
        if self.url.contains('?') {
            self.url.clone()
        } else {
            format!("{}?v={}&encoding={}", self.url, self.version, self.encoding)
        }
    }

    /// Validate option values
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the offending option
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheme = self
            .url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        if !matches!(scheme.as_deref(), Some("ws" | "wss")) {
            return Err(ConfigError::InvalidValue(
                "url",
                format!("expected a ws:// or wss:// URL, got {:?}", self.url),
            ));
        }
        if self.encoding != Self::DEFAULT_ENCODING {
            return Err(ConfigError::InvalidValue(
                "encoding",
                format!("unsupported encoding {:?}", self.encoding),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "heartbeatInterval",
                "must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "heartbeatTimeout",
                "must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            heartbeat_interval_ms: Self::DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: Self::DEFAULT_HEARTBEAT_TIMEOUT_MS,
            reconnect_delay_ms: Self::DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_attempts: Self::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            resume_on_reconnect: true,
            version: Self::DEFAULT_VERSION,
            encoding: Self::DEFAULT_ENCODING.to_string(),
            compression: false,
            intents: None,
            properties: ClientProperties::default(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("heartbeat_timeout_ms", &self.heartbeat_timeout_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("resume_on_reconnect", &self.resume_on_reconnect)
            .field("version", &self.version)
            .field("encoding", &self.encoding)
            .field("compression", &self.compression)
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Options a live session accepts through `set_config`
///
/// Every key is optional; an absent key leaves the current value in place.
/// Keys outside this set are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfigUpdate {
    #[serde(rename = "heartbeatInterval", default, deserialize_with = "lenient_opt_u64")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(rename = "heartbeatTimeout", default, deserialize_with = "lenient_opt_u64")]
    pub heartbeat_timeout_ms: Option<u64>,
    #[serde(rename = "reconnectDelay", default, deserialize_with = "lenient_opt_u64")]
    pub reconnect_delay_ms: Option<u64>,
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default)]
    pub auto_reconnect: Option<bool>,
}

impl GatewayConfigUpdate {
    /// Parse a partial options object
    ///
    /// # Errors
    /// Returns an error if a key carries a value of the wrong shape
    pub fn from_options(options: &Value) -> Result<Self, ConfigError> {
        serde_json::from_value(options.clone())
            .map_err(|e| ConfigError::InvalidValue("gateway options", e.to_string()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl GatewayConfig {
    /// Copy of this config with `update` applied, validated
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if the result does not validate
    pub fn updated(&self, update: &GatewayConfigUpdate) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        if let Some(ms) = update.heartbeat_interval_ms {
            next.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = update.heartbeat_timeout_ms {
            next.heartbeat_timeout_ms = ms;
        }
        if let Some(ms) = update.reconnect_delay_ms {
            next.reconnect_delay_ms = ms;
        }
        if let Some(attempts) = update.max_reconnect_attempts {
            next.max_reconnect_attempts = attempts;
        }
        if let Some(enabled) = update.auto_reconnect {
            next.auto_reconnect = enabled;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Coerce a capability-flags value to an integer
///
/// Accepts a number (fractional part truncated), a numeric string, or an
/// object carrying a numeric `value` field. Negative and non-finite values
/// are rejected.
#[must_use]
pub fn coerce_intents(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(truncate_to_u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_to_u64))
        }
        Value::Object(map) => map.get("value").filter(|v| v.is_number()).and_then(coerce_intents),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate_to_u64(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value < u64::MAX as f64).then(|| value.trunc() as u64)
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(truncate_to_u64)),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative number, got {value}")))
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_u64(deserializer)?;
    u32::try_from(value).map_err(|_| serde::de::Error::custom(format!("{value} is out of range")))
}

fn lenient_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_u64(deserializer).map(Some)
}

fn lenient_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_u32(deserializer).map(Some)
}

fn lenient_intents<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    coerce_intents(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid intents value {value}")))
}
