//! Application configuration structs
//!
//! Loads configuration from environment variables (with `.env` support).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::{GatewayConfig, WebSocketConfig};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub websocket: WebSocketConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
    /// How often the host loop drives the runtime
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl AppSettings {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "gatelink".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or
    /// a value cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Errors
    /// Same as [`AppConfig::from_env`]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway_defaults = GatewayConfig::default();
        let ws_defaults = WebSocketConfig::default();

        let app = AppSettings {
            name: lookup("APP_NAME").unwrap_or_else(default_app_name),
            env: lookup("APP_ENV")
                .and_then(|s| Environment::parse(&s))
                .unwrap_or_default(),
            tick_interval_ms: parse_var(&lookup, "TICK_INTERVAL_MS")?
                .unwrap_or_else(default_tick_interval_ms),
        };

        let intents = match lookup("GATEWAY_INTENTS") {
            Some(raw) => Some(
                super::gateway::coerce_intents(&serde_json::Value::String(raw.clone()))
                    .ok_or(ConfigError::InvalidValue("GATEWAY_INTENTS", raw))?,
            ),
            None => None,
        };

        let gateway = GatewayConfig {
            url: lookup("GATEWAY_URL").ok_or(ConfigError::MissingVar("GATEWAY_URL"))?,
            token: lookup("GATEWAY_TOKEN").filter(|t| !t.is_empty()),
            intents,
            version: parse_var(&lookup, "GATEWAY_VERSION")?.unwrap_or(gateway_defaults.version),
            heartbeat_timeout_ms: parse_var(&lookup, "GATEWAY_HEARTBEAT_TIMEOUT_MS")?
                .unwrap_or(gateway_defaults.heartbeat_timeout_ms),
            reconnect_delay_ms: parse_var(&lookup, "GATEWAY_RECONNECT_DELAY_MS")?
                .unwrap_or(gateway_defaults.reconnect_delay_ms),
            max_reconnect_attempts: parse_var(&lookup, "GATEWAY_MAX_RECONNECT_ATTEMPTS")?
                .unwrap_or(gateway_defaults.max_reconnect_attempts),
            auto_reconnect: parse_var(&lookup, "GATEWAY_AUTO_RECONNECT")?
                .unwrap_or(gateway_defaults.auto_reconnect),
            resume_on_reconnect: parse_var(&lookup, "GATEWAY_RESUME_ON_RECONNECT")?
                .unwrap_or(gateway_defaults.resume_on_reconnect),
            ..gateway_defaults
        };
        gateway.validate()?;

        let websocket = WebSocketConfig {
            ping_interval_ms: parse_var(&lookup, "WS_PING_INTERVAL_MS")?
                .unwrap_or(ws_defaults.ping_interval_ms),
            max_queue_size: parse_var(&lookup, "WS_MAX_QUEUE_SIZE")?
                .unwrap_or(ws_defaults.max_queue_size),
            ..ws_defaults
        };

        Ok(Self {
            app,
            gateway,
            websocket,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key, raw.clone()))
        })
        .transpose()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
