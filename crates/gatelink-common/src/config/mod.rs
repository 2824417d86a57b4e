//! Configuration structs

mod app_config;
mod gateway;
mod websocket;

pub use app_config::{AppConfig, AppSettings, ConfigError, Environment};
pub use gateway::{ClientProperties, GatewayConfig, GatewayConfigUpdate};
pub use websocket::WebSocketConfig;
