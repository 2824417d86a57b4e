//! Transport-level WebSocket configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket transport options
///
/// Controls the outbound queue bound, ping/pong keepalive, low-level
/// reconnection and read budgets of a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketConfig {
    /// Maximum number of messages waiting in the outbound queue
    pub max_queue_size: usize,
    /// Interval between keepalive pings in milliseconds (0 disables keepalive)
    pub ping_interval_ms: u64,
    /// How long to wait for a pong before the connection is considered dead.
    /// `None` means twice the ping interval.
    pub pong_timeout_ms: Option<u64>,
    /// Reconnect automatically when the connection drops
    pub auto_reconnect: bool,
    /// Maximum reconnection attempts (0 = unlimited)
    pub max_reconnect_attempts: u32,
    /// Delay between reconnection attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Size of a single non-blocking read
    pub read_chunk_size: usize,
    /// Maximum number of reads performed for one connection per poll
    pub max_reads_per_poll: usize,
    /// Maximum size of a reassembled message in bytes
    pub max_message_size: usize,
}

impl WebSocketConfig {
    /// Default outbound queue bound
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
    /// Default keepalive interval (30 seconds)
    pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
    /// Default delay between reconnection attempts (5 seconds)
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
    /// Default maximum message size (16 MiB)
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// Keepalive ping interval, or `None` when keepalive is disabled
    #[must_use]
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    /// Time allowed between a ping and its pong
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(
            self.pong_timeout_ms
                .unwrap_or_else(|| self.ping_interval_ms.saturating_mul(2)),
        )
    }

    /// Delay between reconnection attempts
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Disable keepalive pings
    #[must_use]
    pub fn without_keepalive(mut self) -> Self {
        self.ping_interval_ms = 0;
        self
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_queue_size: Self::DEFAULT_MAX_QUEUE_SIZE,
            ping_interval_ms: Self::DEFAULT_PING_INTERVAL_MS,
            pong_timeout_ms: None,
            auto_reconnect: false,
            max_reconnect_attempts: 0,
            reconnect_delay_ms: Self::DEFAULT_RECONNECT_DELAY_MS,
            read_chunk_size: 4096,
            max_reads_per_poll: 10,
            max_message_size: Self::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
