//! Gateway payload fixtures

use serde_json::{json, Value};

pub const TEST_TOKEN: &str = "secret";
pub const TEST_SESSION_ID: &str = "abc";

/// Hello frame with the given heartbeat interval
pub fn hello(heartbeat_interval_ms: u64) -> String {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval_ms}}).to_string()
}

/// READY dispatch with sequence 1
pub fn ready() -> String {
    json!({"op": 0, "t": "READY", "s": 1, "d": {"session_id": TEST_SESSION_ID}}).to_string()
}

pub fn resumed(seq: u64) -> String {
    json!({"op": 0, "t": "RESUMED", "s": seq, "d": null}).to_string()
}

/// Named dispatch with a sequence number
pub fn dispatch(name: &str, seq: u64, data: Value) -> String {
    json!({"op": 0, "t": name, "s": seq, "d": data}).to_string()
}

pub fn heartbeat_ack() -> String {
    json!({"op": 11}).to_string()
}

pub fn invalid_session(resumable: bool) -> String {
    json!({"op": 9, "d": resumable}).to_string()
}

pub fn reconnect() -> String {
    json!({"op": 7, "d": null}).to_string()
}
