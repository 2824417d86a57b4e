//! Gateway sessions over a real TCP socket
//!
//! Run with: cargo test -p integration-tests --test loopback_tests

use std::time::Duration;

use gatelink_common::{GatewayConfig, WebSocketConfig};
use gatelink_gateway::{Runtime, SessionState};
use integration_tests::{fixtures::*, tick_until, wait_for_state, LoopbackGateway, Reply};
use serde_json::Value;

fn op(payload: &Value) -> u64 {
    payload["op"].as_u64().unwrap_or(u64::MAX)
}

#[test]
fn test_identify_and_ready_over_tcp() {
    let gateway = LoopbackGateway::start(hello(45_000), |payload| match op(payload) {
        2 => Reply::Text(ready()),
        _ => Reply::Nothing,
    })
    .unwrap();

    let runtime = Runtime::new(WebSocketConfig::default().without_keepalive());
    let session = runtime
        .create_session(GatewayConfig::new(gateway.url()).with_token(TEST_TOKEN).with_intents(1))
        .unwrap();
    session.connect().unwrap();

    assert!(wait_for_state(&runtime, &session, SessionState::Ready));
    assert_eq!(session.session_id().as_deref(), Some(TEST_SESSION_ID));

    let received = gateway.received();
    assert_eq!(op(&received[0]), 2);
    assert_eq!(received[0]["d"]["token"], TEST_TOKEN);
    assert_eq!(received[0]["d"]["intents"], 1);

    runtime.remove_session(&session);
}

#[test]
fn test_heartbeat_round_trip_over_tcp() {
    let gateway = LoopbackGateway::start(hello(50), |payload| match op(payload) {
        1 => Reply::Text(heartbeat_ack()),
        2 => Reply::Text(ready()),
        _ => Reply::Nothing,
    })
    .unwrap();

    let runtime = Runtime::new(WebSocketConfig::default().without_keepalive());
    let session = runtime
        .create_session(GatewayConfig::new(gateway.url()).with_token(TEST_TOKEN))
        .unwrap();
    session.connect().unwrap();
    assert!(wait_for_state(&runtime, &session, SessionState::Ready));

    let acked = tick_until(&runtime, Duration::from_secs(5), || {
        session.latency().is_some() && !session.waiting_for_ack()
    });
    assert!(acked);

    let heartbeat = gateway
        .received()
        .into_iter()
        .find(|payload| op(payload) == 1)
        .unwrap();
    assert_eq!(heartbeat["d"], 1);
    assert_eq!(session.state(), SessionState::Ready);

    runtime.remove_session(&session);
}

#[test]
fn test_rejected_token_closes_session() {
    let gateway = LoopbackGateway::start(hello(45_000), |payload| match op(payload) {
        2 => Reply::Close(4004, "Authentication failed"),
        _ => Reply::Nothing,
    })
    .unwrap();

    let runtime = Runtime::new(WebSocketConfig::default().without_keepalive());
    let session = runtime
        .create_session(GatewayConfig::new(gateway.url()).with_token("wrong"))
        .unwrap();
    let closed = std::sync::Arc::new(parking_lot::Mutex::new(None));
    let sink = std::sync::Arc::clone(&closed);
    session.on_close(move |frame| *sink.lock() = Some(frame.code));
    session.connect().unwrap();

    assert!(wait_for_state(&runtime, &session, SessionState::Disconnected));
    assert_eq!(*closed.lock(), Some(4004));
    assert!(!runtime.has_active_sessions());
}
