//! Gateway session scenarios against in-memory peers
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use gatelink_common::GatewayConfig;
use gatelink_gateway::{GatewayError, OpCode, SessionState};
use integration_tests::{fixtures::*, sent_ops, sent_payloads, test_config, Harness, Observed};
use serde_json::json;

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_full_handshake_reports_ready_then_event() {
    let harness = Harness::new();
    let (session, log) = harness.session(test_config().with_intents(513)).unwrap();

    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(45_000));
    harness.tick();

    let identify = sent_payloads(&peer);
    assert_eq!(identify.len(), 1);
    assert_eq!(identify[0]["op"], 2);
    assert_eq!(identify[0]["d"]["token"], TEST_TOKEN);
    assert_eq!(identify[0]["d"]["intents"], 513);

    peer.push_text(&ready());
    harness.tick();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.session_id().as_deref(), Some(TEST_SESSION_ID));
    assert_eq!(session.sequence(), 1);

    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], Observed::Ready(json!({"session_id": TEST_SESSION_ID})));
    match &log[1] {
        Observed::Event(event) => {
            assert_eq!(event.name, "READY");
            assert_eq!(event.sequence, Some(1));
        }
        other => panic!("expected READY dispatch, got {other:?}"),
    }
}

#[test]
fn test_options_object_configures_session() {
    let harness = Harness::new();
    let config = GatewayConfig::from_options(
        "ws://gateway.test/",
        &json!({
            "token": TEST_TOKEN,
            "intents": "513",
            "heartbeatTimeout": 5000,
            "reconnectDelay": 250,
        }),
    )
    .unwrap();
    let (session, _log) = harness.session(config).unwrap();

    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(45_000));
    harness.tick();

    let identify = sent_payloads(&peer);
    assert_eq!(identify[0]["d"]["intents"], 513);
    assert!(identify[0]["d"]["intents"].is_u64());
    assert_eq!(session.state(), SessionState::Authenticating);
}

#[test]
fn test_dispatch_stream_reaches_handler_in_order() {
    let mut harness = Harness::new();
    let (session, log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(45_000));
    peer.push_text(&ready());
    harness.tick();

    peer.push_text(&dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"})));
    peer.push_text(&dispatch("TYPING_START", 3, json!({})));
    peer.push_text(&dispatch("MESSAGE_DELETE", 3, json!({"id": "1"})));
    harness.advance(Duration::from_millis(10));

    let names: Vec<String> = log
        .lock()
        .iter()
        .filter_map(|o| match o {
            Observed::Event(event) => Some(event.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(names, ["READY", "MESSAGE_CREATE", "TYPING_START", "MESSAGE_DELETE"]);
    assert_eq!(session.sequence(), 3);
}

// ============================================================================
// Liveness
// ============================================================================

#[test]
fn test_acked_heartbeats_keep_session_alive() {
    let mut harness = Harness::new();
    let (session, log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(1_000));
    peer.push_text(&ready());
    harness.tick();
    let _ = sent_payloads(&peer);

    for _ in 0..5 {
        harness.advance(Duration::from_millis(1_000));
        assert_eq!(sent_ops(&peer), [1]);
        peer.push_text(&heartbeat_ack());
        harness.advance(Duration::from_millis(50));
        assert!(!session.waiting_for_ack());
    }

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.latency(), Some(Duration::from_millis(50)));
    assert!(!log.lock().iter().any(|o| matches!(o, Observed::Error(_))));
}

#[test]
fn test_zombie_connection_is_resumed() {
    let mut harness = Harness::new();
    let mut config = test_config();
    config.heartbeat_timeout_ms = 3_000;
    let (session, log) = harness.session(config).unwrap();
    session.connect().unwrap();
    let first = harness.peer().unwrap();
    first.push_text(&hello(1_000));
    first.push_text(&ready());
    harness.tick();

    // Heartbeat goes out but is never acknowledged
    harness.advance(Duration::from_millis(1_000));
    harness.advance(Duration::from_millis(3_001));
    assert_eq!(session.state(), SessionState::Reconnecting);
    assert!(first.is_shutdown());
    assert!(log
        .lock()
        .contains(&Observed::Error(GatewayError::HeartbeatTimeout.to_string())));

    harness.advance(Duration::from_millis(1_000));
    let second = harness.peer().unwrap();
    second.push_text(&hello(1_000));
    harness.advance(Duration::from_millis(1));
    assert_eq!(
        sent_payloads(&second),
        [json!({"op": 6, "d": {"token": TEST_TOKEN, "session_id": TEST_SESSION_ID, "seq": 1}})]
    );

    second.push_text(&resumed(4));
    harness.advance(Duration::from_millis(1));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.sequence(), 4);
    assert_eq!(harness.connector.connect_count(), 2);
}

// ============================================================================
// Server-driven session changes
// ============================================================================

#[test]
fn test_invalid_session_then_fresh_identify_then_ready() {
    let mut harness = Harness::new();
    let (session, log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(45_000));
    peer.push_text(&ready());
    harness.tick();
    let _ = sent_payloads(&peer);

    peer.push_text(&invalid_session(false));
    harness.advance(Duration::from_millis(1));
    assert_eq!(session.state(), SessionState::Error);
    assert!(!session.can_resume());

    harness.advance(Duration::from_millis(1_000));
    assert_eq!(sent_ops(&peer), [2]);

    peer.push_text(&json!({"op": 0, "t": "READY", "s": 1, "d": {"session_id": "def"}}).to_string());
    harness.advance(Duration::from_millis(1));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.session_id().as_deref(), Some("def"));

    let readies = log.lock().iter().filter(|o| matches!(o, Observed::Ready(_))).count();
    assert_eq!(readies, 2);
}

#[test]
fn test_server_requested_reconnect_identifies_on_new_connection() {
    let mut harness = Harness::new();
    let (session, _log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let first = harness.peer().unwrap();
    first.push_text(&hello(45_000));
    first.push_text(&ready());
    harness.tick();

    first.push_text(&reconnect());
    harness.advance(Duration::from_millis(1));
    assert_eq!(session.state(), SessionState::Reconnecting);

    harness.advance(Duration::from_millis(1_000));
    let second = harness.peer().unwrap();
    second.push_text(&hello(45_000));
    harness.advance(Duration::from_millis(1));
    assert_eq!(sent_ops(&second), [2]);
}

#[test]
fn test_authentication_failure_stops_session() {
    let mut harness = Harness::new();
    let (session, log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(45_000));
    harness.tick();
    peer.push_frame(&gatelink_ws::Frame::close(&gatelink_ws::CloseFrame::new(
        4004,
        "Authentication failed",
    )));
    harness.advance(Duration::from_millis(1));

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(log.lock().contains(&Observed::Close(4004)));
    assert!(!harness.runtime.has_active_sessions());

    harness.advance(Duration::from_secs(30));
    assert_eq!(harness.connector.connect_count(), 1);
}

// ============================================================================
// Host operations
// ============================================================================

#[test]
fn test_presence_update_sent_while_ready() {
    let harness = Harness::new();
    let (session, _log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let peer = harness.peer().unwrap();
    peer.push_text(&hello(45_000));
    peer.push_text(&ready());
    harness.tick();
    let _ = sent_payloads(&peer);

    let presence = json!({"since": null, "activities": [], "status": "dnd", "afk": false});
    session.send(OpCode::StatusUpdate, presence.clone()).unwrap();
    harness.tick();

    assert_eq!(sent_payloads(&peer), [json!({"op": 3, "d": presence})]);
}

#[test]
fn test_sessions_in_one_runtime_are_isolated() {
    let mut harness = Harness::new();
    let (alpha, alpha_log) = harness.session(test_config()).unwrap();
    let (beta, beta_log) = harness.session(GatewayConfig::new("ws://other.test/")).unwrap();

    alpha.connect().unwrap();
    let alpha_peer = harness.peer().unwrap();
    beta.connect().unwrap();
    let beta_peer = harness.peer().unwrap();

    alpha_peer.push_text(&hello(45_000));
    alpha_peer.push_text(&ready());
    beta_peer.push_text(&hello(45_000));
    harness.advance(Duration::from_millis(1));

    assert_eq!(alpha.state(), SessionState::Ready);
    assert_eq!(beta.state(), SessionState::Connected);
    assert!(sent_payloads(&beta_peer).is_empty());
    assert_eq!(alpha_log.lock().len(), 2);
    assert!(beta_log.lock().is_empty());

    beta_peer.disconnect();
    harness.advance(Duration::from_millis(1));
    assert_eq!(beta.state(), SessionState::Reconnecting);
    assert_eq!(alpha.state(), SessionState::Ready);
}

#[test]
fn test_disconnect_then_connect_starts_over() {
    let harness = Harness::new();
    let (session, log) = harness.session(test_config()).unwrap();
    session.connect().unwrap();
    let first = harness.peer().unwrap();
    first.push_text(&hello(45_000));
    first.push_text(&ready());
    harness.tick();

    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(first.is_shutdown());

    session.connect().unwrap();
    let second = harness.peer().unwrap();
    second.push_text(&hello(45_000));
    harness.tick();
    assert_eq!(sent_ops(&second), [2]);
    assert_eq!(
        log.lock().iter().filter(|o| matches!(o, Observed::Close(_))).count(),
        0
    );
}
