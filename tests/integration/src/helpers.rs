//! Test helpers for integration tests
//!
//! [`Harness`] drives a runtime whose sessions connect to in-memory peers
//! on a simulated clock. [`LoopbackGateway`] serves one gateway client over
//! a real TCP socket from a background thread.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use gatelink_common::{GatewayConfig, WebSocketConfig};
use gatelink_gateway::{GatewayError, GatewayEvent, GatewaySession, Runtime, SessionState};
use gatelink_ws::testing::{MemoryConnector, MemoryPeer};
use gatelink_ws::{Message, WsConnection};
use parking_lot::Mutex;
use serde_json::Value;

use crate::fixtures::TEST_TOKEN;

/// Session options used by most tests
pub fn test_config() -> GatewayConfig {
    GatewayConfig::new("ws://gateway.test/").with_token(TEST_TOKEN)
}

/// Everything a session reported through its handlers, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Ready(Value),
    Event(GatewayEvent),
    Error(String),
    Close(u16),
}

/// Runtime over in-memory peers with a manually advanced clock
pub struct Harness {
    pub runtime: Runtime,
    pub connector: Arc<MemoryConnector>,
    pub now: Instant,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let connector = MemoryConnector::new();
        let runtime = Runtime::with_connector(
            WebSocketConfig::default().without_keepalive(),
            connector.clone(),
        );
        Self {
            runtime,
            connector,
            now: Instant::now(),
        }
    }

    /// Create a session whose handler output is recorded
    pub fn session(&self, config: GatewayConfig) -> Result<(GatewaySession, Arc<Mutex<Vec<Observed>>>)> {
        let session = self.runtime.create_session(config)?;
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&log);
        session.on_ready(move |data| sink.lock().push(Observed::Ready(data.clone())));
        let sink = Arc::clone(&log);
        session.on_event(move |event| sink.lock().push(Observed::Event(event.clone())));
        let sink = Arc::clone(&log);
        session.on_error(move |err: &GatewayError| sink.lock().push(Observed::Error(err.to_string())));
        let sink = Arc::clone(&log);
        session.on_close(move |frame| sink.lock().push(Observed::Close(frame.code)));

        Ok((session, log))
    }

    /// Advance the clock and tick the runtime
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.runtime.tick(self.now);
    }

    pub fn tick(&self) {
        self.runtime.tick(self.now);
    }

    /// Most recently opened peer
    pub fn peer(&self) -> Result<MemoryPeer> {
        self.connector.last_peer().ok_or_else(|| anyhow!("no connection was opened"))
    }
}

/// Decode every gateway payload the client wrote to `peer`
pub fn sent_payloads(peer: &MemoryPeer) -> Vec<Value> {
    peer.received_texts()
        .iter()
        .filter_map(|text| serde_json::from_str(text).ok())
        .collect()
}

/// Op codes of every payload the client wrote to `peer`
pub fn sent_ops(peer: &MemoryPeer) -> Vec<u64> {
    sent_payloads(peer)
        .iter()
        .filter_map(|payload| payload["op"].as_u64())
        .collect()
}

/// Tick `runtime` in real time until `done` holds or `timeout` passes
pub fn tick_until<F>(runtime: &Runtime, timeout: Duration, done: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        runtime.tick(Instant::now());
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Wait until `session` reaches `state`
pub fn wait_for_state(runtime: &Runtime, session: &GatewaySession, state: SessionState) -> bool {
    tick_until(runtime, Duration::from_secs(5), || session.state() == state)
}

/// How the loopback gateway answers one client payload
pub enum Reply {
    Text(String),
    Close(u16, &'static str),
    Nothing,
}

/// Single-client gateway on 127.0.0.1 served from a background thread
///
/// Sends `hello` once the upgrade completes, then answers each client
/// payload through the responder until stopped or the client goes away.
pub struct LoopbackGateway {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LoopbackGateway {
    pub fn start<F>(hello: String, respond: F) -> Result<Self>
    where
        F: Fn(&Value) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let log = Arc::clone(&received);
        let stopped = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            if let Err(e) = serve(&listener, &hello, &respond, &log, &stopped) {
                eprintln!("loopback gateway stopped: {e}");
            }
        });

        Ok(Self {
            addr,
            received,
            stop,
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Payloads received from the client so far
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }
}

impl Drop for LoopbackGateway {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve<F>(
    listener: &TcpListener,
    hello: &str,
    respond: &F,
    log: &Mutex<Vec<Value>>,
    stop: &AtomicBool,
) -> Result<()>
where
    F: Fn(&Value) -> Reply,
{
    let (stream, _) = listener.accept()?;
    let conn = WsConnection::accept(Box::new(stream), WebSocketConfig::default().without_keepalive())?;

    let (tx, rx) = mpsc::channel::<String>();
    conn.on_message(move |message| {
        if let Message::Text(text) = message {
            let _ = tx.send(text.clone());
        }
    });
    conn.send_text(hello)?;

    while !stop.load(Ordering::SeqCst) && conn.is_open() {
        conn.poll(Instant::now());
        while let Ok(text) = rx.try_recv() {
            let payload: Value = serde_json::from_str(&text)?;
            let reply = respond(&payload);
            log.lock().push(payload);
            match reply {
                Reply::Text(text) => conn.send_text(text)?,
                Reply::Close(code, reason) => conn.close_with(code, reason),
                Reply::Nothing => {}
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
    Ok(())
}
