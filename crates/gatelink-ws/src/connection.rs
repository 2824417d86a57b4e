//! WebSocket connection
//!
//! A [`WsConnection`] is a cheap, clonable handle to one socket. All work
//! happens inside [`WsConnection::poll`]: bounded non-blocking reads, frame
//! decoding and reassembly, automatic Pong and Close replies, outbound queue
//! draining, ping/pong keepalive and low-level reconnection. Handlers run at
//! the end of each poll after the internal lock has been released, so a
//! handler may freely call back into this or any other connection.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use gatelink_common::WebSocketConfig;

use crate::callback::Callback;
use crate::close::{CloseCode, CloseFrame};
use crate::error::{is_would_block, FrameError, WsError, WsResult};
use crate::frame::{self, Decoded, Frame, OpCode};
use crate::handshake;
use crate::stream::{Connector, Stream, TcpConnector};
use crate::url::WsUrl;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsState {
    /// Waiting for a scheduled reconnect
    Connecting,
    Open,
    Closing,
    Closed,
}

impl WsState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for WsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which end of the connection this is
///
/// Clients mask every frame they send and reject masked frames; servers do
/// the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A complete application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that happened during a poll
#[derive(Debug)]
pub enum WsEvent {
    Open,
    Message(Message),
    Close(CloseFrame),
    Error(WsError),
}

#[derive(Clone, Default)]
struct Handlers {
    on_open: Option<Callback<()>>,
    on_message: Option<Callback<Message>>,
    on_close: Option<Callback<CloseFrame>>,
    on_error: Option<Callback<WsError>>,
}

impl Handlers {
    fn dispatch(&self, events: Vec<WsEvent>) {
        for event in events {
            match event {
                WsEvent::Open => {
                    if let Some(cb) = &self.on_open {
                        cb.call(&());
                    }
                }
                WsEvent::Message(message) => {
                    if let Some(cb) = &self.on_message {
                        cb.call(&message);
                    }
                }
                WsEvent::Close(close) => {
                    if let Some(cb) = &self.on_close {
                        cb.call(&close);
                    }
                }
                WsEvent::Error(err) => {
                    if let Some(cb) = &self.on_error {
                        cb.call(&err);
                    }
                }
            }
        }
    }
}

/// Receive arena with an explicit consumed offset
#[derive(Default)]
struct RecvBuffer {
    data: Vec<u8>,
    consumed: usize,
}

impl RecvBuffer {
    fn pending(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    fn advance(&mut self, n: usize) {
        self.consumed += n;
    }

    fn compact(&mut self) {
        if self.consumed > 0 {
            self.data.drain(..self.consumed);
            self.consumed = 0;
        }
    }

    fn clear(&mut self) {
        self.data.clear();
        self.consumed = 0;
    }
}

/// An encoded frame waiting to be written
struct Outbound {
    bytes: Vec<u8>,
    written: usize,
    data: bool,
    pong: bool,
}

/// Partially received fragmented message
struct Fragments {
    binary: bool,
    payload: Vec<u8>,
}

struct Endpoint {
    url: WsUrl,
    connector: Arc<dyn Connector>,
}

pub(crate) struct Connection {
    id: Uuid,
    role: Role,
    state: WsState,
    config: WebSocketConfig,
    endpoint: Option<Endpoint>,
    stream: Option<Box<dyn Stream>>,
    secure: bool,
    nonblocking: bool,

    recv: RecvBuffer,
    scratch: Vec<u8>,
    fragments: Option<Fragments>,
    outbound: VecDeque<Outbound>,

    last_ping_time: Option<Instant>,
    last_pong_time: Option<Instant>,
    waiting_for_pong: bool,

    reconnect_attempts: u32,
    next_reconnect_at: Option<Instant>,
    last_reconnect_time: Option<Instant>,

    pending: Vec<WsEvent>,
    handlers: Handlers,
}

/// Open a stream and complete the client handshake on it
fn open_client_stream(endpoint: &Endpoint) -> WsResult<(Box<dyn Stream>, Vec<u8>)> {
    let mut stream = endpoint.connector.connect(&endpoint.url)?;
    let leftover = handshake::perform_client_handshake(stream.as_mut(), &endpoint.url)?;
    stream.set_nonblocking(true)?;
    Ok((stream, leftover))
}

impl Connection {
    fn new(role: Role, config: WebSocketConfig, stream: Box<dyn Stream>, leftover: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: WsState::Open,
            config,
            endpoint: None,
            secure: stream.is_secure(),
            stream: Some(stream),
            nonblocking: true,
            recv: RecvBuffer {
                data: leftover,
                consumed: 0,
            },
            scratch: Vec::new(),
            fragments: None,
            outbound: VecDeque::new(),
            last_ping_time: None,
            last_pong_time: None,
            waiting_for_pong: false,
            reconnect_attempts: 0,
            next_reconnect_at: None,
            last_reconnect_time: None,
            pending: vec![WsEvent::Open],
            handlers: Handlers::default(),
        }
    }

    fn data_queue_len(&self) -> usize {
        self.outbound.iter().filter(|o| o.data).count()
    }

    fn enqueue(&mut self, mut frame: Frame, data: bool) -> WsResult<()> {
        if self.role == Role::Client {
            frame = frame.with_random_mask();
        }
        let bytes = frame.to_bytes()?;
        let pong = frame.opcode == OpCode::Pong;
        tracing::trace!(
            connection_id = %self.id,
            opcode = %frame.opcode,
            len = frame.payload.len(),
            "Frame queued"
        );
        self.outbound.push_back(Outbound {
            bytes,
            written: 0,
            data,
            pong,
        });
        Ok(())
    }

    fn send_data(&mut self, payload: Vec<u8>, is_binary: bool) -> WsResult<()> {
        if matches!(self.state, WsState::Closing | WsState::Closed) {
            return Err(WsError::NotOpen);
        }
        if payload.len() > self.config.max_message_size {
            return Err(WsError::MessageTooLarge {
                limit: self.config.max_message_size,
            });
        }
        let frame = if is_binary {
            Frame::binary(payload)
        } else {
            let text = String::from_utf8(payload).map_err(|_| WsError::InvalidUtf8)?;
            Frame::text(text)
        };

        let capacity = self.config.max_queue_size;
        if self.data_queue_len() >= capacity {
            tracing::debug!(connection_id = %self.id, capacity, "Outbound queue full");
            return Err(WsError::QueueFull { capacity });
        }
        self.enqueue(frame, true)?;

        if self.state == WsState::Open {
            if let Err(err) = self.flush() {
                let close = CloseFrame::abnormal(err.to_string());
                let mut events = Vec::new();
                self.fail(Instant::now(), err, &mut events);
                self.pending.extend(events);
                return Err(WsError::Closed {
                    code: close.code,
                    reason: close.reason,
                });
            }
        }
        Ok(())
    }

    /// Write queued frames until the socket would block
    ///
    /// A partially written frame stays at the head of the queue with its
    /// offset so the tail goes out first on the next attempt.
    fn flush(&mut self) -> WsResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        while let Some(front) = self.outbound.front_mut() {
            match stream.write(&front.bytes[front.written..]) {
                Ok(0) => return Err(WsError::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    front.written += n;
                    if front.written == front.bytes.len() {
                        self.outbound.pop_front();
                    }
                }
                Err(e) if is_would_block(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        match stream.flush() {
            Err(e) if !is_would_block(&e) => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
        self.outbound.clear();
        self.recv.clear();
        self.fragments = None;
        self.waiting_for_pong = false;
        self.last_ping_time = None;
    }

    /// Send a close frame if possible, then drop the socket
    fn close_with(&mut self, close: &CloseFrame) {
        match self.state {
            WsState::Open => {
                self.state = WsState::Closing;
                self.outbound.retain(|o| o.written > 0);
                if self.enqueue(Frame::close(close), false).is_ok() {
                    let _ = self.flush();
                }
                self.teardown();
                self.state = WsState::Closed;
                tracing::debug!(connection_id = %self.id, code = close.code, "Connection closed locally");
            }
            WsState::Connecting => {
                self.next_reconnect_at = None;
                self.teardown();
                self.state = WsState::Closed;
            }
            WsState::Closing | WsState::Closed => {}
        }
    }

    /// End the connection after an I/O or liveness failure
    fn fail(&mut self, now: Instant, err: WsError, events: &mut Vec<WsEvent>) {
        let reason = err.to_string();
        tracing::debug!(connection_id = %self.id, error = %err, "Connection failed");
        self.teardown();
        events.push(WsEvent::Error(err));

        if self.config.auto_reconnect && self.endpoint.is_some() {
            self.schedule_reconnect(now, events);
        } else {
            self.state = WsState::Closed;
            events.push(WsEvent::Close(CloseFrame::abnormal(reason)));
        }
    }

    /// End the connection after the peer broke the protocol
    fn protocol_failure(&mut self, err: WsError, events: &mut Vec<WsEvent>) {
        let close = CloseFrame::new(err.close_code(), err.to_string());
        tracing::warn!(connection_id = %self.id, code = close.code, error = %err, "Protocol violation");
        self.state = WsState::Closing;
        self.outbound.clear();
        if self.enqueue(Frame::close(&close), false).is_ok() {
            let _ = self.flush();
        }
        self.teardown();
        self.state = WsState::Closed;
        events.push(WsEvent::Error(err));
        events.push(WsEvent::Close(close));
    }

    fn schedule_reconnect(&mut self, now: Instant, events: &mut Vec<WsEvent>) {
        let max = self.config.max_reconnect_attempts;
        if max != 0 && self.reconnect_attempts >= max {
            tracing::error!(
                connection_id = %self.id,
                attempts = self.reconnect_attempts,
                "Reconnection attempts exhausted"
            );
            self.state = WsState::Closed;
            self.next_reconnect_at = None;
            events.push(WsEvent::Error(WsError::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            }));
            events.push(WsEvent::Close(CloseFrame::abnormal("reconnect attempts exhausted")));
            return;
        }
        self.state = WsState::Connecting;
        self.next_reconnect_at = Some(now + self.config.reconnect_delay());
        tracing::debug!(
            connection_id = %self.id,
            attempt = self.reconnect_attempts + 1,
            delay_ms = self.config.reconnect_delay_ms,
            "Reconnect scheduled"
        );
    }

    fn try_reconnect(&mut self, now: Instant, events: &mut Vec<WsEvent>) {
        let Some(endpoint) = self.endpoint.as_ref() else {
            self.state = WsState::Closed;
            return;
        };
        self.reconnect_attempts += 1;
        self.last_reconnect_time = Some(now);
        self.next_reconnect_at = None;

        match open_client_stream(endpoint) {
            Ok((stream, leftover)) => {
                tracing::info!(
                    connection_id = %self.id,
                    attempt = self.reconnect_attempts,
                    url = %endpoint.url,
                    "Reconnected"
                );
                self.secure = stream.is_secure();
                self.stream = Some(stream);
                self.nonblocking = true;
                self.recv = RecvBuffer {
                    data: leftover,
                    consumed: 0,
                };
                self.state = WsState::Open;
                self.reconnect_attempts = 0;
                self.last_ping_time = Some(now);
                self.waiting_for_pong = false;
                events.push(WsEvent::Open);
            }
            Err(err) => {
                tracing::debug!(connection_id = %self.id, error = %err, "Reconnect attempt failed");
                events.push(WsEvent::Error(err));
                self.schedule_reconnect(now, events);
            }
        }
    }

    /// Read until the socket would block or the per-poll budget is spent
    ///
    /// Returns `Ok(true)` when the peer closed the stream.
    fn read_available(&mut self) -> WsResult<bool> {
        let chunk = self.config.read_chunk_size.max(1);
        if self.scratch.len() != chunk {
            self.scratch.resize(chunk, 0);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        for _ in 0..self.config.max_reads_per_poll.max(1) {
            match stream.read(&mut self.scratch) {
                Ok(0) => return Ok(true),
                Ok(n) => self.recv.data.extend_from_slice(&self.scratch[..n]),
                Err(e) if is_would_block(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Decode and handle every complete frame in the receive buffer
    fn process_frames(&mut self, now: Instant, events: &mut Vec<WsEvent>) {
        while self.state == WsState::Open {
            let limit = self.config.max_message_size as u64;
            match frame::decode_with_limit(self.recv.pending(), limit) {
                Ok(Decoded::Frame { frame, consumed }) => {
                    self.recv.advance(consumed);
                    if let Err(err) = self.handle_frame(frame, now, events) {
                        self.protocol_failure(err, events);
                    }
                }
                Ok(Decoded::NeedMoreData) => break,
                Err(FrameError::PayloadTooLarge { .. }) => {
                    self.protocol_failure(
                        WsError::MessageTooLarge {
                            limit: self.config.max_message_size,
                        },
                        events,
                    );
                }
                Err(err) => self.protocol_failure(err.into(), events),
            }
        }
        self.recv.compact();
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant, events: &mut Vec<WsEvent>) -> WsResult<()> {
        tracing::trace!(
            connection_id = %self.id,
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload.len(),
            "Frame received"
        );
        match (self.role, frame.masked) {
            (Role::Client, true) => return Err(WsError::Protocol("server frames must not be masked")),
            (Role::Server, false) => return Err(WsError::Protocol("client frames must be masked")),
            _ => {}
        }

        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragments.is_some() {
                    return Err(WsError::Protocol("new data frame during a fragmented message"));
                }
                let binary = frame.opcode == OpCode::Binary;
                if frame.fin {
                    self.deliver(binary, frame.payload, events)?;
                } else {
                    self.fragments = Some(Fragments {
                        binary,
                        payload: frame.payload,
                    });
                }
            }
            OpCode::Continuation => {
                let Some(fragments) = self.fragments.as_mut() else {
                    return Err(WsError::Protocol("continuation frame without a message"));
                };
                if fragments.payload.len() + frame.payload.len() > self.config.max_message_size {
                    return Err(WsError::MessageTooLarge {
                        limit: self.config.max_message_size,
                    });
                }
                fragments.payload.extend_from_slice(&frame.payload);
                if frame.fin {
                    if let Some(done) = self.fragments.take() {
                        self.deliver(done.binary, done.payload, events)?;
                    }
                }
            }
            OpCode::Ping => {
                // At most one unwritten Pong, answering the latest Ping
                self.outbound.retain(|o| !(o.pong && o.written == 0));
                self.enqueue(Frame::pong(frame.payload), false)?;
            }
            OpCode::Pong => {
                self.last_pong_time = Some(now);
                self.waiting_for_pong = false;
            }
            OpCode::Close => {
                let close = CloseFrame::parse(&frame.payload);
                if close.is_normal() || close.code == CloseCode::GOING_AWAY {
                    tracing::debug!(connection_id = %self.id, code = close.code, "Close frame received");
                } else {
                    tracing::warn!(
                        connection_id = %self.id,
                        code = close.code,
                        reason = %close.reason,
                        "Close frame received"
                    );
                }
                self.state = WsState::Closing;
                let echo = if close.code == CloseCode::NO_STATUS {
                    Frame::new(OpCode::Close, Vec::new())
                } else {
                    Frame::close(&CloseFrame::new(close.code, ""))
                };
                if self.enqueue(echo, false).is_ok() {
                    let _ = self.flush();
                }
                self.teardown();
                self.state = WsState::Closed;
                events.push(WsEvent::Close(close));
            }
        }
        Ok(())
    }

    fn deliver(&mut self, binary: bool, payload: Vec<u8>, events: &mut Vec<WsEvent>) -> WsResult<()> {
        let message = if binary {
            Message::Binary(payload)
        } else {
            Message::Text(String::from_utf8(payload).map_err(|_| WsError::InvalidUtf8)?)
        };
        events.push(WsEvent::Message(message));
        Ok(())
    }

    fn check_keepalive(&mut self, now: Instant, events: &mut Vec<WsEvent>) {
        let Some(interval) = self.config.ping_interval() else {
            return;
        };
        let last_ping = *self.last_ping_time.get_or_insert(now);
        let elapsed = now.saturating_duration_since(last_ping);

        if self.waiting_for_pong {
            if elapsed > self.config.pong_timeout() {
                tracing::warn!(
                    connection_id = %self.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Pong timeout"
                );
                self.fail(now, WsError::PongTimeout, events);
            }
        } else if elapsed >= interval && self.enqueue(Frame::ping(Vec::new()), false).is_ok() {
            self.last_ping_time = Some(now);
            self.waiting_for_pong = true;
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<WsEvent> {
        let mut events = std::mem::take(&mut self.pending);

        match self.state {
            WsState::Connecting => {
                if self.next_reconnect_at.is_some_and(|at| now >= at) {
                    self.try_reconnect(now, &mut events);
                }
            }
            WsState::Open => {
                self.last_ping_time.get_or_insert(now);
                if let Err(err) = self.flush() {
                    self.fail(now, err, &mut events);
                    return events;
                }
                let eof = match self.read_available() {
                    Ok(eof) => eof,
                    Err(err) => {
                        self.process_frames(now, &mut events);
                        if self.state == WsState::Open {
                            self.fail(now, err, &mut events);
                        }
                        return events;
                    }
                };
                self.process_frames(now, &mut events);
                if eof && self.state == WsState::Open {
                    self.fail(
                        now,
                        WsError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        )),
                        &mut events,
                    );
                    return events;
                }
                if self.state == WsState::Open {
                    self.check_keepalive(now, &mut events);
                }
                if self.state == WsState::Open {
                    if let Err(err) = self.flush() {
                        self.fail(now, err, &mut events);
                    }
                }
            }
            WsState::Closing | WsState::Closed => {}
        }

        events
    }
}

pub(crate) struct Shared {
    pub(crate) id: Uuid,
    pub(crate) inner: Mutex<Connection>,
}

/// Handle to a WebSocket connection
///
/// Clones refer to the same connection. The socket is released when the
/// connection is closed or the last handle is dropped.
#[derive(Clone)]
pub struct WsConnection {
    shared: Arc<Shared>,
}

impl WsConnection {
    /// Connect to a `ws://` or `wss://` URL over TCP
    ///
    /// Blocks for the TCP connect, TLS negotiation and upgrade handshake,
    /// then returns an open, non-blocking connection. `on_open` fires on the
    /// first poll.
    pub fn connect(url: &str, config: WebSocketConfig) -> WsResult<Self> {
        Self::connect_with(url, config, Arc::new(TcpConnector::new()))
    }

    /// Connect using a custom [`Connector`]
    pub fn connect_with(url: &str, config: WebSocketConfig, connector: Arc<dyn Connector>) -> WsResult<Self> {
        let endpoint = Endpoint {
            url: WsUrl::parse(url)?,
            connector,
        };
        let (stream, leftover) = open_client_stream(&endpoint)?;
        let mut conn = Connection::new(Role::Client, config, stream, leftover);
        tracing::debug!(
            connection_id = %conn.id,
            url = %endpoint.url,
            secure = conn.secure,
            "WebSocket connected"
        );
        conn.endpoint = Some(endpoint);
        Ok(Self::from_connection(conn))
    }

    /// Accept a client on an already-established stream
    ///
    /// Reads the upgrade request, answers it, and returns a server-role
    /// connection. The stream must be in blocking mode.
    pub fn accept(mut stream: Box<dyn Stream>, config: WebSocketConfig) -> WsResult<Self> {
        let (resource, leftover) = handshake::perform_server_handshake(stream.as_mut())?;
        stream.set_nonblocking(true)?;
        let conn = Connection::new(Role::Server, config, stream, leftover);
        tracing::debug!(connection_id = %conn.id, %resource, "WebSocket accepted");
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: conn.id,
                inner: Mutex::new(conn),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.shared.inner.lock()
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    #[must_use]
    pub fn state(&self) -> WsState {
        self.lock().state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == WsState::Open
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.lock().role
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.lock().secure
    }

    /// Endpoint URL for client connections
    #[must_use]
    pub fn url(&self) -> Option<WsUrl> {
        self.lock().endpoint.as_ref().map(|e| e.url.clone())
    }

    /// Number of data messages waiting in the outbound queue
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.lock().data_queue_len()
    }

    /// Number of frames waiting in the outbound queue, control frames included
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.lock().outbound.len()
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    #[must_use]
    pub fn last_reconnect_time(&self) -> Option<Instant> {
        self.lock().last_reconnect_time
    }

    #[must_use]
    pub fn last_pong_time(&self) -> Option<Instant> {
        self.lock().last_pong_time
    }

    #[must_use]
    pub fn waiting_for_pong(&self) -> bool {
        self.lock().waiting_for_pong
    }

    /// Send a message
    ///
    /// Writes immediately when possible; otherwise the frame waits in the
    /// outbound queue (including while a reconnect is pending). Fails with
    /// `QueueFull` once `max_queue_size` messages are waiting.
    pub fn send(&self, payload: impl Into<Vec<u8>>, is_binary: bool) -> WsResult<()> {
        self.lock().send_data(payload.into(), is_binary)
    }

    pub fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.send(text.into().into_bytes(), false)
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> WsResult<()> {
        self.send(data, true)
    }

    /// Close normally; queued data is discarded and no handler fires
    pub fn close(&self) {
        self.close_with(CloseCode::NORMAL, "");
    }

    /// Close with a specific status code and reason
    pub fn close_with(&self, code: u16, reason: &str) {
        self.lock().close_with(&CloseFrame::new(code, reason));
    }

    /// Switch the socket between blocking and non-blocking mode
    pub fn set_non_blocking(&self, nonblocking: bool) -> WsResult<()> {
        let mut conn = self.lock();
        if let Some(stream) = conn.stream.as_ref() {
            stream.set_nonblocking(nonblocking)?;
        }
        conn.nonblocking = nonblocking;
        Ok(())
    }

    #[must_use]
    pub fn is_non_blocking(&self) -> bool {
        self.lock().nonblocking
    }

    /// Change the keepalive interval (0 disables pings)
    pub fn set_ping_interval(&self, interval_ms: u64) {
        let mut conn = self.lock();
        conn.config.ping_interval_ms = interval_ms;
        if interval_ms == 0 {
            conn.waiting_for_pong = false;
        }
    }

    /// Configure low-level reconnection (max_attempts 0 = unlimited)
    pub fn set_auto_reconnect(&self, enabled: bool, max_attempts: u32, delay_ms: u64) {
        let mut conn = self.lock();
        conn.config.auto_reconnect = enabled;
        conn.config.max_reconnect_attempts = max_attempts;
        conn.config.reconnect_delay_ms = delay_ms;
    }

    pub fn on_open<F>(&self, f: F)
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.lock().handlers.on_open = Some(Callback::new(f));
    }

    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.lock().handlers.on_message = Some(Callback::new(f));
    }

    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&CloseFrame) + Send + Sync + 'static,
    {
        self.lock().handlers.on_close = Some(Callback::new(f));
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&WsError) + Send + Sync + 'static,
    {
        self.lock().handlers.on_error = Some(Callback::new(f));
    }

    /// Remove all handlers
    pub fn clear_handlers(&self) {
        self.lock().handlers = Handlers::default();
    }

    /// Run one tick of I/O and bookkeeping, then invoke handlers
    ///
    /// Returns the state after the poll.
    pub fn poll(&self, now: Instant) -> WsState {
        let (events, handlers) = {
            let mut conn = self.lock();
            let events = conn.poll(now);
            (events, conn.handlers.clone())
        };
        handlers.dispatch(events);
        self.state()
    }
}

impl PartialEq for WsConnection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for WsConnection {}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conn = self.lock();
        f.debug_struct("WsConnection")
            .field("id", &conn.id)
            .field("role", &conn.role)
            .field("state", &conn.state)
            .field("queued", &conn.outbound.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryConnector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn no_keepalive() -> WebSocketConfig {
        WebSocketConfig::default().without_keepalive()
    }

    fn connect(connector: &Arc<MemoryConnector>, config: WebSocketConfig) -> WsConnection {
        WsConnection::connect_with("ws://test.local/gateway", config, connector.clone()).unwrap()
    }

    fn record_messages(conn: &WsConnection) -> Arc<Mutex<Vec<Message>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.on_message(move |m| sink.lock().push(m.clone()));
        seen
    }

    fn record_closes(conn: &WsConnection) -> Arc<Mutex<Vec<CloseFrame>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.on_close(move |c| sink.lock().push(c.clone()));
        seen
    }

    #[test]
    fn test_connect_sends_upgrade_request() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        assert!(conn.is_open());
        assert_eq!(conn.role(), Role::Client);
        let request = connector.last_peer().unwrap().request().unwrap();
        assert!(request.starts_with("GET /gateway HTTP/1.1\r\n"));
        assert!(request.contains("Host: test.local\r\n"));
    }

    #[test]
    fn test_on_open_fires_on_first_poll() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        conn.on_open(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.poll(Instant::now());
        conn.poll(Instant::now());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_handshake_fails_connect() {
        let connector = MemoryConnector::new();
        connector.reject_handshakes(true);
        let result = WsConnection::connect_with("ws://test.local/", no_keepalive(), connector.clone());
        assert!(matches!(result, Err(WsError::Handshake(_))));
    }

    #[test]
    fn test_invalid_url() {
        let result = WsConnection::connect_with("http://test.local/", no_keepalive(), MemoryConnector::new());
        assert!(matches!(result, Err(WsError::Handshake(_))));
    }

    #[test]
    fn test_send_text_is_masked() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        conn.send_text("hello").unwrap();

        let frames = connector.last_peer().unwrap().received_frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].masked);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].payload, b"hello");
    }

    #[test]
    fn test_send_rejects_invalid_utf8_text() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        assert!(matches!(conn.send(vec![0xff, 0xfe], false), Err(WsError::InvalidUtf8)));
    }

    #[test]
    fn test_receive_text_and_binary() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let seen = record_messages(&conn);
        let peer = connector.last_peer().unwrap();

        peer.push_text("hi");
        peer.push_frame(&Frame::binary(vec![1, 2, 3]));
        conn.poll(Instant::now());

        assert_eq!(
            *seen.lock(),
            vec![Message::Text("hi".to_string()), Message::Binary(vec![1, 2, 3])]
        );
    }

    #[test]
    fn test_frames_split_across_reads() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let seen = record_messages(&conn);
        let peer = connector.last_peer().unwrap();

        let bytes = Frame::text("x".repeat(300)).to_bytes().unwrap();
        peer.push_raw(&bytes[..3]);
        conn.poll(Instant::now());
        assert!(seen.lock().is_empty());

        peer.push_raw(&bytes[3..]);
        conn.poll(Instant::now());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].len(), 300);
    }

    #[test]
    fn test_fragmented_message_reassembly() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let seen = record_messages(&conn);
        let peer = connector.last_peer().unwrap();

        peer.push_frame(&Frame::text("Hel").fragment());
        peer.push_frame(&Frame::ping(b"p".to_vec()));
        peer.push_frame(&Frame::new(OpCode::Continuation, b"lo".to_vec()));
        conn.poll(Instant::now());

        assert_eq!(*seen.lock(), vec![Message::Text("Hello".to_string())]);
        let replies = peer.received_frames();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].opcode, OpCode::Pong);
        assert_eq!(replies[0].payload, b"p");
    }

    #[test]
    fn test_unexpected_continuation_is_protocol_error() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let closes = record_closes(&conn);
        let peer = connector.last_peer().unwrap();

        peer.push_frame(&Frame::new(OpCode::Continuation, b"x".to_vec()));
        conn.poll(Instant::now());

        assert_eq!(conn.state(), WsState::Closed);
        assert_eq!(closes.lock()[0].code, CloseCode::PROTOCOL_ERROR);
        let sent = peer.received_frames();
        assert_eq!(sent.last().map(|f| f.opcode), Some(OpCode::Close));
        assert!(peer.is_shutdown());
    }

    #[test]
    fn test_invalid_utf8_closes_with_1007() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let closes = record_closes(&conn);
        connector
            .last_peer()
            .unwrap()
            .push_frame(&Frame::new(OpCode::Text, vec![0xC3, 0x28]));
        conn.poll(Instant::now());
        assert_eq!(closes.lock()[0].code, CloseCode::INVALID_PAYLOAD);
    }

    #[test]
    fn test_masked_server_frame_rejected() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        connector
            .last_peer()
            .unwrap()
            .push_frame(&Frame::text("x").masked_with([1, 2, 3, 4]));
        conn.poll(Instant::now());
        assert_eq!(conn.state(), WsState::Closed);
    }

    #[test]
    fn test_reserved_opcode_closes_connection() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        conn.on_error(move |e| {
            assert!(matches!(e, WsError::Frame(FrameError::InvalidOpcode(3))));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        connector.last_peer().unwrap().push_raw(&[0x83, 0x00]);
        conn.poll(Instant::now());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(conn.state(), WsState::Closed);
    }

    #[test]
    fn test_message_too_large() {
        let connector = MemoryConnector::new();
        let config = WebSocketConfig {
            max_message_size: 16,
            ..no_keepalive()
        };
        let conn = connect(&connector, config);
        let closes = record_closes(&conn);
        connector.last_peer().unwrap().push_text(&"x".repeat(17));
        conn.poll(Instant::now());
        assert_eq!(closes.lock()[0].code, CloseCode::MESSAGE_TOO_BIG);
    }

    #[test]
    fn test_server_close_is_echoed() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let closes = record_closes(&conn);
        let peer = connector.last_peer().unwrap();

        peer.push_frame(&Frame::close(&CloseFrame::new(4000, "bye")));
        conn.poll(Instant::now());

        assert_eq!(conn.state(), WsState::Closed);
        assert_eq!(*closes.lock(), vec![CloseFrame::new(4000, "bye")]);
        let echo = peer.received_frames();
        assert_eq!(echo.len(), 1);
        assert_eq!(CloseFrame::parse(&echo[0].payload).code, 4000);
    }

    #[test]
    fn test_peer_eof_reports_error_and_abnormal_close() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let closes = record_closes(&conn);
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        conn.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        connector.last_peer().unwrap().disconnect();
        conn.poll(Instant::now());

        assert_eq!(conn.state(), WsState::Closed);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(closes.lock()[0].code, CloseCode::ABNORMAL);
    }

    #[test]
    fn test_local_close_sends_frame_without_callbacks() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let closes = record_closes(&conn);
        let peer = connector.last_peer().unwrap();

        conn.close();
        conn.poll(Instant::now());

        assert_eq!(conn.state(), WsState::Closed);
        assert!(closes.lock().is_empty());
        let frames = peer.received_frames();
        assert_eq!(CloseFrame::parse(&frames[0].payload).code, 1000);
        assert!(matches!(conn.send_text("late"), Err(WsError::NotOpen)));
    }

    #[test]
    fn test_queue_full_is_backpressure() {
        let connector = MemoryConnector::new();
        let config = WebSocketConfig {
            max_queue_size: 2,
            ..no_keepalive()
        };
        let conn = connect(&connector, config);
        let peer = connector.last_peer().unwrap();
        peer.set_write_capacity(Some(0));

        conn.send_text("one").unwrap();
        conn.send_text("two").unwrap();
        assert!(matches!(conn.send_text("three"), Err(WsError::QueueFull { capacity: 2 })));
        assert_eq!(conn.queued_messages(), 2);

        peer.set_write_capacity(None);
        conn.poll(Instant::now());
        assert_eq!(conn.queued_messages(), 0);
        let texts = peer.received_texts();
        assert_eq!(texts, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_unanswered_pings_keep_one_pong() {
        let connector = MemoryConnector::new();
        let config = WebSocketConfig {
            max_queue_size: 2,
            ..no_keepalive()
        };
        let conn = connect(&connector, config);
        let peer = connector.last_peer().unwrap();
        peer.set_write_capacity(Some(0));

        for i in 0..500 {
            peer.push_frame(&Frame::ping(format!("ping-{i}")));
        }
        for _ in 0..60 {
            conn.poll(Instant::now());
        }
        assert!(conn.is_open());
        assert_eq!(conn.queued_frames(), 1);

        peer.set_write_capacity(None);
        conn.poll(Instant::now());
        let frames = peer.received_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OpCode::Pong);
        assert_eq!(frames[0].payload, b"ping-499");
    }

    #[test]
    fn test_close_never_sends_reserved_code() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let peer = connector.last_peer().unwrap();

        conn.close_with(CloseCode::ABNORMAL, "dropped");

        let frames = peer.received_frames();
        let close = CloseFrame::parse(&frames[0].payload);
        assert_eq!(close, CloseFrame::new(1000, "dropped"));
    }

    #[test]
    fn test_partial_write_keeps_tail_at_head() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let peer = connector.last_peer().unwrap();
        peer.set_write_capacity(Some(4));

        conn.send_text("a longer message").unwrap();
        conn.send_text("next").unwrap();
        assert_eq!(conn.queued_messages(), 2);

        peer.set_write_capacity(None);
        conn.poll(Instant::now());
        assert_eq!(
            peer.received_texts(),
            vec!["a longer message".to_string(), "next".to_string()]
        );
    }

    #[test]
    fn test_keepalive_ping_and_pong() {
        let connector = MemoryConnector::new();
        let config = WebSocketConfig {
            ping_interval_ms: 1_000,
            ..WebSocketConfig::default()
        };
        let conn = connect(&connector, config);
        let peer = connector.last_peer().unwrap();
        let start = Instant::now();

        conn.poll(start);
        assert!(peer.received_frames().is_empty());

        conn.poll(start + Duration::from_millis(1_000));
        let frames = peer.received_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OpCode::Ping);
        assert!(conn.waiting_for_pong());

        peer.push_frame(&Frame::pong(Vec::new()));
        let pong_at = start + Duration::from_millis(1_100);
        conn.poll(pong_at);
        assert!(!conn.waiting_for_pong());
        assert_eq!(conn.last_pong_time(), Some(pong_at));
    }

    #[test]
    fn test_pong_timeout_closes_without_auto_reconnect() {
        let connector = MemoryConnector::new();
        let config = WebSocketConfig {
            ping_interval_ms: 1_000,
            pong_timeout_ms: Some(500),
            ..WebSocketConfig::default()
        };
        let conn = connect(&connector, config);
        let closes = record_closes(&conn);
        let start = Instant::now();

        conn.poll(start);
        conn.poll(start + Duration::from_millis(1_000));
        conn.poll(start + Duration::from_millis(1_400));
        assert!(conn.is_open());

        conn.poll(start + Duration::from_millis(1_501));
        assert_eq!(conn.state(), WsState::Closed);
        assert_eq!(closes.lock()[0].code, CloseCode::ABNORMAL);
    }

    #[test]
    fn test_pong_timeout_reconnects() {
        let connector = MemoryConnector::new();
        let config = WebSocketConfig {
            ping_interval_ms: 1_000,
            pong_timeout_ms: Some(500),
            ..WebSocketConfig::default()
        };
        let conn = connect(&connector, config);
        conn.set_auto_reconnect(true, 3, 200);
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        conn.on_open(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let start = Instant::now();

        conn.poll(start);
        conn.poll(start + Duration::from_millis(1_000));
        conn.poll(start + Duration::from_millis(1_600));
        assert_eq!(conn.state(), WsState::Connecting);

        conn.poll(start + Duration::from_millis(1_700));
        assert_eq!(conn.state(), WsState::Connecting);

        conn.poll(start + Duration::from_millis(1_800));
        assert!(conn.is_open());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(conn.reconnect_attempts(), 0);
    }

    #[test]
    fn test_reconnect_exhaustion_reports_terminal_error() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        conn.set_auto_reconnect(true, 2, 100);
        let exhausted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&exhausted);
        conn.on_error(move |e| {
            if matches!(e, WsError::ReconnectExhausted { attempts: 2 }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let start = Instant::now();
        conn.poll(start);

        connector.refuse_connections(true);
        connector.last_peer().unwrap().disconnect();
        conn.poll(start);
        assert_eq!(conn.state(), WsState::Connecting);

        conn.poll(start + Duration::from_millis(100));
        assert_eq!(conn.reconnect_attempts(), 1);
        conn.poll(start + Duration::from_millis(200));
        assert_eq!(conn.state(), WsState::Closed);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_while_reconnecting_is_queued() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        conn.set_auto_reconnect(true, 0, 50);
        let start = Instant::now();
        conn.poll(start);

        connector.last_peer().unwrap().disconnect();
        conn.poll(start);
        assert_eq!(conn.state(), WsState::Connecting);
        conn.send_text("queued").unwrap();

        conn.poll(start + Duration::from_millis(50));
        assert!(conn.is_open());
        conn.poll(start + Duration::from_millis(51));
        assert_eq!(connector.last_peer().unwrap().received_texts(), vec!["queued".to_string()]);
    }

    #[test]
    fn test_handler_may_send_reentrantly() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        let echo = conn.clone();
        conn.on_message(move |m| {
            if let Some(text) = m.as_text() {
                echo.send_text(format!("echo:{text}")).unwrap();
            }
        });
        let peer = connector.last_peer().unwrap();
        peer.push_text("ping");
        conn.poll(Instant::now());
        assert_eq!(peer.received_texts(), vec!["echo:ping".to_string()]);
    }

    #[test]
    fn test_leftover_handshake_bytes_are_processed() {
        let connector = MemoryConnector::new();
        connector.send_on_upgrade(&Frame::text("hello-first"));
        let conn = connect(&connector, no_keepalive());
        let seen = record_messages(&conn);
        conn.poll(Instant::now());
        assert_eq!(*seen.lock(), vec![Message::Text("hello-first".to_string())]);
    }

    #[test]
    fn test_set_non_blocking() {
        let connector = MemoryConnector::new();
        let conn = connect(&connector, no_keepalive());
        assert!(conn.is_non_blocking());
        conn.set_non_blocking(false).unwrap();
        assert!(!conn.is_non_blocking());
    }
}
