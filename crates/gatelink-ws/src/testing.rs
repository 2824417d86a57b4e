//! In-memory peer for tests
//!
//! [`MemoryConnector`] hands out in-memory streams whose far end is a
//! [`MemoryPeer`] playing the server: it answers the upgrade request,
//! decodes the masked frames the client writes, and lets tests push server
//! frames, drop the connection, or throttle writes.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{WsError, WsResult};
use crate::frame::{self, Decoded, Frame, OpCode};
use crate::handshake;
use crate::stream::{Connector, Stream};
use crate::url::WsUrl;

#[derive(Default)]
struct Duplex {
    to_server: Vec<u8>,
    to_client: VecDeque<u8>,
    upgraded: bool,
    reject: bool,
    on_upgrade: Vec<u8>,
    request: Option<String>,
    url: Option<WsUrl>,
    peer_closed: bool,
    client_shutdown: bool,
    write_capacity: Option<usize>,
    nonblocking: bool,
}

impl Duplex {
    fn answer_upgrade(&mut self) {
        let Ok(Some((request, consumed))) = handshake::parse_request(&self.to_server) else {
            return;
        };
        let raw: Vec<u8> = self.to_server.drain(..consumed).collect();
        self.request = Some(String::from_utf8_lossy(&raw).into_owned());

        let response = match handshake::validate_upgrade_request(&request) {
            Ok(key) if !self.reject => {
                self.upgraded = true;
                handshake::server_response(&key)
            }
            Ok(_) => handshake::bad_request("rejected by test peer"),
            Err(reason) => handshake::bad_request(reason),
        };
        self.to_client.extend(response.as_bytes());
        if self.upgraded {
            let initial = std::mem::take(&mut self.on_upgrade);
            self.to_client.extend(initial);
        }
    }
}

/// Client side of an in-memory connection
struct MemoryStream {
    shared: Arc<Mutex<Duplex>>,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut duplex = self.shared.lock();
        if duplex.client_shutdown {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if duplex.to_client.is_empty() {
            return if duplex.peer_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(duplex.to_client.len());
        for (slot, byte) in buf.iter_mut().zip(duplex.to_client.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut duplex = self.shared.lock();
        if duplex.client_shutdown || duplex.peer_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = match duplex.write_capacity {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(capacity) => {
                let n = capacity.min(buf.len());
                duplex.write_capacity = Some(capacity - n);
                n
            }
            None => buf.len(),
        };
        duplex.to_server.extend_from_slice(&buf[..n]);
        if !duplex.upgraded {
            duplex.answer_upgrade();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for MemoryStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.shared.lock().nonblocking = nonblocking;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shared.lock().client_shutdown = true;
        Ok(())
    }
}

/// Server end of an in-memory connection
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Duplex>>,
}

impl MemoryPeer {
    /// Deliver raw bytes to the client
    pub fn push_raw(&self, bytes: &[u8]) {
        self.shared.lock().to_client.extend(bytes);
    }

    /// Deliver an encoded frame to the client
    ///
    /// # Panics
    /// Panics if the frame cannot be encoded.
    pub fn push_frame(&self, frame: &Frame) {
        let bytes = frame.to_bytes().expect("test frame must encode");
        self.push_raw(&bytes);
    }

    /// Deliver an unmasked text frame to the client
    pub fn push_text(&self, text: &str) {
        self.push_frame(&Frame::text(text));
    }

    /// Decode and drain every complete frame the client has written
    ///
    /// # Panics
    /// Panics if the client wrote bytes that are not valid frames.
    #[must_use]
    pub fn received_frames(&self) -> Vec<Frame> {
        let mut duplex = self.shared.lock();
        let mut frames = Vec::new();
        let mut offset = 0;
        while let Decoded::Frame { frame, consumed } =
            frame::decode(&duplex.to_server[offset..]).expect("client wrote an invalid frame")
        {
            offset += consumed;
            frames.push(frame);
        }
        duplex.to_server.drain(..offset);
        frames
    }

    /// Drain received frames and keep the text payloads
    #[must_use]
    pub fn received_texts(&self) -> Vec<String> {
        self.received_frames()
            .into_iter()
            .filter(|f| f.opcode == OpCode::Text)
            .map(|f| String::from_utf8_lossy(&f.payload).into_owned())
            .collect()
    }

    /// The upgrade request the client sent
    #[must_use]
    pub fn request(&self) -> Option<String> {
        self.shared.lock().request.clone()
    }

    /// URL the client connected to
    #[must_use]
    pub fn url(&self) -> Option<WsUrl> {
        self.shared.lock().url.clone()
    }

    #[must_use]
    pub fn is_upgraded(&self) -> bool {
        self.shared.lock().upgraded
    }

    /// Drop the connection from the server side; the client reads EOF
    pub fn disconnect(&self) {
        self.shared.lock().peer_closed = true;
    }

    /// Whether the client has shut the stream down
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().client_shutdown
    }

    /// Limit how many more bytes the client may write before blocking
    /// (`None` removes the limit)
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        self.shared.lock().write_capacity = capacity;
    }

    #[must_use]
    pub fn is_nonblocking(&self) -> bool {
        self.shared.lock().nonblocking
    }
}

#[derive(Default)]
struct ConnectorState {
    peers: Vec<MemoryPeer>,
    refuse: bool,
    reject: bool,
    on_upgrade: Vec<u8>,
}

/// Connector producing in-memory connections
#[derive(Default)]
pub struct MemoryConnector {
    state: Mutex<ConnectorState>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail subsequent connects with `ConnectionRefused`
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Answer subsequent upgrade requests with `400 Bad Request`
    pub fn reject_handshakes(&self, reject: bool) {
        self.state.lock().reject = reject;
    }

    /// Send a frame in the same write as the `101` response of every
    /// subsequent connection
    ///
    /// # Panics
    /// Panics if the frame cannot be encoded.
    pub fn send_on_upgrade(&self, frame: &Frame) {
        let bytes = frame.to_bytes().expect("test frame must encode");
        self.state.lock().on_upgrade.extend(bytes);
    }

    /// Stop sending frames with the upgrade response
    pub fn clear_on_upgrade(&self) {
        self.state.lock().on_upgrade.clear();
    }

    /// Number of streams handed out
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    #[must_use]
    pub fn peer(&self, index: usize) -> Option<MemoryPeer> {
        self.state.lock().peers.get(index).cloned()
    }

    #[must_use]
    pub fn last_peer(&self) -> Option<MemoryPeer> {
        self.state.lock().peers.last().cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &WsUrl) -> WsResult<Box<dyn Stream>> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(WsError::Io(io::ErrorKind::ConnectionRefused.into()));
        }
        let shared = Arc::new(Mutex::new(Duplex {
            reject: state.reject,
            on_upgrade: state.on_upgrade.clone(),
            url: Some(url.clone()),
            ..Duplex::default()
        }));
        state.peers.push(MemoryPeer {
            shared: Arc::clone(&shared),
        });
        Ok(Box::new(MemoryStream { shared }))
    }
}
