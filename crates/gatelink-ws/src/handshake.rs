//! WebSocket opening handshake (RFC 6455 Section 4)
//!
//! - [`client_request`] / [`parse_response`]: client side of the upgrade
//! - [`parse_request`] / [`validate_upgrade_request`] / [`server_response`]:
//!   the minimal server side
//! - [`accept_key`]: SHA-1 + base64 of the client key and the fixed GUID
//!
//! [`perform_client_handshake`] and [`perform_server_handshake`] run the
//! exchange over a blocking stream and return any bytes that arrived after
//! the header block, since peers commonly send their first frame in the
//! same segment as the upgrade.

use std::io::{self, Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;
use crate::url::WsUrl;

/// Magic GUID appended to the client key for `Sec-WebSocket-Accept`
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on an HTTP header block
const MAX_HEADER_BYTES: usize = 16 * 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Fresh random `Sec-WebSocket-Key` (16 bytes, base64)
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    BASE64.encode(nonce)
}

/// Compute the `Sec-WebSocket-Accept` value for a client key
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the client upgrade request
#[must_use]
pub fn client_request(url: &WsUrl, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        url.resource,
        url.host_header(),
        key
    )
}

/// Parsed HTTP header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    /// Request line or status line
    pub start_line: String,
    pub headers: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a comma-separated header contains `token` (case-insensitive)
    #[must_use]
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Split a complete header block off the front of `buf`
///
/// Returns `Ok(None)` until the terminating blank line has arrived.
pub fn parse_header_block(buf: &[u8]) -> Result<Option<(HeaderBlock, usize)>, HandshakeError> {
    let Some(end) = buf.windows(HEADER_END.len()).position(|w| w == HEADER_END) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(HandshakeError::Incomplete("header block too large"));
        }
        return Ok(None);
    };

    let text = std::str::from_utf8(&buf[..end])
        .map_err(|_| HandshakeError::UnexpectedStatus("header block is not UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");
    let start_line = lines.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Ok(Some((
        HeaderBlock {
            start_line,
            headers,
        },
        end + HEADER_END.len(),
    )))
}

/// Validate the server's upgrade response
///
/// Returns the length of the header block once complete, `Ok(None)` while
/// more bytes are needed.
pub fn parse_response(buf: &[u8], key: &str) -> Result<Option<usize>, HandshakeError> {
    let Some((block, consumed)) = parse_header_block(buf)? else {
        return Ok(None);
    };

    let mut status = block.start_line.split_whitespace();
    let version = status.next().unwrap_or_default();
    let code = status.next().unwrap_or_default();
    if version != "HTTP/1.1" || code != "101" {
        return Err(HandshakeError::UnexpectedStatus(block.start_line.clone()));
    }
    if !block.header_has_token("Upgrade", "websocket") {
        return Err(HandshakeError::MissingHeader("Upgrade"));
    }
    if !block.header_has_token("Connection", "upgrade") {
        return Err(HandshakeError::MissingHeader("Connection"));
    }
    let accept = block
        .header("Sec-WebSocket-Accept")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
    if accept != accept_key(key) {
        return Err(HandshakeError::AcceptMismatch);
    }
    Ok(Some(consumed))
}

/// A client's upgrade request as seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub method: String,
    pub resource: String,
    pub block: HeaderBlock,
}

/// Parse an upgrade request from the front of `buf`
pub fn parse_request(buf: &[u8]) -> Result<Option<(UpgradeRequest, usize)>, HandshakeError> {
    let Some((block, consumed)) = parse_header_block(buf)? else {
        return Ok(None);
    };
    let mut parts = block.start_line.split_whitespace();
    let (Some(method), Some(resource)) = (parts.next(), parts.next()) else {
        return Err(HandshakeError::UnexpectedStatus(block.start_line.clone()));
    };
    Ok(Some((
        UpgradeRequest {
            method: method.to_string(),
            resource: resource.to_string(),
            block,
        },
        consumed,
    )))
}

/// Check the headers RFC 6455 Section 4.2.1 requires
///
/// Returns the client key, or the reason for rejection.
pub fn validate_upgrade_request(request: &UpgradeRequest) -> Result<String, &'static str> {
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err("method must be GET");
    }
    if !request.block.header_has_token("Upgrade", "websocket") {
        return Err("missing or invalid Upgrade header");
    }
    if !request.block.header_has_token("Connection", "upgrade") {
        return Err("missing or invalid Connection header");
    }
    let key = request
        .block
        .header("Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or("missing Sec-WebSocket-Key header")?;
    if request.block.header("Sec-WebSocket-Version") != Some("13") {
        return Err("missing or invalid Sec-WebSocket-Version (must be 13)");
    }
    Ok(key.to_string())
}

/// `101 Switching Protocols` response for a client key
#[must_use]
pub fn server_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )
}

/// `400 Bad Request` response carrying a reason
#[must_use]
pub fn bad_request(reason: &str) -> String {
    let body = format!("Bad Request: {reason}");
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

fn read_header_block<S, F, T>(stream: &mut S, mut parse: F) -> Result<(T, Vec<u8>), HandshakeError>
where
    S: Read + ?Sized,
    F: FnMut(&[u8]) -> Result<Option<(T, usize)>, HandshakeError>,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => return Err(HandshakeError::Incomplete("connection closed during handshake")),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HandshakeError::Io(e)),
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some((parsed, consumed)) = parse(&buf)? {
            return Ok((parsed, buf.split_off(consumed)));
        }
    }
}

/// Run the client side of the handshake over a blocking stream
///
/// Returns any bytes received after the response headers.
pub fn perform_client_handshake<S>(stream: &mut S, url: &WsUrl) -> Result<Vec<u8>, HandshakeError>
where
    S: Read + Write + ?Sized,
{
    let key = generate_key();
    stream.write_all(client_request(url, &key).as_bytes())?;
    stream.flush()?;

    let ((), leftover) = read_header_block(stream, |buf| {
        Ok(parse_response(buf, &key)?.map(|consumed| ((), consumed)))
    })?;
    tracing::debug!(url = %url, leftover = leftover.len(), "Client handshake complete");
    Ok(leftover)
}

/// Run the server side of the handshake over a blocking stream
///
/// Answers `400 Bad Request` and fails when the request is not a valid
/// upgrade. On success returns the requested resource and any bytes that
/// followed the request headers.
pub fn perform_server_handshake<S>(stream: &mut S) -> Result<(String, Vec<u8>), HandshakeError>
where
    S: Read + Write + ?Sized,
{
    let (request, leftover) = read_header_block(stream, parse_request)?;
    match validate_upgrade_request(&request) {
        Ok(key) => {
            stream.write_all(server_response(&key).as_bytes())?;
            stream.flush()?;
            tracing::debug!(resource = %request.resource, "Server handshake complete");
            Ok((request.resource, leftover))
        }
        Err(reason) => {
            let _ = stream.write_all(bad_request(reason).as_bytes());
            let _ = stream.flush();
            Err(HandshakeError::UnexpectedStatus(reason.to_string()))
        }
    }
}
