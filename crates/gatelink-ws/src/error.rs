//! Transport error types

use std::io;

use thiserror::Error;

use crate::close::CloseCode;

/// Frame codec errors
///
/// An incomplete frame is not an error; see [`crate::frame::Decoded::NeedMoreData`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// RSV1-3 set without a negotiated extension
    #[error("Reserved bits set without a negotiated extension")]
    ReservedBits,

    /// Opcode outside the RFC 6455 set
    #[error("Invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    /// Masking requested but no key supplied
    #[error("Masked frame has no masking key")]
    MissingMaskKey,

    /// Payload length exceeds what the length class or the local limit allows
    #[error("Payload too large: {len} bytes (limit {limit})")]
    PayloadTooLarge { len: u64, limit: u64 },

    /// Control frame payload over 125 bytes
    #[error("Control frame payload too long: {0} bytes")]
    ControlFrameTooLong(usize),

    /// Control frame with FIN cleared
    #[error("Control frames must not be fragmented")]
    FragmentedControlFrame,
}

/// Opening handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected handshake status: {0}")]
    UnexpectedStatus(String),

    #[error("Missing or invalid header: {0}")]
    MissingHeader(&'static str),

    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,

    /// Peer closed the stream or the header block grew past the limit
    #[error("Incomplete handshake: {0}")]
    Incomplete(&'static str),

    #[error("Handshake I/O error: {0}")]
    Io(#[from] io::Error),
}

/// WebSocket connection errors
#[derive(Debug, Error)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Peer violated the framing protocol at the message level
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Outbound queue is at capacity
    #[error("Outbound queue full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("Connection is not open")]
    NotOpen,

    #[error("No pong received within the keepalive timeout")]
    PongTimeout,

    #[error("Reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("Message exceeds maximum size of {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("Text message is not valid UTF-8")]
    InvalidUtf8,
}

impl WsError {
    /// Close code to send to the peer when this error ends the connection
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Frame(_) | Self::Protocol(_) => CloseCode::PROTOCOL_ERROR,
            Self::InvalidUtf8 => CloseCode::INVALID_PAYLOAD,
            Self::MessageTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            Self::Closed { code, .. } => *code,
            Self::Io(_)
            | Self::Tls(_)
            | Self::Handshake(_)
            | Self::PongTimeout
            | Self::ReconnectExhausted { .. } => CloseCode::ABNORMAL,
            Self::QueueFull { .. } | Self::NotOpen => CloseCode::INTERNAL_ERROR,
        }
    }

    /// Whether retrying the operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
            ),
            Self::QueueFull { .. } | Self::PongTimeout | Self::NotOpen => true,
            Self::Handshake(HandshakeError::Io(_) | HandshakeError::Incomplete(_)) => true,
            _ => false,
        }
    }
}

/// Result alias for transport operations
pub type WsResult<T> = Result<T, WsError>;

/// Whether an I/O error only means the operation would block
pub(crate) fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
