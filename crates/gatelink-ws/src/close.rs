//! Close frame payloads (RFC 6455 Section 5.5.1, 7.4)
//!
//! A close payload is an optional big-endian status code followed by a
//! UTF-8 reason. Control frames are limited to 125 bytes, so the reason is
//! truncated to 123 bytes on a character boundary.

use std::fmt;

/// Well-known close status codes
pub struct CloseCode;

impl CloseCode {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// Reserved: no status code was present
    pub const NO_STATUS: u16 = 1005;
    /// Reserved: connection dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Whether a code may appear in a close frame
    #[must_use]
    pub fn is_valid(code: u16) -> bool {
        matches!(code, 1000..=1015 | 3000..=4999)
    }

    /// Whether a code may be sent; 1004, 1005, 1006 and 1015 are reserved
    /// for local reporting and never go out on the wire
    #[must_use]
    pub fn is_sendable(code: u16) -> bool {
        Self::is_valid(code) && !matches!(code, 1004 | Self::NO_STATUS | Self::ABNORMAL | 1015)
    }
}

const MAX_REASON_LEN: usize = 123;

/// Status code and reason carried by a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with no reason
    #[must_use]
    pub fn normal() -> Self {
        Self::new(CloseCode::NORMAL, "")
    }

    /// Connection ended without a close frame
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::ABNORMAL, reason)
    }

    /// Parse a close frame payload
    ///
    /// An empty payload means 1005 "no status". A one-byte payload or a code
    /// outside the valid ranges is reported as a 1002 protocol error.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        match payload {
            [] => Self::new(CloseCode::NO_STATUS, ""),
            [_] => Self::new(CloseCode::PROTOCOL_ERROR, "truncated close code"),
            [hi, lo, reason @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                if !CloseCode::is_valid(code) {
                    return Self::new(CloseCode::PROTOCOL_ERROR, format!("invalid close code {code}"));
                }
                Self::new(code, String::from_utf8_lossy(reason).into_owned())
            }
        }
    }

    /// Serialize into a close frame payload
    ///
    /// Codes that may not be sent are replaced by 1000.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let code = if CloseCode::is_sendable(self.code) {
            self.code
        } else {
            CloseCode::NORMAL
        };
        let reason = truncate_on_char_boundary(&self.reason, MAX_REASON_LEN);
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        payload
    }

    /// Whether this close reports a clean shutdown
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == CloseCode::NORMAL
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
