//! WebSocket frame codec (RFC 6455 Section 5.2-5.3)
//!
//! Pure functions over byte buffers; no I/O happens here.
//!
//! - [`encode`]: append one frame to a buffer
//! - [`decode`]: parse the next frame from the front of a buffer
//! - [`apply_mask`]: symmetric XOR masking

use rand::RngCore;

use crate::close::CloseFrame;
use crate::error::FrameError;

/// Largest payload that fits the 7-bit inline length
const MAX_INLINE_LEN: usize = 125;

/// The 64-bit length must leave the most significant bit clear
const MAX_FRAME_PAYLOAD: u64 = i64::MAX as u64;

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Parse a 4-bit opcode value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Continuation => "Continuation",
            Self::Text => "Text",
            Self::Binary => "Binary",
            Self::Close => "Close",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:X})", self.name(), self.as_u8())
    }
}

/// A single WebSocket frame
///
/// `payload` always holds unmasked bytes. When `masked` is set the payload
/// is XORed with `mask_key` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// RSV1-3 as the low three bits
    pub rsv: u8,
    pub opcode: OpCode,
    pub masked: bool,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Final, unmasked frame with the given opcode
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            masked: false,
            mask_key: None,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text, text.into().into_bytes())
    }

    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Binary, data)
    }

    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Ping, data)
    }

    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Pong, data)
    }

    #[must_use]
    pub fn close(close: &CloseFrame) -> Self {
        Self::new(OpCode::Close, close.to_payload())
    }

    /// Mark this frame as a non-final fragment
    #[must_use]
    pub fn fragment(mut self) -> Self {
        self.fin = false;
        self
    }

    /// Mask with an explicit key
    #[must_use]
    pub fn masked_with(mut self, key: [u8; 4]) -> Self {
        self.masked = true;
        self.mask_key = Some(key);
        self
    }

    /// Mask with a fresh key from the thread-local CSPRNG
    #[must_use]
    pub fn with_random_mask(self) -> Self {
        let mut key = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut key);
        self.masked_with(key)
    }

    /// Encoded size of this frame
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        header_len(self.payload.len(), self.masked) + self.payload.len()
    }

    /// Encode into a freshly allocated buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        encode(self, &mut buf)?;
        Ok(buf)
    }
}

/// Outcome of a decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A full frame and the number of bytes it occupied
    Frame { frame: Frame, consumed: usize },
    /// The buffer holds only part of a frame
    NeedMoreData,
}

/// Apply or remove the 4-byte XOR mask in place
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn header_len(payload_len: usize, masked: bool) -> usize {
    let length_bytes = match payload_len {
        0..=MAX_INLINE_LEN => 0,
        126..=0xFFFF => 2,
        _ => 8,
    };
    2 + length_bytes + if masked { 4 } else { 0 }
}

/// Append one frame to `buf`, returning the number of bytes written
///
/// The payload length uses the smallest length class that fits.
pub fn encode(frame: &Frame, buf: &mut Vec<u8>) -> Result<usize, FrameError> {
    let len = frame.payload.len();
    if frame.opcode.is_control() {
        if len > MAX_INLINE_LEN {
            return Err(FrameError::ControlFrameTooLong(len));
        }
        if !frame.fin {
            return Err(FrameError::FragmentedControlFrame);
        }
    }
    if len as u64 > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            len: len as u64,
            limit: MAX_FRAME_PAYLOAD,
        });
    }
    let mask_key = match (frame.masked, frame.mask_key) {
        (true, None) => return Err(FrameError::MissingMaskKey),
        (true, Some(key)) => Some(key),
        (false, _) => None,
    };

    let start = buf.len();
    buf.reserve(frame.encoded_len());

    let fin_bit = if frame.fin { 0x80 } else { 0 };
    buf.push(fin_bit | ((frame.rsv & 0x07) << 4) | frame.opcode.as_u8());

    let mask_bit = if mask_key.is_some() { 0x80 } else { 0 };
    match len {
        0..=MAX_INLINE_LEN => buf.push(mask_bit | len as u8),
        126..=0xFFFF => {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask_key {
        Some(key) => {
            buf.extend_from_slice(&key);
            let payload_start = buf.len();
            buf.extend_from_slice(&frame.payload);
            apply_mask(&mut buf[payload_start..], key);
        }
        None => buf.extend_from_slice(&frame.payload),
    }

    Ok(buf.len() - start)
}

/// Parse the next frame from the start of `buf`
pub fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    decode_with_limit(buf, MAX_FRAME_PAYLOAD)
}

/// Parse the next frame, rejecting declared payloads over `max_payload`
///
/// The limit is checked as soon as the length field is readable so an
/// oversized frame fails before its payload is buffered.
pub fn decode_with_limit(buf: &[u8], max_payload: u64) -> Result<Decoded, FrameError> {
    let &[b0, b1, ..] = buf else {
        return Ok(Decoded::NeedMoreData);
    };

    let fin = b0 & 0x80 != 0;
    let rsv = (b0 >> 4) & 0x07;
    if rsv != 0 {
        return Err(FrameError::ReservedBits);
    }
    let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(FrameError::InvalidOpcode(b0 & 0x0F))?;

    let masked = b1 & 0x80 != 0;
    let (payload_len, mut offset) = match b1 & 0x7F {
        126 => match buf.get(2..4) {
            Some(bytes) => (u64::from(u16::from_be_bytes([bytes[0], bytes[1]])), 4),
            None => return Ok(Decoded::NeedMoreData),
        },
        127 => match buf.get(2..10) {
            Some(bytes) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                (u64::from_be_bytes(raw), 10)
            }
            None => return Ok(Decoded::NeedMoreData),
        },
        n => (u64::from(n), 2),
    };

    if opcode.is_control() {
        if payload_len > MAX_INLINE_LEN as u64 {
            return Err(FrameError::ControlFrameTooLong(payload_len as usize));
        }
        if !fin {
            return Err(FrameError::FragmentedControlFrame);
        }
    }
    let limit = max_payload.min(MAX_FRAME_PAYLOAD);
    if payload_len > limit {
        return Err(FrameError::PayloadTooLarge {
            len: payload_len,
            limit,
        });
    }

    let mask_key = if masked {
        let Some(bytes) = buf.get(offset..offset + 4) else {
            return Ok(Decoded::NeedMoreData);
        };
        offset += 4;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    let payload_len = payload_len as usize;
    let Some(raw) = buf.get(offset..offset + payload_len) else {
        return Ok(Decoded::NeedMoreData);
    };
    let mut payload = raw.to_vec();
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            fin,
            rsv,
            opcode,
            masked,
            mask_key,
            payload,
        },
        consumed: offset + payload_len,
    })
}
