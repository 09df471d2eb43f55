//! WebSocket frame codec (RFC 6455 Section 5.2).
//!
//! Stateless encode/decode of single, already-complete frames. Fragmented
//! messages are never reassembled.
//!
//! # Frame Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking-key, if MASK set to 1     |     Payload Data ...  |
//! +---------------------------------------+-----------------------+
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// FIN bit of the first header byte.
const FIN_BIT: u8 = 0b1000_0000;

/// Opcode bits of the first header byte.
const OPCODE_BITS: u8 = 0b0000_1111;

/// MASK bit of the second header byte.
const MASK_BIT: u8 = 0b1000_0000;

/// Length bits of the second header byte.
const LENGTH_BITS: u8 = 0b0111_1111;

/// Largest length encoded inline in the 7-bit field.
const MAX_INLINE_LENGTH: usize = 125;

/// 7-bit marker for a 16-bit extended length.
const LENGTH_16_MARKER: u8 = 126;

/// 7-bit marker for a 64-bit extended length.
const LENGTH_64_MARKER: u8 = 127;

// ============================================================================
// Opcode
// ============================================================================

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl Opcode {
    /// Parses the 4-bit opcode field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOpcode`] for reserved values.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(Error::invalid_opcode(value)),
        }
    }

    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One WebSocket frame.
///
/// `masked` on an outbound frame asks [`encode`] to generate a fresh mask;
/// on an inbound frame it reports whether the peer masked it. The payload is
/// always stored unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Mask flag.
    pub masked: bool,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame from its parts.
    #[inline]
    #[must_use]
    pub fn new(fin: bool, opcode: Opcode, masked: bool, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin,
            opcode,
            masked,
            payload: payload.into(),
        }
    }

    /// Creates a final, masked text frame.
    #[inline]
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(true, Opcode::Text, true, payload.into().into_bytes())
    }

    /// Creates a final, masked binary frame.
    #[inline]
    #[must_use]
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, Opcode::Binary, true, payload)
    }

    /// Creates a final, masked pong frame.
    #[inline]
    #[must_use]
    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, Opcode::Pong, true, payload)
    }

    /// Creates a final, masked close frame with an empty body.
    #[inline]
    #[must_use]
    pub fn close() -> Self {
        Self::new(true, Opcode::Close, true, Vec::new())
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    #[inline]
    #[must_use]
    pub fn text_payload(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Serializes a frame into wire bytes.
///
/// Masked frames get a fresh random 4-byte key per call.
#[must_use]
pub fn encode(frame: &Frame) -> Vec<u8> {
    let length = frame.payload.len();
    let mut data = Vec::with_capacity(length + 14);

    let mut byte_1 = frame.opcode as u8;
    if frame.fin {
        byte_1 |= FIN_BIT;
    }
    data.push(byte_1);

    let byte_2 = if frame.masked { MASK_BIT } else { 0 };
    if length > usize::from(u16::MAX) {
        data.push(byte_2 | LENGTH_64_MARKER);
        data.extend_from_slice(&(length as u64).to_be_bytes());
    } else if length > MAX_INLINE_LENGTH {
        data.push(byte_2 | LENGTH_16_MARKER);
        data.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        data.push(byte_2 | length as u8);
    }

    if frame.masked {
        let mask: [u8; 4] = rand::random();
        data.extend_from_slice(&mask);
        data.extend(
            frame
                .payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % 4]),
        );
    } else {
        data.extend_from_slice(&frame.payload);
    }

    data
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads one frame using a read-exactly-n capability.
///
/// `read(n)` must return exactly `n` bytes or fail; it is never asked for
/// more than the frame declares.
///
/// # Errors
///
/// - [`Error::InvalidOpcode`] for reserved opcodes
/// - [`Error::Protocol`] if a 64-bit length does not fit in memory
/// - Any error returned by `read`
pub fn decode<F>(mut read: F) -> Result<Frame>
where
    F: FnMut(usize) -> Result<Vec<u8>>,
{
    let header = read(2)?;
    let (byte_1, byte_2) = (header[0], header[1]);

    // RSV bits are ignored, no extension is negotiated.
    let fin = byte_1 & FIN_BIT != 0;
    let opcode = Opcode::from_u8(byte_1 & OPCODE_BITS)?;
    let masked = byte_2 & MASK_BIT != 0;

    let length = match byte_2 & LENGTH_BITS {
        LENGTH_16_MARKER => {
            let bytes = read(2)?;
            usize::from(u16::from_be_bytes([bytes[0], bytes[1]]))
        }
        LENGTH_64_MARKER => {
            let bytes = read(8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes);
            usize::try_from(u64::from_be_bytes(raw))
                .map_err(|_| Error::protocol("frame length exceeds addressable memory"))?
        }
        inline => usize::from(inline),
    };

    let mask = if masked {
        let bytes = read(4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    let mut payload = if length > 0 { read(length)? } else { Vec::new() };
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Frame {
        fin,
        opcode,
        masked,
        payload,
    })
}

/// Decodes one frame from the front of a byte slice.
///
/// Returns the frame and the number of bytes it occupied.
///
/// # Errors
///
/// Returns [`Error::BrokenFrame`] if the slice ends mid-frame.
pub fn decode_slice(data: &[u8]) -> Result<(Frame, usize)> {
    let mut offset = 0;
    let frame = decode(|n| {
        let end = offset + n;
        if end > data.len() {
            return Err(Error::broken_frame(data.len() - offset, n));
        }
        let chunk = data[offset..end].to_vec();
        offset = end;
        Ok(chunk)
    })?;
    Ok((frame, offset))
}

/// XORs `payload` in place with the 4-byte mask.
#[inline]
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let bytes = encode(frame);
        let (decoded, used) = decode_slice(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        decoded
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        for length in [0usize, 10, 130, 70000] {
            for masked in [false, true] {
                let payload: Vec<u8> = (0..length).map(|i| (i % 251) as u8).collect();
                let frame = Frame::new(true, Opcode::Binary, masked, payload.clone());
                let decoded = roundtrip(&frame);
                assert!(decoded.fin);
                assert_eq!(decoded.opcode, Opcode::Binary);
                assert_eq!(decoded.masked, masked);
                assert_eq!(decoded.payload, payload, "length {length}, masked {masked}");
            }
        }
    }

    #[test]
    fn test_length_header_thresholds() {
        let inline = encode(&Frame::new(true, Opcode::Text, false, vec![0; 125]));
        assert_eq!(inline[1], 125);
        assert_eq!(inline.len(), 2 + 125);

        let short = encode(&Frame::new(true, Opcode::Text, false, vec![0; 126]));
        assert_eq!(short[1], 126);
        assert_eq!(&short[2..4], &126u16.to_be_bytes());

        let long = encode(&Frame::new(true, Opcode::Text, false, vec![0; 65536]));
        assert_eq!(long[1], 127);
        assert_eq!(&long[2..10], &65536u64.to_be_bytes());
    }

    #[test]
    fn test_masked_frame_hides_payload() {
        let frame = Frame::new(true, Opcode::Text, true, b"PING\r\n".to_vec());
        let bytes = encode(&frame);
        assert_eq!(bytes[1] & MASK_BIT, MASK_BIT);
        assert_eq!(bytes.len(), 2 + 4 + 6);
        let mask = [bytes[2], bytes[3], bytes[4], bytes[5]];
        let mut body = bytes[6..].to_vec();
        apply_mask(&mut body, mask);
        assert_eq!(body, b"PING\r\n");
    }

    #[test]
    fn test_non_final_flag_survives() {
        let frame = Frame::new(false, Opcode::Continuation, false, b"part".to_vec());
        let decoded = roundtrip(&frame);
        assert!(!decoded.fin);
        assert_eq!(decoded.opcode, Opcode::Continuation);
    }

    #[test]
    fn test_decode_rejects_reserved_opcode() {
        let err = decode_slice(&[0x83, 0x00]).unwrap_err();
        assert!(matches!(err, Error::InvalidOpcode { opcode: 3 }));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let err = decode_slice(&[0x81, 0x05, b'h', b'e']).unwrap_err();
        assert!(matches!(err, Error::BrokenFrame { read: 2, expected: 5 }));
    }

    #[test]
    fn test_decode_server_ping() {
        let (frame, _) = decode_slice(&[0x89, 0x00]).unwrap();
        assert_eq!(frame.opcode, Opcode::Ping);
        assert!(frame.payload.is_empty());
        assert!(frame.opcode.is_control());
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::Pong.to_string(), "pong");
        assert_eq!(Opcode::Continuation.to_string(), "continuation");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            masked in any::<bool>(),
            fin in any::<bool>(),
        ) {
            let frame = Frame::new(fin, Opcode::Binary, masked, payload);
            let decoded = roundtrip(&frame);
            prop_assert_eq!(decoded, frame);
        }
    }
}
