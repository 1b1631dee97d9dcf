//! WebSocket frame header parsing and frame serialization (RFC 6455).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if MASK set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Maximum close reason length: control payload minus the 2-byte code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1 (per-message compression).
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, when the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
    /// Header length in bytes, including extended length and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` while `buf` does not yet hold the complete header.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedOpcode` for reserved opcodes
    /// - `Error::ProtocolViolation` when the 64-bit length has its high bit set
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let [byte0, byte1, rest @ ..] = buf else {
            return Ok(None);
        };

        let opcode = OpCode::from_u8(*byte0)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, len_size) = match byte1 & 0x7F {
            126 => match rest {
                [a, b, ..] => (u64::from(u16::from_be_bytes([*a, *b])), 2),
                _ => return Ok(None),
            },
            127 => {
                let Some(ext) = rest.get(..8) else {
                    return Ok(None);
                };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(ext);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::ProtocolViolation(
                        "Payload length has its most significant bit set".into(),
                    ));
                }
                (len, 8)
            }
            n => (u64::from(n), 0),
        };

        let mask = if masked {
            let Some(key) = rest.get(len_size..len_size + 4) else {
                return Ok(None);
            };
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        Ok(Some(Self {
            fin: byte0 & 0x80 != 0,
            rsv1: byte0 & 0x40 != 0,
            rsv2: byte0 & 0x20 != 0,
            rsv3: byte0 & 0x10 != 0,
            opcode,
            mask,
            payload_len,
            header_len: 2 + len_size + if masked { 4 } else { 0 },
        }))
    }
}

/// A WebSocket frame with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1, set by per-message compression.
    pub rsv1: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Create a close frame. `None` produces an empty body.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = BytesMut::with_capacity(2 + reason.len());
                data.put_u16(code);
                data.put_slice(reason.as_bytes());
                data.freeze()
            }
            None => Bytes::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Number of bytes [`Frame::encode`] appends.
    #[must_use]
    pub fn encoded_len(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let ext = match len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        2 + ext + if masked { 4 } else { 0 } + len
    }

    /// Append the wire representation of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        dst.reserve(self.encoded_len(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();
        match len {
            0..=125 => dst.put_u8(mask_bit | len as u8),
            126..=65535 => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }
}

/// Decode the body of a close frame.
///
/// An empty body yields `Ok(None)`.
///
/// # Errors
///
/// - `Error::ProtocolViolation` for a 1-byte body
/// - `Error::InvalidCloseCode` for codes that may not appear on the wire
/// - `Error::InvalidUtf8` for a malformed reason
pub fn decode_close_payload(payload: &[u8]) -> Result<Option<CloseFrame>> {
    match payload {
        [] => Ok(None),
        [_] => Err(Error::ProtocolViolation(
            "Close frame body of a single byte".into(),
        )),
        [hi, lo, reason @ ..] => {
            let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
            if !code.is_valid() {
                return Err(Error::InvalidCloseCode(code.as_u16()));
            }
            let reason = std::str::from_utf8(reason)?;
            Ok(Some(CloseFrame::new(code, reason)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_masked_header() {
        // RFC 6455 Section 5.7: masked "Hello"
        let data = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f];
        let header = FrameHeader::parse(&data).unwrap().unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.header_len, 6);
    }

    #[test]
    fn test_parse_incomplete_header() {
        assert_eq!(FrameHeader::parse(&[]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x82]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x82, 0x7E, 0x01]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x82, 0xFF, 0, 0, 0, 0]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x82, 0x85, 1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn test_parse_extended_lengths() {
        let header = FrameHeader::parse(&[0x82, 0x7E, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(header.payload_len, 256);
        assert_eq!(header.header_len, 4);

        let header = FrameHeader::parse(&[0x82, 0x7F, 0, 0, 0, 0, 0, 1, 0, 0])
            .unwrap()
            .unwrap();
        assert_eq!(header.payload_len, 65536);
        assert_eq!(header.header_len, 10);
    }

    #[test]
    fn test_parse_rejects_msb_length() {
        let data = [0x82, 0x7F, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            FrameHeader::parse(&data),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_parse_rejects_reserved_opcode() {
        assert_eq!(
            FrameHeader::parse(&[0x83, 0x00]),
            Err(Error::ReservedOpcode(0x3))
        );
    }

    #[test]
    fn test_encode_unmasked_text() {
        let mut buf = BytesMut::new();
        Frame::new(true, OpCode::Text, &b"Hello"[..]).encode(&mut buf, None);
        assert_eq!(&buf[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_encode_masked_matches_rfc_example() {
        let mut buf = BytesMut::new();
        Frame::new(true, OpCode::Text, &b"Hello"[..])
            .encode(&mut buf, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_medium_payload_uses_16bit_length() {
        let frame = Frame::new(true, OpCode::Binary, vec![0u8; 300]);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, None);
        assert_eq!(&buf[..4], &[0x82, 0x7E, 0x01, 0x2C]);
        assert_eq!(buf.len(), frame.encoded_len(false));
    }

    #[test]
    fn test_encode_rsv1_and_continuation() {
        let mut frame = Frame::new(false, OpCode::Continuation, Bytes::new());
        frame.rsv1 = true;
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, None);
        assert_eq!(&buf[..], &[0x40, 0x00]);
    }

    #[test]
    fn test_close_frame_body() {
        let frame = Frame::close(Some(1000), "bye");
        assert_eq!(&frame.payload[..], &[0x03, 0xE8, b'b', b'y', b'e']);
        assert!(Frame::close(None, "ignored").payload.is_empty());
    }

    #[test]
    fn test_decode_close_payload() {
        assert_eq!(decode_close_payload(&[]).unwrap(), None);
        assert_eq!(
            decode_close_payload(&[0x0F, 0xA1, b'x']).unwrap(),
            Some(CloseFrame::new(CloseCode::Other(4001), "x"))
        );
        assert!(matches!(
            decode_close_payload(&[0x03]),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(
            decode_close_payload(&[0x03, 0xEE]),
            Err(Error::InvalidCloseCode(1006))
        );
        assert_eq!(
            decode_close_payload(&[0x03, 0xE8, 0xFF]),
            Err(Error::InvalidUtf8)
        );
    }
}
