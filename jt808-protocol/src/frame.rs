//! Binary frame format for JT/T 808.
//!
//! Frame layout on the wire:
//!
//! ```text
//! +------+--------------------------------------------------+-----+------+
//! | 0x7E | escaped( header | [fragment] | body | bcc )      |     | 0x7E |
//! +------+--------------------------------------------------+-----+------+
//! ```
//!
//! The 12-byte header:
//!
//! ```text
//! +------------+-----------+--------------+-------------+
//! | message_id | attribute | phone number | flow_number |
//! |  2 bytes   |  2 bytes  | 6 bytes BCD  |   2 bytes   |
//! +------------+-----------+--------------+-------------+
//! ```
//!
//! When the attribute's fragmentation bit is set, `total_packets` and
//! `packet_index` (2 bytes each) follow the header before the body. The BCC
//! is the XOR of every unescaped byte between the delimiters except itself.
//! All numeric fields are big-endian.

use crate::bcd::PhoneNumber;
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame delimiter, escaped inside the payload.
pub const FRAME_DELIMITER: u8 = 0x7E;

/// Escape introducer.
pub const FRAME_ESCAPE: u8 = 0x7D;

const ESCAPED_ESCAPE: u8 = 0x01;
const ESCAPED_DELIMITER: u8 = 0x02;

/// Size of the fixed header in bytes (2+2+6+2).
pub const HEADER_SIZE: usize = 12;

/// Maximum logical body length representable in the attribute word (10 bits).
pub const MAX_BODY_SIZE: usize = 1023;

/// Replaces every `0x7E` with `0x7D 0x02` and every `0x7D` with `0x7D 0x01`.
pub fn escape(src: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(src.len() + src.len() / 8 + 4);
    for &b in src {
        match b {
            FRAME_DELIMITER => {
                out.put_u8(FRAME_ESCAPE);
                out.put_u8(ESCAPED_DELIMITER);
            }
            FRAME_ESCAPE => {
                out.put_u8(FRAME_ESCAPE);
                out.put_u8(ESCAPED_ESCAPE);
            }
            _ => out.put_u8(b),
        }
    }
    out
}

/// Inverse of [`escape`]. A `0x7D` not followed by `0x01` or `0x02` is a
/// decode error.
pub fn unescape(src: &[u8]) -> Result<BytesMut, ProtocolError> {
    let mut out = BytesMut::with_capacity(src.len());
    let mut iter = src.iter();
    while let Some(&b) = iter.next() {
        if b != FRAME_ESCAPE {
            out.put_u8(b);
            continue;
        }
        match iter.next() {
            Some(&ESCAPED_ESCAPE) => out.put_u8(FRAME_ESCAPE),
            Some(&ESCAPED_DELIMITER) => out.put_u8(FRAME_DELIMITER),
            Some(&other) => return Err(ProtocolError::InvalidEscape(other)),
            None => return Err(ProtocolError::DanglingEscape),
        }
    }
    Ok(out)
}

/// Block check character: XOR of all input bytes.
pub fn bcc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b)
}

/// Message body attribute word.
///
/// Bit layout: body length in the low 10 bits, a 3-bit encryption field at
/// bits 10-12, and the fragmentation flag at bit 13. Accessors only; the
/// in-memory representation is the opaque wire word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyAttribute(u16);

impl BodyAttribute {
    const BODY_LEN_MASK: u16 = 0x03FF;
    const ENCRYPT_MASK: u16 = 0x1C00;
    const FRAGMENTED: u16 = 1 << 13;

    pub fn new(body_len: u16, fragmented: bool) -> Self {
        let mut bits = body_len & Self::BODY_LEN_MASK;
        if fragmented {
            bits |= Self::FRAGMENTED;
        }
        Self(bits)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn body_len(&self) -> u16 {
        self.0 & Self::BODY_LEN_MASK
    }

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPT_MASK != 0
    }

    pub fn is_fragmented(&self) -> bool {
        self.0 & Self::FRAGMENTED != 0
    }
}

/// Fragmentation counters carried between header and body.
///
/// `index` is 1-based; the final fragment has `index == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub total: u16,
    pub index: u16,
}

impl Fragment {
    pub fn is_last(&self) -> bool {
        self.index >= self.total
    }
}

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_id: u16,
    pub phone: PhoneNumber,
    pub flow_number: u16,
    /// Logical body length as carried in the attribute word.
    pub body_len: u16,
    pub fragment: Option<Fragment>,
}

impl Header {
    /// Builds a header whose attribute length field matches `body`.
    pub fn for_body(
        message_id: u16,
        phone: PhoneNumber,
        flow_number: u16,
        body: &[u8],
        fragment: Option<Fragment>,
    ) -> Self {
        Self {
            message_id,
            phone,
            flow_number,
            body_len: body.len() as u16,
            fragment,
        }
    }

    pub fn attribute(&self) -> BodyAttribute {
        BodyAttribute::new(self.body_len, self.fragment.is_some())
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.message_id);
        buf.put_u16(self.attribute().bits());
        buf.put_slice(self.phone.as_bytes());
        buf.put_u16(self.flow_number);
        if let Some(fragment) = self.fragment {
            buf.put_u16(fragment.total);
            buf.put_u16(fragment.index);
        }
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(ProtocolError::Truncated("header"));
        }
        let message_id = buf.get_u16();
        let attribute = BodyAttribute::from_bits(buf.get_u16());
        let mut phone = [0u8; 6];
        buf.copy_to_slice(&mut phone);
        let flow_number = buf.get_u16();
        let fragment = if attribute.is_fragmented() {
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated("fragment counters"));
            }
            Some(Fragment {
                total: buf.get_u16(),
                index: buf.get_u16(),
            })
        } else {
            None
        };
        Ok(Self {
            message_id,
            phone: PhoneNumber::from_bytes(phone),
            flow_number,
            body_len: attribute.body_len(),
            fragment,
        })
    }

    /// Size of the encoded header including fragment counters.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + if self.fragment.is_some() { 4 } else { 0 }
    }
}

/// Encodes a complete wire frame: delimiter, escaped payload with BCC,
/// delimiter.
pub fn encode_frame(header: &Header, body: &[u8]) -> BytesMut {
    let mut logical = BytesMut::with_capacity(header.encoded_len() + body.len() + 1);
    header.encode(&mut logical);
    logical.put_slice(body);
    let check = bcc(&logical);
    logical.put_u8(check);

    let escaped = escape(&logical);
    let mut wire = BytesMut::with_capacity(escaped.len() + 2);
    wire.put_u8(FRAME_DELIMITER);
    wire.put_slice(&escaped);
    wire.put_u8(FRAME_DELIMITER);
    wire
}

/// Decodes one wire frame into its header and logical body.
pub fn decode_frame(wire: &[u8]) -> Result<(Header, Bytes), ProtocolError> {
    if wire.len() < 2
        || wire[0] != FRAME_DELIMITER
        || wire[wire.len() - 1] != FRAME_DELIMITER
    {
        return Err(ProtocolError::MissingDelimiter);
    }

    let logical = unescape(&wire[1..wire.len() - 1])?;
    if logical.len() < HEADER_SIZE + 1 {
        return Err(ProtocolError::FrameTooShort(logical.len()));
    }

    let (payload, check) = logical.split_at(logical.len() - 1);
    let expected = bcc(payload);
    if expected != check[0] {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: check[0],
        });
    }

    let mut buf = Bytes::copy_from_slice(payload);
    let header = Header::decode(&mut buf)?;
    Ok((header, buf))
}

/// Streaming frame accumulator for a TCP byte stream.
///
/// Feed raw socket reads with [`extend`](Self::extend) and pull complete
/// frames with [`next_frame`](Self::next_frame). Bytes preceding the first
/// delimiter are discarded.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to decode the next complete frame from the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<(Header, Bytes)>, ProtocolError> {
        loop {
            // Drop noise ahead of the opening delimiter.
            match self.buffer.iter().position(|&b| b == FRAME_DELIMITER) {
                Some(0) => {}
                Some(start) => {
                    self.buffer.advance(start);
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }

            // Back-to-back delimiters separate frames; skip the stray one.
            if self.buffer.len() > 1 && self.buffer[1] == FRAME_DELIMITER {
                self.buffer.advance(1);
                continue;
            }

            let Some(end) = self.buffer[1..].iter().position(|&b| b == FRAME_DELIMITER)
            else {
                return Ok(None);
            };

            let wire = self.buffer.split_to(end + 2);
            return decode_frame(&wire).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone() -> PhoneNumber {
        PhoneNumber::from_digits("012345678901").unwrap()
    }

    #[test]
    fn test_escape_unescape_roundtrip() {
        let data = vec![0x00, 0x7E, 0x30, 0x7D, 0x7E, 0x7D, 0x01, 0x02, 0xFF];
        let escaped = escape(&data);
        assert!(!escaped[..].contains(&FRAME_DELIMITER));
        assert_eq!(&unescape(&escaped).unwrap()[..], &data[..]);
    }

    #[test]
    fn test_escape_expands_markers() {
        assert_eq!(&escape(&[0x7E])[..], &[0x7D, 0x02]);
        assert_eq!(&escape(&[0x7D])[..], &[0x7D, 0x01]);
    }

    #[test]
    fn test_unescape_rejects_bad_sequence() {
        assert!(matches!(
            unescape(&[0x30, 0x7D, 0x03]),
            Err(ProtocolError::InvalidEscape(0x03))
        ));
        assert!(matches!(
            unescape(&[0x30, 0x7D]),
            Err(ProtocolError::DanglingEscape)
        ));
    }

    #[test]
    fn test_bcc_self_cancelling() {
        let data = b"\x01\x02\x03\xF0";
        let mut with_check = data.to_vec();
        with_check.push(bcc(data));
        assert_eq!(bcc(&with_check), 0);
    }

    #[test]
    fn test_frame_roundtrip() {
        let body = vec![0x11, 0x7E, 0x22, 0x7D, 0x33];
        let header = Header::for_body(0x8103, phone(), 7, &body, None);
        let wire = encode_frame(&header, &body);

        let (decoded_header, decoded_body) = decode_frame(&wire).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(&decoded_body[..], &body[..]);
    }

    #[test]
    fn test_fragmented_frame_roundtrip() {
        let body = vec![0xAA; 16];
        let header = Header::for_body(
            0x8108,
            phone(),
            2,
            &body,
            Some(Fragment { total: 4, index: 2 }),
        );
        let wire = encode_frame(&header, &body);

        let (decoded, _) = decode_frame(&wire).unwrap();
        assert_eq!(decoded.fragment, Some(Fragment { total: 4, index: 2 }));
        assert!(decoded.attribute().is_fragmented());
    }

    #[test]
    fn test_corrupted_frame_fails_checksum() {
        let body = vec![0x01, 0x02, 0x03];
        let header = Header::for_body(0x0200, phone(), 1, &body, None);
        let mut wire = encode_frame(&header, &body);

        let mid = wire.len() / 2;
        wire[mid] ^= 0x10;
        assert!(matches!(
            decode_frame(&wire),
            Err(ProtocolError::ChecksumMismatch { .. })
                | Err(ProtocolError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_delimiter() {
        assert!(matches!(
            decode_frame(b"\x01\x02\x03"),
            Err(ProtocolError::MissingDelimiter)
        ));
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let wire = [0x7E, 0x01, 0x02, 0x7E];
        assert!(matches!(
            decode_frame(&wire),
            Err(ProtocolError::FrameTooShort(_))
        ));
    }

    // Literal register frame: phone 012345678901, flow 1, 5-byte zero body.
    #[test]
    fn test_decode_literal_frame() {
        let mut wire = vec![
            0x7E, 0x02, 0x00, 0x00, 0x05, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let check = bcc(&wire[1..]);
        wire.push(check);
        wire.push(0x7E);

        let (header, body) = decode_frame(&wire).unwrap();
        assert_eq!(header.message_id, 0x0200);
        assert_eq!(header.phone.digits(), "012345678901");
        assert_eq!(header.flow_number, 1);
        assert_eq!(header.body_len, 5);
        assert_eq!(body.len(), 5);
        assert!(body.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frame_buffer_partial_delivery() {
        let body = vec![0x10, 0x20, 0x30];
        let header = Header::for_body(0x0001, phone(), 3, &body, None);
        let wire = encode_frame(&header, &body);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&wire[..4]);
        assert!(buffer.next_frame().unwrap().is_none());

        buffer.extend(&wire[4..]);
        let (decoded, _) = buffer.next_frame().unwrap().unwrap();
        assert_eq!(decoded.message_id, 0x0001);
    }

    #[test]
    fn test_frame_buffer_multiple_frames() {
        let header1 = Header::for_body(0x0001, phone(), 1, &[0x01], None);
        let header2 = Header::for_body(0x0002, phone(), 2, &[0x02], None);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&encode_frame(&header1, &[0x01]));
        buffer.extend(&encode_frame(&header2, &[0x02]));

        let (first, _) = buffer.next_frame().unwrap().unwrap();
        let (second, _) = buffer.next_frame().unwrap().unwrap();
        assert_eq!(first.message_id, 0x0001);
        assert_eq!(second.message_id, 0x0002);
        assert!(buffer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frame_buffer_discards_leading_noise() {
        let body = vec![0x42];
        let header = Header::for_body(0x0102, phone(), 9, &body, None);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&[0x00, 0x11, 0x22]);
        buffer.extend(&encode_frame(&header, &body));

        let (decoded, decoded_body) = buffer.next_frame().unwrap().unwrap();
        assert_eq!(decoded.message_id, 0x0102);
        assert_eq!(&decoded_body[..], &[0x42]);
    }

    #[test]
    fn test_body_attribute_bits() {
        let attr = BodyAttribute::new(0x155, true);
        assert_eq!(attr.body_len(), 0x155);
        assert!(attr.is_fragmented());
        assert!(!attr.is_encrypted());

        let plain = BodyAttribute::from_bits(0x0005);
        assert_eq!(plain.body_len(), 5);
        assert!(!plain.is_fragmented());
    }
}
