//! Terminal parameter registry and typed parameter values.
//!
//! Parameter ids map to a fixed logical type. The table is closed: ids it
//! does not know decode as opaque [`ParameterValue::Unknown`] bytes and are
//! skipped when encoding a set request.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};

// Vendor parameter ranges.
pub const PARAM_STARTUP_GPS: u32 = 0xF000;
pub const PARAM_STARTUP_CDRADIO: u32 = 0xF001;
pub const PARAM_STARTUP_NTRIP_CORS: u32 = 0xF002;
pub const PARAM_STARTUP_NTRIP_SERVICE: u32 = 0xF003;
pub const PARAM_STARTUP_JT808_SERVICE: u32 = 0xF004;
pub const PARAM_GPS_LOGGGA: u32 = 0xF010;
pub const PARAM_GPS_LOGRMC: u32 = 0xF011;
pub const PARAM_GPS_LOGATT: u32 = 0xF012;
pub const PARAM_CDRADIO_BAUDERATE: u32 = 0xF020;
pub const PARAM_CDRADIO_WORKING_FREQ: u32 = 0xF021;
pub const PARAM_CDRADIO_RECEIVE_MODE: u32 = 0xF022;
pub const PARAM_CDRADIO_FORM_CODE: u32 = 0xF023;
pub const PARAM_NTRIP_CORS_IP: u32 = 0xF030;
pub const PARAM_NTRIP_CORS_PORT: u32 = 0xF031;
pub const PARAM_NTRIP_CORS_USERNAME: u32 = 0xF032;
pub const PARAM_NTRIP_CORS_PASSWORD: u32 = 0xF033;
pub const PARAM_NTRIP_CORS_MOUNTPOINT: u32 = 0xF034;
pub const PARAM_NTRIP_CORS_INTERVAL: u32 = 0xF035;
pub const PARAM_NTRIP_SERVICE_IP: u32 = 0xF040;
pub const PARAM_NTRIP_SERVICE_PORT: u32 = 0xF041;
pub const PARAM_NTRIP_SERVICE_USERNAME: u32 = 0xF042;
pub const PARAM_NTRIP_SERVICE_PASSWORD: u32 = 0xF043;
pub const PARAM_NTRIP_SERVICE_MOUNTPOINT: u32 = 0xF044;
pub const PARAM_NTRIP_SERVICE_INTERVAL: u32 = 0xF045;
pub const PARAM_JT808_SERVICE_IP: u32 = 0xF050;
pub const PARAM_JT808_SERVICE_PORT: u32 = 0xF051;
pub const PARAM_JT808_SERVICE_PHONE: u32 = 0xF052;
pub const PARAM_JT808_SERVICE_INTERVAL: u32 = 0xF053;

/// Logical type of a terminal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Byte,
    Word,
    Dword,
    String,
    Unknown,
}

impl ParameterType {
    /// Looks up the type for a parameter id.
    pub fn of(id: u32) -> Self {
        match id {
            // heartbeat, TCP/UDP/SMS timeouts and retransmit counts
            0x0001..=0x0007 => ParameterType::Dword,
            // position report strategy, plan and intervals
            0x0020..=0x0022 | 0x0027..=0x0029 => ParameterType::Dword,
            // report distance intervals and inflection angle
            0x002C..=0x0030 => ParameterType::Dword,
            // alarm shield/send/shoot/key words, max speed
            0x0050..=0x0055 => ParameterType::Dword,
            // GNSS mode, baud rate, output frequency, upload strategy
            0x0090..=0x0092 | 0x0094 => ParameterType::Byte,
            // GNSS collect frequency and upload setting
            0x0093 | 0x0095 => ParameterType::Dword,
            // CAN bus collect intervals
            0x0100 | 0x0102 => ParameterType::Dword,
            // CAN bus upload intervals
            0x0101 | 0x0103 => ParameterType::Word,
            // CAN id individual collection settings
            0x0110 => ParameterType::String,
            PARAM_STARTUP_GPS..=PARAM_STARTUP_JT808_SERVICE => ParameterType::Byte,
            PARAM_GPS_LOGGGA..=PARAM_GPS_LOGATT => ParameterType::Byte,
            PARAM_CDRADIO_BAUDERATE => ParameterType::Dword,
            PARAM_CDRADIO_WORKING_FREQ => ParameterType::Word,
            PARAM_CDRADIO_RECEIVE_MODE | PARAM_CDRADIO_FORM_CODE => ParameterType::Byte,
            PARAM_NTRIP_CORS_IP => ParameterType::String,
            PARAM_NTRIP_CORS_PORT => ParameterType::Word,
            PARAM_NTRIP_CORS_USERNAME..=PARAM_NTRIP_CORS_MOUNTPOINT => ParameterType::String,
            PARAM_NTRIP_CORS_INTERVAL => ParameterType::Byte,
            PARAM_NTRIP_SERVICE_IP => ParameterType::String,
            PARAM_NTRIP_SERVICE_PORT => ParameterType::Word,
            PARAM_NTRIP_SERVICE_USERNAME..=PARAM_NTRIP_SERVICE_MOUNTPOINT => {
                ParameterType::String
            }
            PARAM_NTRIP_SERVICE_INTERVAL => ParameterType::Byte,
            PARAM_JT808_SERVICE_IP | PARAM_JT808_SERVICE_PHONE => ParameterType::String,
            PARAM_JT808_SERVICE_PORT => ParameterType::Word,
            PARAM_JT808_SERVICE_INTERVAL => ParameterType::Byte,
            _ => ParameterType::Unknown,
        }
    }

    /// Fixed on-wire length for numeric types; 0 for string and unknown,
    /// whose length follows the value.
    pub fn fixed_len(&self) -> u8 {
        match self {
            ParameterType::Byte => 1,
            ParameterType::Word => 2,
            ParameterType::Dword => 4,
            ParameterType::String | ParameterType::Unknown => 0,
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Byte(u8),
    Word(u16),
    Dword(u32),
    Str(String),
    Unknown(Vec<u8>),
}

/// One terminal parameter tuple as exchanged in 0x8103/0x0104 bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub id: u32,
    pub value: ParameterValue,
}

impl Parameter {
    /// Parses an operator-supplied textual value according to the registry
    /// type of `id`.
    pub fn from_text(id: u32, text: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidParameterValue {
            id,
            value: text.to_string(),
        };
        let value = match ParameterType::of(id) {
            ParameterType::Byte => ParameterValue::Byte(text.parse().map_err(|_| invalid())?),
            ParameterType::Word => ParameterValue::Word(text.parse().map_err(|_| invalid())?),
            ParameterType::Dword => ParameterValue::Dword(text.parse().map_err(|_| invalid())?),
            ParameterType::String => ParameterValue::Str(text.to_string()),
            ParameterType::Unknown => ParameterValue::Unknown(text.as_bytes().to_vec()),
        };
        Ok(Self { id, value })
    }

    /// Interprets raw value bytes according to the registry type of `id`.
    /// Short numeric values are tolerated and read as smaller big-endian
    /// integers.
    pub fn from_wire(id: u32, bytes: &[u8]) -> Self {
        let as_uint = |bytes: &[u8]| bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let value = match ParameterType::of(id) {
            ParameterType::Byte => ParameterValue::Byte(as_uint(bytes) as u8),
            ParameterType::Word => ParameterValue::Word(as_uint(bytes) as u16),
            ParameterType::Dword => ParameterValue::Dword(as_uint(bytes) as u32),
            ParameterType::String => {
                ParameterValue::Str(String::from_utf8_lossy(bytes).into_owned())
            }
            ParameterType::Unknown => ParameterValue::Unknown(bytes.to_vec()),
        };
        Self { id, value }
    }

    /// On-wire length of the value bytes.
    pub fn wire_len(&self) -> u8 {
        match &self.value {
            ParameterValue::Byte(_) => 1,
            ParameterValue::Word(_) => 2,
            ParameterValue::Dword(_) => 4,
            ParameterValue::Str(s) => s.len().min(255) as u8,
            ParameterValue::Unknown(b) => b.len().min(255) as u8,
        }
    }

    /// Size of the whole tuple on the wire: id, length byte, value.
    pub fn encoded_len(&self) -> usize {
        5 + self.wire_len() as usize
    }

    /// Appends the tuple as `id(u32) | len(u8) | value`, numerics big-endian.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.id);
        buf.put_u8(self.wire_len());
        match &self.value {
            ParameterValue::Byte(v) => buf.put_u8(*v),
            ParameterValue::Word(v) => buf.put_u16(*v),
            ParameterValue::Dword(v) => buf.put_u32(*v),
            ParameterValue::Str(s) => buf.put_slice(&s.as_bytes()[..self.wire_len() as usize]),
            ParameterValue::Unknown(b) => buf.put_slice(&b[..self.wire_len() as usize]),
        }
    }

    /// Reads one tuple from a buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < 5 {
            return Err(ProtocolError::Truncated("parameter tuple"));
        }
        let id = buf.get_u32();
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::Truncated("parameter value"));
        }
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(Self::from_wire(id, &bytes))
    }

    /// Textual form of the value for operator replies: decimal for
    /// numerics, verbatim for strings.
    pub fn value_text(&self) -> String {
        match &self.value {
            ParameterValue::Byte(v) => v.to_string(),
            ParameterValue::Word(v) => v.to_string(),
            ParameterValue::Dword(v) => v.to_string(),
            ParameterValue::Str(s) => s.clone(),
            ParameterValue::Unknown(b) => b
                .iter()
                .take(4)
                .fold(0u32, |acc, &x| (acc << 8) | x as u32)
                .to_string(),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_uint(&self) -> Option<u32> {
        match &self.value {
            ParameterValue::Byte(v) => Some(*v as u32),
            ParameterValue::Word(v) => Some(*v as u32),
            ParameterValue::Dword(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.value, ParameterValue::Unknown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_types() {
        assert_eq!(ParameterType::of(PARAM_STARTUP_GPS), ParameterType::Byte);
        assert_eq!(
            ParameterType::of(PARAM_CDRADIO_BAUDERATE),
            ParameterType::Dword
        );
        assert_eq!(
            ParameterType::of(PARAM_NTRIP_CORS_PORT),
            ParameterType::Word
        );
        assert_eq!(
            ParameterType::of(PARAM_JT808_SERVICE_IP),
            ParameterType::String
        );
        assert_eq!(ParameterType::of(0x0001), ParameterType::Dword);
        assert_eq!(ParameterType::of(0x0090), ParameterType::Byte);
        assert_eq!(ParameterType::of(0x0101), ParameterType::Word);
        assert_eq!(ParameterType::of(0xDEAD), ParameterType::Unknown);
    }

    #[test]
    fn test_fixed_lengths() {
        assert_eq!(ParameterType::Byte.fixed_len(), 1);
        assert_eq!(ParameterType::Word.fixed_len(), 2);
        assert_eq!(ParameterType::Dword.fixed_len(), 4);
        assert_eq!(ParameterType::String.fixed_len(), 0);
        assert_eq!(ParameterType::Unknown.fixed_len(), 0);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let params = vec![
            Parameter::from_text(PARAM_STARTUP_GPS, "1").unwrap(),
            Parameter::from_text(PARAM_NTRIP_CORS_PORT, "2101").unwrap(),
            Parameter::from_text(PARAM_CDRADIO_BAUDERATE, "115200").unwrap(),
            Parameter::from_text(PARAM_NTRIP_CORS_IP, "203.0.113.9").unwrap(),
        ];
        let mut buf = BytesMut::new();
        for p in &params {
            p.encode(&mut buf);
        }

        let mut cursor = buf.freeze();
        for expected in &params {
            let decoded = Parameter::decode(&mut cursor).unwrap();
            assert_eq!(&decoded, expected);
        }
    }

    #[test]
    fn test_numeric_values_are_big_endian() {
        let param = Parameter::from_text(PARAM_NTRIP_CORS_PORT, "2101").unwrap();
        let mut buf = BytesMut::new();
        param.encode(&mut buf);
        // id(4) | len(1) | 0x0835
        assert_eq!(&buf[..], &[0x00, 0x00, 0xF0, 0x31, 0x02, 0x08, 0x35]);
    }

    #[test]
    fn test_unknown_id_is_opaque() {
        let param = Parameter::from_wire(0xDEAD, &[0xAB, 0xCD]);
        assert!(param.is_unknown());
        assert_eq!(param.wire_len(), 2);
    }

    #[test]
    fn test_from_text_rejects_bad_numeric() {
        assert!(Parameter::from_text(PARAM_STARTUP_GPS, "yes").is_err());
        assert!(Parameter::from_text(PARAM_NTRIP_CORS_PORT, "70000").is_err());
    }

    #[test]
    fn test_value_text() {
        assert_eq!(
            Parameter::from_text(PARAM_CDRADIO_BAUDERATE, "9600")
                .unwrap()
                .value_text(),
            "9600"
        );
        assert_eq!(
            Parameter::from_text(PARAM_NTRIP_CORS_USERNAME, "rover")
                .unwrap()
                .value_text(),
            "rover"
        );
    }

    #[test]
    fn test_short_numeric_value_tolerated() {
        let param = Parameter::from_wire(PARAM_CDRADIO_BAUDERATE, &[0x25, 0x80]);
        assert_eq!(param.as_uint(), Some(9600));
    }
}
