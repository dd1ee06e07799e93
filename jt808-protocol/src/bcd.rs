//! Packed BCD digit strings and the 6-byte terminal phone number.

use crate::error::ProtocolError;
use std::fmt;

/// Packs a decimal digit string into BCD, two digits per byte.
///
/// An odd-length input is padded with a leading zero digit.
pub fn compress(digits: &str) -> Result<Vec<u8>, ProtocolError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidBcd(digits.to_string()));
    }
    let padded: Vec<u8> = if digits.len() % 2 == 1 {
        std::iter::once(b'0').chain(digits.bytes()).collect()
    } else {
        digits.bytes().collect()
    };
    Ok(padded
        .chunks(2)
        .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
        .collect())
}

/// Expands packed BCD bytes back into a digit string.
pub fn expand(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((b & 0x0F) as u32, 16).unwrap_or('0'));
    }
    out
}

/// Packs a `YYMMDDhhmmss` digit string into a 6-byte BCD timestamp.
pub fn compress_time(digits: &str) -> Result<[u8; 6], ProtocolError> {
    if digits.len() != 12 {
        return Err(ProtocolError::InvalidBcd(digits.to_string()));
    }
    let bytes = compress(digits)?;
    let mut out = [0u8; 6];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Terminal phone number as carried in the message header: up to 12 decimal
/// digits packed into 6 BCD bytes, left-padded with zeros.
///
/// Equality and hashing operate on the wire image, so a registry keyed on
/// `PhoneNumber` compares byte-for-byte with the header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhoneNumber([u8; 6]);

impl PhoneNumber {
    pub fn from_digits(digits: &str) -> Result<Self, ProtocolError> {
        if digits.is_empty() || digits.len() > 12 {
            return Err(ProtocolError::InvalidPhoneNumber(digits.to_string()));
        }
        let padded = format!("{:0>12}", digits);
        let bytes =
            compress(&padded).map_err(|_| ProtocolError::InvalidPhoneNumber(digits.to_string()))?;
        let mut out = [0u8; 6];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// The full 12-digit expansion, leading zeros included.
    pub fn digits(&self) -> String {
        expand(&self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits())
    }
}
