//! Protocol error types and wire result codes.

use thiserror::Error;

/// Errors that can occur while framing or decoding JT/T 808 messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not delimited by 0x7E")]
    MissingDelimiter,

    #[error("invalid escape sequence: 0x7D followed by {0:#04x}")]
    InvalidEscape(u8),

    #[error("escape byte 0x7D at end of frame")]
    DanglingEscape,

    #[error("frame too short: {0} bytes after unescaping")]
    FrameTooShort(usize),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("message body truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unsupported message id {0:#06x}")]
    UnsupportedMessage(u16),

    #[error("invalid phone number {0:?}")]
    InvalidPhoneNumber(String),

    #[error("invalid BCD digit string {0:?}")]
    InvalidBcd(String),

    #[error("message body exceeds {max} bytes: {size}")]
    BodyTooLarge { size: usize, max: usize },

    #[error("invalid value {value:?} for parameter {id:#06x}")]
    InvalidParameterValue { id: u32, value: String },
}

/// Result byte carried by unified responses (both directions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    Failure = 1,
    MessageWrong = 2,
    NotSupported = 3,
}

impl ResultCode {
    /// Decodes a wire byte; unrecognized values collapse to `Failure`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ResultCode::Success,
            2 => ResultCode::MessageWrong,
            3 => ResultCode::NotSupported,
            _ => ResultCode::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

/// Result byte carried by the register response (0x8100).
///
/// `Success` shares the zero value with [`ResultCode::Success`], so the
/// handshake can test either code the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterResult {
    Success = 0,
    VehicleAlreadyRegistered = 1,
    NoSuchVehicle = 2,
    TerminalAlreadyRegistered = 3,
    NoSuchTerminal = 4,
}

impl RegisterResult {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RegisterResult::Success,
            1 => RegisterResult::VehicleAlreadyRegistered,
            2 => RegisterResult::NoSuchVehicle,
            3 => RegisterResult::TerminalAlreadyRegistered,
            _ => RegisterResult::NoSuchTerminal,
        }
    }

    pub fn is_success(self) -> bool {
        self == RegisterResult::Success
    }
}
