//! # jt808-protocol
//!
//! Wire protocol implementation for the JT/T 808 vehicle terminal link.
//!
//! This crate provides:
//! - Frame delimiting with byte-stuffing and BCC validation
//! - Message header pack/unpack including fragmentation counters
//! - Typed body encoders/decoders for the supported message set
//! - The terminal parameter registry and geofence area records
//! - Packed-BCD helpers for phone numbers and timestamps

pub mod area;
pub mod bcd;
pub mod error;
pub mod frame;
pub mod message;
pub mod params;

pub use bcd::PhoneNumber;
pub use error::{ProtocolError, RegisterResult, ResultCode};
pub use frame::{
    decode_frame, encode_frame, BodyAttribute, Fragment, FrameBuffer, Header, FRAME_DELIMITER,
    HEADER_SIZE, MAX_BODY_SIZE,
};
pub use message::{Downlink, Encoder, UnifiedResponse, Uplink};
pub use params::{Parameter, ParameterType, ParameterValue};

// Downlink message ids.
pub const DOWN_UNIFIED_RESPONSE: u16 = 0x8001;
pub const DOWN_REGISTER_RESPONSE: u16 = 0x8100;
pub const DOWN_SET_PARAMETERS: u16 = 0x8103;
pub const DOWN_GET_ALL_PARAMETERS: u16 = 0x8104;
pub const DOWN_GET_PARAMETERS: u16 = 0x8106;
pub const DOWN_UPGRADE_PACKAGE: u16 = 0x8108;
pub const DOWN_SET_CIRCULAR_AREA: u16 = 0x8600;
pub const DOWN_DELETE_CIRCULAR_AREA: u16 = 0x8601;
pub const DOWN_SET_RECTANGLE_AREA: u16 = 0x8602;
pub const DOWN_DELETE_RECTANGLE_AREA: u16 = 0x8603;
pub const DOWN_SET_POLYGON_AREA: u16 = 0x8604;
pub const DOWN_DELETE_POLYGON_AREA: u16 = 0x8605;
pub const DOWN_PASS_THROUGH: u16 = 0x8900;

// Uplink message ids.
pub const UP_UNIFIED_RESPONSE: u16 = 0x0001;
pub const UP_REGISTER: u16 = 0x0100;
pub const UP_AUTHENTICATION: u16 = 0x0102;
pub const UP_PARAMETER_REPORT: u16 = 0x0104;
pub const UP_UPGRADE_RESULT: u16 = 0x0108;
pub const UP_POSITION_REPORT: u16 = 0x0200;
pub const UP_CAN_BUS: u16 = 0x0705;
pub const UP_PASS_THROUGH: u16 = 0x0900;
