//! Message-level encoders and decoders for the supported downlink and
//! uplink message kinds.
//!
//! Downlink bodies are built by the server; uplink bodies are parsed from
//! terminal frames. Both directions are implemented so message round-trips
//! can be exercised without a live terminal.

use crate::area::{AreaAction, AreaKind, AreaSet, CircularArea, PolygonArea, RectangleArea};
use crate::bcd::PhoneNumber;
use crate::error::{ProtocolError, RegisterResult, ResultCode};
use crate::frame::{encode_frame, Fragment, Header, MAX_BODY_SIZE};
use crate::params::Parameter;
use bytes::{Buf, BufMut, BytesMut};

/// Maximum parameter payload per 0x8103 frame before fragmentation kicks in.
pub const MAX_PARAMETER_BODY: usize = 1022;

/// Cursor that reads big-endian fields and yields zeros once the buffer is
/// exhausted, matching the tolerance for short uplink bodies.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let value = self.buf.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        ((self.u8() as u16) << 8) | self.u8() as u16
    }

    fn u32(&mut self) -> u32 {
        ((self.u16() as u32) << 16) | self.u16() as u32
    }

    fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        for slot in &mut out {
            *slot = self.u8();
        }
        out
    }

    fn at(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }
}

/// Shared layout of the unified response (0x8001 / 0x0001) and the upgrade
/// result report (0x0108).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifiedResponse {
    /// Flow number of the frame being answered.
    pub respond_flow: u16,
    /// Message id of the frame being answered.
    pub respond_id: u16,
    pub result: ResultCode,
}

impl UnifiedResponse {
    pub fn success(respond_flow: u16, respond_id: u16) -> Self {
        Self {
            respond_flow,
            respond_id,
            result: ResultCode::Success,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.respond_flow);
        buf.put_u16(self.respond_id);
        buf.put_u8(self.result as u8);
    }

    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < 5 {
            return Err(ProtocolError::Truncated("unified response"));
        }
        let mut reader = Reader::new(body);
        Ok(Self {
            respond_flow: reader.u16(),
            respond_id: reader.u16(),
            result: ResultCode::from_u8(reader.u8()),
        })
    }
}

/// One 0x8108 firmware package, already chunked by the upgrade worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePackage {
    pub upgrade_type: u8,
    pub manufacturer_id: [u8; 5],
    pub version: String,
    pub data: Vec<u8>,
    /// Position of this package in the overall transfer; single-package
    /// transfers (`total == 1`) are sent unfragmented.
    pub part: Fragment,
}

/// Downlink messages the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Downlink {
    UnifiedResponse(UnifiedResponse),
    RegisterResponse {
        respond_flow: u16,
        result: RegisterResult,
        auth_code: Option<[u8; 4]>,
    },
    SetParameters(Vec<Parameter>),
    GetAllParameters,
    GetParameters(Vec<u32>),
    UpgradePackage(UpgradePackage),
    SetAreas {
        action: AreaAction,
        areas: AreaSet,
    },
    DeleteAreas {
        kind: AreaKind,
        ids: Vec<u32>,
    },
    PassThrough {
        kind: u8,
        data: Vec<u8>,
    },
}

impl Downlink {
    pub fn message_id(&self) -> u16 {
        match self {
            Downlink::UnifiedResponse(_) => crate::DOWN_UNIFIED_RESPONSE,
            Downlink::RegisterResponse { .. } => crate::DOWN_REGISTER_RESPONSE,
            Downlink::SetParameters(_) => crate::DOWN_SET_PARAMETERS,
            Downlink::GetAllParameters => crate::DOWN_GET_ALL_PARAMETERS,
            Downlink::GetParameters(_) => crate::DOWN_GET_PARAMETERS,
            Downlink::UpgradePackage(_) => crate::DOWN_UPGRADE_PACKAGE,
            Downlink::SetAreas { areas, .. } => areas.kind().set_message_id(),
            Downlink::DeleteAreas { kind, .. } => kind.delete_message_id(),
            Downlink::PassThrough { .. } => crate::DOWN_PASS_THROUGH,
        }
    }

    /// Serializes the message body. For `SetParameters` this writes a single
    /// unfragmented body; oversized parameter lists are split by
    /// [`Encoder::encode`].
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Downlink::UnifiedResponse(response) => response.encode(buf),
            Downlink::RegisterResponse {
                respond_flow,
                result,
                auth_code,
            } => {
                buf.put_u16(*respond_flow);
                buf.put_u8(*result as u8);
                if result.is_success() {
                    if let Some(code) = auth_code {
                        buf.put_slice(code);
                    }
                }
            }
            Downlink::SetParameters(params) => {
                encode_parameter_chunk(params.iter().filter(|p| !p.is_unknown()), buf);
            }
            Downlink::GetAllParameters => {}
            Downlink::GetParameters(ids) => {
                buf.put_u8(ids.len() as u8);
                for id in ids {
                    buf.put_u32(*id);
                }
            }
            Downlink::UpgradePackage(package) => {
                buf.put_u8(package.upgrade_type);
                buf.put_slice(&package.manufacturer_id);
                buf.put_u8(package.version.len() as u8);
                buf.put_slice(package.version.as_bytes());
                buf.put_u32(package.data.len() as u32);
                buf.put_slice(&package.data);
            }
            Downlink::SetAreas { action, areas } => {
                buf.put_u8(*action as u8);
                buf.put_u8(areas.len() as u8);
                match areas {
                    AreaSet::Circular(list) => {
                        for area in list {
                            area.encode(buf);
                        }
                    }
                    AreaSet::Rectangle(list) => {
                        for area in list {
                            area.encode(buf);
                        }
                    }
                    AreaSet::Polygon(list) => {
                        for area in list {
                            area.encode(buf);
                        }
                    }
                }
            }
            Downlink::DeleteAreas { ids, .. } => {
                buf.put_u8(ids.len() as u8);
                for id in ids {
                    buf.put_u32(*id);
                }
            }
            Downlink::PassThrough { kind, data } => {
                buf.put_u8(*kind);
                buf.put_slice(data);
            }
        }
    }

    /// Parses a downlink body; the counterpart of [`encode_body`] for
    /// emulators and tests.
    pub fn decode(header: &Header, body: &[u8]) -> Result<Self, ProtocolError> {
        match header.message_id {
            crate::DOWN_UNIFIED_RESPONSE => {
                Ok(Downlink::UnifiedResponse(UnifiedResponse::decode(body)?))
            }
            crate::DOWN_REGISTER_RESPONSE => {
                if body.len() < 3 {
                    return Err(ProtocolError::Truncated("register response"));
                }
                let mut reader = Reader::new(body);
                let respond_flow = reader.u16();
                let result = RegisterResult::from_u8(reader.u8());
                let auth_code = if result.is_success() && body.len() >= 7 {
                    Some(reader.bytes::<4>())
                } else {
                    None
                };
                Ok(Downlink::RegisterResponse {
                    respond_flow,
                    result,
                    auth_code,
                })
            }
            crate::DOWN_SET_PARAMETERS => {
                let mut buf = body;
                if buf.is_empty() {
                    return Err(ProtocolError::Truncated("parameter count"));
                }
                let count = buf.get_u8() as usize;
                let mut params = Vec::with_capacity(count);
                for _ in 0..count {
                    params.push(Parameter::decode(&mut buf)?);
                }
                Ok(Downlink::SetParameters(params))
            }
            crate::DOWN_GET_ALL_PARAMETERS => Ok(Downlink::GetAllParameters),
            crate::DOWN_GET_PARAMETERS => {
                let mut buf = body;
                if buf.is_empty() {
                    return Err(ProtocolError::Truncated("parameter id count"));
                }
                let count = buf.get_u8() as usize;
                if buf.remaining() < count * 4 {
                    return Err(ProtocolError::Truncated("parameter id list"));
                }
                let ids = (0..count).map(|_| buf.get_u32()).collect();
                Ok(Downlink::GetParameters(ids))
            }
            crate::DOWN_UPGRADE_PACKAGE => {
                let mut buf = body;
                if buf.remaining() < 7 {
                    return Err(ProtocolError::Truncated("upgrade package"));
                }
                let upgrade_type = buf.get_u8();
                let mut manufacturer_id = [0u8; 5];
                buf.copy_to_slice(&mut manufacturer_id);
                let version_len = buf.get_u8() as usize;
                if buf.remaining() < version_len + 4 {
                    return Err(ProtocolError::Truncated("upgrade version"));
                }
                let mut version = vec![0u8; version_len];
                buf.copy_to_slice(&mut version);
                let data_len = buf.get_u32() as usize;
                if buf.remaining() < data_len {
                    return Err(ProtocolError::Truncated("upgrade data"));
                }
                let mut data = vec![0u8; data_len];
                buf.copy_to_slice(&mut data);
                Ok(Downlink::UpgradePackage(UpgradePackage {
                    upgrade_type,
                    manufacturer_id,
                    version: String::from_utf8_lossy(&version).into_owned(),
                    data,
                    part: header.fragment.unwrap_or(Fragment { total: 1, index: 1 }),
                }))
            }
            id @ (crate::DOWN_SET_CIRCULAR_AREA
            | crate::DOWN_SET_RECTANGLE_AREA
            | crate::DOWN_SET_POLYGON_AREA) => {
                let mut buf = body;
                if buf.remaining() < 2 {
                    return Err(ProtocolError::Truncated("area set header"));
                }
                let action = AreaAction::from_u8(buf.get_u8());
                let count = buf.get_u8() as usize;
                let areas = match id {
                    crate::DOWN_SET_CIRCULAR_AREA => AreaSet::Circular(
                        (0..count)
                            .map(|_| CircularArea::decode(&mut buf))
                            .collect::<Result<_, _>>()?,
                    ),
                    crate::DOWN_SET_RECTANGLE_AREA => AreaSet::Rectangle(
                        (0..count)
                            .map(|_| RectangleArea::decode(&mut buf))
                            .collect::<Result<_, _>>()?,
                    ),
                    _ => AreaSet::Polygon(
                        (0..count)
                            .map(|_| PolygonArea::decode(&mut buf))
                            .collect::<Result<_, _>>()?,
                    ),
                };
                Ok(Downlink::SetAreas { action, areas })
            }
            id @ (crate::DOWN_DELETE_CIRCULAR_AREA
            | crate::DOWN_DELETE_RECTANGLE_AREA
            | crate::DOWN_DELETE_POLYGON_AREA) => {
                let mut buf = body;
                if buf.is_empty() {
                    return Err(ProtocolError::Truncated("area id count"));
                }
                let count = buf.get_u8() as usize;
                if buf.remaining() < count * 4 {
                    return Err(ProtocolError::Truncated("area id list"));
                }
                let ids = (0..count).map(|_| buf.get_u32()).collect();
                let kind = match id {
                    crate::DOWN_DELETE_CIRCULAR_AREA => AreaKind::Circular,
                    crate::DOWN_DELETE_RECTANGLE_AREA => AreaKind::Rectangle,
                    _ => AreaKind::Polygon,
                };
                Ok(Downlink::DeleteAreas { kind, ids })
            }
            crate::DOWN_PASS_THROUGH => {
                if body.is_empty() {
                    return Err(ProtocolError::Truncated("passthrough type"));
                }
                Ok(Downlink::PassThrough {
                    kind: body[0],
                    data: body[1..].to_vec(),
                })
            }
            other => Err(ProtocolError::UnsupportedMessage(other)),
        }
    }
}

fn encode_parameter_chunk<'a>(
    params: impl Iterator<Item = &'a Parameter>,
    buf: &mut BytesMut,
) {
    let count_pos = buf.len();
    buf.put_u8(0);
    let mut count: u8 = 0;
    for param in params {
        param.encode(buf);
        count += 1;
    }
    buf[count_pos] = count;
}

/// Splits a parameter list into chunks whose tuple payload stays within
/// [`MAX_PARAMETER_BODY`] bytes. `Unknown`-typed parameters are dropped.
pub fn split_parameters(params: &[Parameter]) -> Vec<Vec<Parameter>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_len = 0usize;
    for param in params.iter().filter(|p| !p.is_unknown()) {
        let len = param.encoded_len();
        if current_len + len > MAX_PARAMETER_BODY && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += len;
        current.push(param.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// GNSS alarm word. Typed accessors over the opaque wire value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmFlags(pub u32);

impl AlarmFlags {
    pub fn emergency(&self) -> bool {
        self.0 & 1 != 0
    }

    pub fn overspeed(&self) -> bool {
        self.0 & (1 << 1) != 0
    }

    pub fn gnss_fault(&self) -> bool {
        self.0 & (1 << 4) != 0
    }
}

/// GNSS status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    pub fn acc_on(&self) -> bool {
        self.0 & 1 != 0
    }

    pub fn positioned(&self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// Latitude hemisphere: set means south.
    pub fn south_latitude(&self) -> bool {
        self.0 & (1 << 2) != 0
    }

    /// Longitude hemisphere: set means west.
    pub fn west_longitude(&self) -> bool {
        self.0 & (1 << 3) != 0
    }
}

/// Decoded 0x0200 position report.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub alarm: AlarmFlags,
    pub status: StatusFlags,
    /// Units of 10⁻⁶ degrees.
    pub latitude: u32,
    pub longitude: u32,
    /// Meters.
    pub altitude: u16,
    /// Units of 0.1 km/h.
    pub speed: u16,
    /// Degrees clockwise from north.
    pub bearing: u16,
    /// BCD `YY MM DD hh mm ss`.
    pub timestamp: [u8; 6],
    pub satellites: Option<u8>,
    pub fix_status: Option<u8>,
}

impl PositionReport {
    pub fn latitude_deg(&self) -> f64 {
        self.latitude as f64 / 1_000_000.0
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude as f64 / 1_000_000.0
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed as f64 / 10.0
    }

    fn decode(body: &[u8]) -> Self {
        let mut reader = Reader::new(body);
        let alarm = AlarmFlags(reader.u32());
        let status = StatusFlags(reader.u32());
        let latitude = reader.u32();
        let longitude = reader.u32();
        let altitude = reader.u16();
        let speed = reader.u16();
        let bearing = reader.u16();
        let timestamp = reader.bytes::<6>();
        Self {
            alarm,
            status,
            latitude,
            longitude,
            altitude,
            speed,
            bearing,
            timestamp,
            satellites: reader.at(30),
            fix_status: reader.at(35),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.alarm.0);
        buf.put_u32(self.status.0);
        buf.put_u32(self.latitude);
        buf.put_u32(self.longitude);
        buf.put_u16(self.altitude);
        buf.put_u16(self.speed);
        buf.put_u16(self.bearing);
        buf.put_slice(&self.timestamp);
        if self.satellites.is_some() || self.fix_status.is_some() {
            buf.put_slice(&[0, 0]);
            buf.put_u8(self.satellites.unwrap_or(0));
        }
        if self.fix_status.is_some() {
            buf.put_slice(&[0, 0, 0, 0]);
            buf.put_u8(self.fix_status.unwrap_or(0));
        }
    }
}

/// Wall-clock stamp on a CAN upload: 5 BCD bytes `hh mm ss ms-hi ms-lo`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanTimestamp {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

fn bcd_byte(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

fn to_bcd_byte(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// One CAN frame inside a 0x0705 upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanItem {
    pub can_id: u32,
    pub data: [u8; 8],
}

/// Decoded 0x0705 CAN bus upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanBusData {
    pub timestamp: CanTimestamp,
    pub items: Vec<CanItem>,
}

impl CanBusData {
    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(body);
        let count = reader.u16() as usize;
        if count == 0 {
            return Ok(Self::default());
        }
        if body.len() < 2 + 5 + count * 12 {
            return Err(ProtocolError::Truncated("CAN items"));
        }
        let timestamp = CanTimestamp {
            hour: bcd_byte(reader.u8()),
            minute: bcd_byte(reader.u8()),
            second: bcd_byte(reader.u8()),
            millisecond: bcd_byte(reader.u8()) as u16 * 10 + bcd_byte(reader.u8()) as u16,
        };
        let items = (0..count)
            .map(|_| CanItem {
                can_id: reader.u32(),
                data: reader.bytes::<8>(),
            })
            .collect();
        Ok(Self { timestamp, items })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.items.len() as u16);
        if self.items.is_empty() {
            return;
        }
        buf.put_u8(to_bcd_byte(self.timestamp.hour));
        buf.put_u8(to_bcd_byte(self.timestamp.minute));
        buf.put_u8(to_bcd_byte(self.timestamp.second));
        buf.put_u8(to_bcd_byte((self.timestamp.millisecond / 10) as u8));
        buf.put_u8(to_bcd_byte((self.timestamp.millisecond % 10) as u8));
        for item in &self.items {
            buf.put_u32(item.can_id);
            buf.put_slice(&item.data);
        }
    }
}

/// Uplink messages the server understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Uplink {
    UnifiedResponse(UnifiedResponse),
    Register {
        province: u16,
        city: u16,
        manufacturer_id: [u8; 5],
    },
    Authentication {
        code: Vec<u8>,
    },
    ParameterReport {
        respond_flow: u16,
        params: Vec<Parameter>,
    },
    UpgradeResult(UnifiedResponse),
    PositionReport(PositionReport),
    PassThrough {
        kind: u8,
        data: Vec<u8>,
    },
    CanBus(CanBusData),
}

impl Uplink {
    pub fn message_id(&self) -> u16 {
        match self {
            Uplink::UnifiedResponse(_) => crate::UP_UNIFIED_RESPONSE,
            Uplink::Register { .. } => crate::UP_REGISTER,
            Uplink::Authentication { .. } => crate::UP_AUTHENTICATION,
            Uplink::ParameterReport { .. } => crate::UP_PARAMETER_REPORT,
            Uplink::UpgradeResult(_) => crate::UP_UPGRADE_RESULT,
            Uplink::PositionReport(_) => crate::UP_POSITION_REPORT,
            Uplink::PassThrough { .. } => crate::UP_PASS_THROUGH,
            Uplink::CanBus(_) => crate::UP_CAN_BUS,
        }
    }

    /// Parses an uplink body. Unlisted message ids are reported as
    /// [`ProtocolError::UnsupportedMessage`] so callers can skip them
    /// without tearing the connection down.
    pub fn decode(message_id: u16, body: &[u8]) -> Result<Self, ProtocolError> {
        match message_id {
            crate::UP_UNIFIED_RESPONSE => {
                Ok(Uplink::UnifiedResponse(UnifiedResponse::decode(body)?))
            }
            crate::UP_REGISTER => {
                let mut reader = Reader::new(body);
                Ok(Uplink::Register {
                    province: reader.u16(),
                    city: reader.u16(),
                    manufacturer_id: reader.bytes::<5>(),
                })
            }
            crate::UP_AUTHENTICATION => Ok(Uplink::Authentication {
                code: body.to_vec(),
            }),
            crate::UP_PARAMETER_REPORT => {
                let mut buf = body;
                if buf.remaining() < 3 {
                    return Err(ProtocolError::Truncated("parameter report header"));
                }
                let respond_flow = buf.get_u16();
                let count = buf.get_u8() as usize;
                let mut params = Vec::with_capacity(count);
                for _ in 0..count {
                    params.push(Parameter::decode(&mut buf)?);
                }
                Ok(Uplink::ParameterReport {
                    respond_flow,
                    params,
                })
            }
            crate::UP_UPGRADE_RESULT => Ok(Uplink::UpgradeResult(UnifiedResponse::decode(body)?)),
            crate::UP_POSITION_REPORT => Ok(Uplink::PositionReport(PositionReport::decode(body))),
            crate::UP_PASS_THROUGH => {
                if body.is_empty() {
                    return Err(ProtocolError::Truncated("passthrough type"));
                }
                Ok(Uplink::PassThrough {
                    kind: body[0],
                    data: body[1..].to_vec(),
                })
            }
            crate::UP_CAN_BUS => Ok(Uplink::CanBus(CanBusData::decode(body)?)),
            other => Err(ProtocolError::UnsupportedMessage(other)),
        }
    }

    /// Serializes an uplink body; the terminal-side counterpart used by
    /// emulators and tests.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Uplink::UnifiedResponse(response) => response.encode(buf),
            Uplink::Register {
                province,
                city,
                manufacturer_id,
            } => {
                buf.put_u16(*province);
                buf.put_u16(*city);
                buf.put_slice(manufacturer_id);
            }
            Uplink::Authentication { code } => buf.put_slice(code),
            Uplink::ParameterReport {
                respond_flow,
                params,
            } => {
                buf.put_u16(*respond_flow);
                encode_parameter_chunk(params.iter(), buf);
            }
            Uplink::UpgradeResult(response) => response.encode(buf),
            Uplink::PositionReport(report) => report.encode(buf),
            Uplink::PassThrough { kind, data } => {
                buf.put_u8(*kind);
                buf.put_slice(data);
            }
            Uplink::CanBus(data) => data.encode(buf),
        }
    }
}

/// Builds wire frames for downlink messages, assigning per-sender flow
/// numbers and fragmenting oversized parameter lists.
#[derive(Debug)]
pub struct Encoder {
    phone: PhoneNumber,
    flow: u16,
}

impl Encoder {
    pub fn new(phone: PhoneNumber) -> Self {
        Self { phone, flow: 0 }
    }

    pub fn set_phone(&mut self, phone: PhoneNumber) {
        self.phone = phone;
    }

    pub fn phone(&self) -> PhoneNumber {
        self.phone
    }

    fn next_flow(&mut self) -> u16 {
        self.flow = self.flow.wrapping_add(1);
        self.flow
    }

    /// Encodes a message into one or more wire frames.
    pub fn encode(&mut self, message: &Downlink) -> Result<Vec<BytesMut>, ProtocolError> {
        match message {
            Downlink::SetParameters(params) => {
                let chunks = split_parameters(params);
                if chunks.len() <= 1 {
                    let chunk = chunks.into_iter().next().unwrap_or_default();
                    return Ok(vec![self.frame(
                        crate::DOWN_SET_PARAMETERS,
                        &Downlink::SetParameters(chunk),
                        None,
                    )?]);
                }
                let total = chunks.len() as u16;
                chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, chunk)| {
                        self.frame(
                            crate::DOWN_SET_PARAMETERS,
                            &Downlink::SetParameters(chunk),
                            Some(Fragment {
                                total,
                                index: i as u16 + 1,
                            }),
                        )
                    })
                    .collect()
            }
            Downlink::UpgradePackage(package) => {
                let fragment = (package.part.total > 1).then_some(package.part);
                Ok(vec![self.frame(message.message_id(), message, fragment)?])
            }
            _ => Ok(vec![self.frame(message.message_id(), message, None)?]),
        }
    }

    fn frame(
        &mut self,
        message_id: u16,
        message: &Downlink,
        fragment: Option<Fragment>,
    ) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::new();
        message.encode_body(&mut body);
        if body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY_SIZE,
            });
        }
        let header = Header::for_body(message_id, self.phone, self.next_flow(), &body, fragment);
        Ok(encode_frame(&header, &body))
    }
}
