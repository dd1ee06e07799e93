//! Geofence area records for the 0x8600-0x8605 message family.
//!
//! Each record carries an attribute word whose `by_time` and `speed_limit`
//! bits govern whether the optional time-window and speed-limit fields are
//! present on the wire.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};

/// Area attribute word. Typed accessors over the opaque wire value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AreaAttribute(u16);

impl AreaAttribute {
    const BY_TIME: u16 = 1 << 0;
    const SPEED_LIMIT: u16 = 1 << 1;

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn by_time(&self) -> bool {
        self.0 & Self::BY_TIME != 0
    }

    pub fn speed_limit(&self) -> bool {
        self.0 & Self::SPEED_LIMIT != 0
    }

    pub fn with_by_time(mut self) -> Self {
        self.0 |= Self::BY_TIME;
        self
    }

    pub fn with_speed_limit(mut self) -> Self {
        self.0 |= Self::SPEED_LIMIT;
        self
    }
}

/// A latitude/longitude pair in units of 10⁻⁶ degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub latitude: u32,
    pub longitude: u32,
}

impl Coordinate {
    /// Converts decimal degrees into wire units.
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: (latitude * 1_000_000.0) as u32,
            longitude: (longitude * 1_000_000.0) as u32,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.latitude);
        buf.put_u32(self.longitude);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < 8 {
            return Err(ProtocolError::Truncated("coordinate"));
        }
        Ok(Self {
            latitude: buf.get_u32(),
            longitude: buf.get_u32(),
        })
    }
}

/// Optional activity window: 6-byte BCD `YYMMDDhhmmss` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: [u8; 6],
    pub end: [u8; 6],
}

/// Optional speed restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedLimit {
    /// Maximum speed in km/h.
    pub max_speed: u16,
    /// Seconds of sustained overspeed before the terminal raises an alarm.
    pub overspeed_duration: u8,
}

fn encode_optionals(
    attribute: AreaAttribute,
    time: Option<&TimeWindow>,
    speed: Option<&SpeedLimit>,
    buf: &mut BytesMut,
) {
    if attribute.by_time() {
        if let Some(window) = time {
            buf.put_slice(&window.start);
            buf.put_slice(&window.end);
        } else {
            buf.put_slice(&[0u8; 12]);
        }
    }
    if attribute.speed_limit() {
        let limit = speed.copied().unwrap_or(SpeedLimit {
            max_speed: 0,
            overspeed_duration: 0,
        });
        buf.put_u16(limit.max_speed);
        buf.put_u8(limit.overspeed_duration);
    }
}

fn decode_optionals(
    attribute: AreaAttribute,
    buf: &mut impl Buf,
) -> Result<(Option<TimeWindow>, Option<SpeedLimit>), ProtocolError> {
    let time = if attribute.by_time() {
        if buf.remaining() < 12 {
            return Err(ProtocolError::Truncated("area time window"));
        }
        let mut start = [0u8; 6];
        let mut end = [0u8; 6];
        buf.copy_to_slice(&mut start);
        buf.copy_to_slice(&mut end);
        Some(TimeWindow { start, end })
    } else {
        None
    };
    let speed = if attribute.speed_limit() {
        if buf.remaining() < 3 {
            return Err(ProtocolError::Truncated("area speed limit"));
        }
        Some(SpeedLimit {
            max_speed: buf.get_u16(),
            overspeed_duration: buf.get_u8(),
        })
    } else {
        None
    };
    Ok((time, speed))
}

/// Circular geofence: 18-byte fixed record plus optionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularArea {
    pub id: u32,
    pub attribute: AreaAttribute,
    pub center: Coordinate,
    pub radius: u32,
    pub time: Option<TimeWindow>,
    pub speed: Option<SpeedLimit>,
}

impl CircularArea {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.id);
        buf.put_u16(self.attribute.bits());
        self.center.encode(buf);
        buf.put_u32(self.radius);
        encode_optionals(self.attribute, self.time.as_ref(), self.speed.as_ref(), buf);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < 18 {
            return Err(ProtocolError::Truncated("circular area"));
        }
        let id = buf.get_u32();
        let attribute = AreaAttribute::from_bits(buf.get_u16());
        let center = Coordinate::decode(buf)?;
        let radius = buf.get_u32();
        let (time, speed) = decode_optionals(attribute, buf)?;
        Ok(Self {
            id,
            attribute,
            center,
            radius,
            time,
            speed,
        })
    }
}

/// Rectangular geofence: 22-byte fixed record plus optionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RectangleArea {
    pub id: u32,
    pub attribute: AreaAttribute,
    pub top_left: Coordinate,
    pub bottom_right: Coordinate,
    pub time: Option<TimeWindow>,
    pub speed: Option<SpeedLimit>,
}

impl RectangleArea {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.id);
        buf.put_u16(self.attribute.bits());
        self.top_left.encode(buf);
        self.bottom_right.encode(buf);
        encode_optionals(self.attribute, self.time.as_ref(), self.speed.as_ref(), buf);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < 22 {
            return Err(ProtocolError::Truncated("rectangle area"));
        }
        let id = buf.get_u32();
        let attribute = AreaAttribute::from_bits(buf.get_u16());
        let top_left = Coordinate::decode(buf)?;
        let bottom_right = Coordinate::decode(buf)?;
        let (time, speed) = decode_optionals(attribute, buf)?;
        Ok(Self {
            id,
            attribute,
            top_left,
            bottom_right,
            time,
            speed,
        })
    }
}

/// Polygonal geofence. The optional fields precede the vertex count and
/// vertex list; vertices are plain owned values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonArea {
    pub id: u32,
    pub attribute: AreaAttribute,
    pub time: Option<TimeWindow>,
    pub speed: Option<SpeedLimit>,
    pub vertices: Vec<Coordinate>,
}

impl PolygonArea {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.id);
        buf.put_u16(self.attribute.bits());
        encode_optionals(self.attribute, self.time.as_ref(), self.speed.as_ref(), buf);
        buf.put_u16(self.vertices.len() as u16);
        for vertex in &self.vertices {
            vertex.encode(buf);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < 6 {
            return Err(ProtocolError::Truncated("polygon area"));
        }
        let id = buf.get_u32();
        let attribute = AreaAttribute::from_bits(buf.get_u16());
        let (time, speed) = decode_optionals(attribute, buf)?;
        if buf.remaining() < 2 {
            return Err(ProtocolError::Truncated("polygon vertex count"));
        }
        let count = buf.get_u16() as usize;
        let mut vertices = Vec::with_capacity(count);
        for _ in 0..count {
            vertices.push(Coordinate::decode(buf)?);
        }
        Ok(Self {
            id,
            attribute,
            time,
            speed,
            vertices,
        })
    }
}

/// How a set-area request combines with areas already on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AreaAction {
    Update = 0,
    Append = 1,
    Modify = 2,
}

impl AreaAction {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AreaAction::Append,
            2 => AreaAction::Modify,
            _ => AreaAction::Update,
        }
    }

    /// Parses the operator keyword used on the control channel.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "update" => Some(AreaAction::Update),
            "append" => Some(AreaAction::Append),
            "modify" => Some(AreaAction::Modify),
            _ => None,
        }
    }
}

/// Geofence shape, selecting the set/delete message id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaKind {
    Circular,
    Rectangle,
    Polygon,
}

impl AreaKind {
    pub fn set_message_id(&self) -> u16 {
        match self {
            AreaKind::Circular => crate::DOWN_SET_CIRCULAR_AREA,
            AreaKind::Rectangle => crate::DOWN_SET_RECTANGLE_AREA,
            AreaKind::Polygon => crate::DOWN_SET_POLYGON_AREA,
        }
    }

    pub fn delete_message_id(&self) -> u16 {
        match self {
            AreaKind::Circular => crate::DOWN_DELETE_CIRCULAR_AREA,
            AreaKind::Rectangle => crate::DOWN_DELETE_RECTANGLE_AREA,
            AreaKind::Polygon => crate::DOWN_DELETE_POLYGON_AREA,
        }
    }
}

/// One homogeneous batch of areas for a single set request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AreaSet {
    Circular(Vec<CircularArea>),
    Rectangle(Vec<RectangleArea>),
    Polygon(Vec<PolygonArea>),
}

impl AreaSet {
    pub fn kind(&self) -> AreaKind {
        match self {
            AreaSet::Circular(_) => AreaKind::Circular,
            AreaSet::Rectangle(_) => AreaKind::Rectangle,
            AreaSet::Polygon(_) => AreaKind::Polygon,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AreaSet::Circular(areas) => areas.len(),
            AreaSet::Rectangle(areas) => areas.len(),
            AreaSet::Polygon(areas) => areas.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcd;

    fn window() -> TimeWindow {
        TimeWindow {
            start: bcd::compress_time("240101000000").unwrap(),
            end: bcd::compress_time("241231235959").unwrap(),
        }
    }

    #[test]
    fn test_attribute_bits() {
        let attr = AreaAttribute::default().with_by_time().with_speed_limit();
        assert!(attr.by_time());
        assert!(attr.speed_limit());
        assert_eq!(attr.bits(), 0x0003);
        assert!(!AreaAttribute::from_bits(0).by_time());
    }

    #[test]
    fn test_circular_roundtrip_bare() {
        let area = CircularArea {
            id: 0x10,
            attribute: AreaAttribute::default(),
            center: Coordinate::from_degrees(31.230416, 121.473701),
            radius: 500,
            time: None,
            speed: None,
        };
        let mut buf = BytesMut::new();
        area.encode(&mut buf);
        assert_eq!(buf.len(), 18);

        let decoded = CircularArea::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, area);
    }

    #[test]
    fn test_circular_roundtrip_with_optionals() {
        let area = CircularArea {
            id: 1,
            attribute: AreaAttribute::default().with_by_time().with_speed_limit(),
            center: Coordinate::from_degrees(39.9, 116.4),
            radius: 100,
            time: Some(window()),
            speed: Some(SpeedLimit {
                max_speed: 60,
                overspeed_duration: 10,
            }),
        };
        let mut buf = BytesMut::new();
        area.encode(&mut buf);
        assert_eq!(buf.len(), 18 + 12 + 3);

        let decoded = CircularArea::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, area);
    }

    #[test]
    fn test_rectangle_fixed_record_is_22_bytes() {
        let area = RectangleArea {
            id: 2,
            attribute: AreaAttribute::default(),
            top_left: Coordinate::from_degrees(40.0, 116.0),
            bottom_right: Coordinate::from_degrees(39.0, 117.0),
            time: None,
            speed: None,
        };
        let mut buf = BytesMut::new();
        area.encode(&mut buf);
        assert_eq!(buf.len(), 22);

        let decoded = RectangleArea::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, area);
    }

    #[test]
    fn test_polygon_optionals_precede_vertices() {
        let area = PolygonArea {
            id: 3,
            attribute: AreaAttribute::default().with_speed_limit(),
            time: None,
            speed: Some(SpeedLimit {
                max_speed: 80,
                overspeed_duration: 5,
            }),
            vertices: vec![
                Coordinate::from_degrees(30.0, 120.0),
                Coordinate::from_degrees(30.1, 120.1),
                Coordinate::from_degrees(30.0, 120.2),
            ],
        };
        let mut buf = BytesMut::new();
        area.encode(&mut buf);
        // id(4) + attr(2) + speed(3) + count(2) + 3 vertices(24)
        assert_eq!(buf.len(), 35);
        // vertex count sits after the speed limit fields
        assert_eq!(&buf[9..11], &[0x00, 0x03]);

        let decoded = PolygonArea::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, area);
    }

    #[test]
    fn test_truncated_area_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        buf.put_u16(AreaAttribute::default().with_by_time().bits());
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(50);
        // time window promised by the attribute but absent
        assert!(CircularArea::decode(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_action_keywords() {
        assert_eq!(AreaAction::from_keyword("update"), Some(AreaAction::Update));
        assert_eq!(AreaAction::from_keyword("append"), Some(AreaAction::Append));
        assert_eq!(AreaAction::from_keyword("modify"), Some(AreaAction::Modify));
        assert_eq!(AreaAction::from_keyword("replace"), None);
    }
}
