//! Operator command orchestration.
//!
//! Parses whitespace-tokenized control-channel commands of the form
//! `<phone> <verb> [args...]`, runs the matching terminal dialog and
//! formats the single-line textual reply.

use crate::connection::{DialogReply, DialogRequest, TerminalCommand, TerminalMessage};
use crate::registry::{PendingUpgrade, TerminalLink, TerminalLookup, TerminalRegistry};
use jt808_protocol::area::{
    AreaAction, AreaAttribute, AreaKind, AreaSet, CircularArea, Coordinate, PolygonArea,
    RectangleArea, SpeedLimit, TimeWindow,
};
use jt808_protocol::bcd;
use jt808_protocol::params::{Parameter, ParameterType};
use std::sync::Arc;
use tokio::sync::oneshot;

pub const REPLY_COMPLETED: &str = "operation completed.";
pub const REPLY_FAILED: &str = "operation failed!!!";
pub const REPLY_NOT_CONNECTED: &str = "device has not connect!!!";
pub const REPLY_NO_SUCH_DEVICE: &str = "has not such device!!!";

const STARTUP_IDS: [u32; 5] = [0xF000, 0xF001, 0xF002, 0xF003, 0xF004];
const STARTUP_NAMES: [&str; 5] = ["gps", "cdradio", "ntripcors", "ntripservice", "jt808service"];
const GPS_IDS: [u32; 3] = [0xF010, 0xF011, 0xF012];
const GPS_NAMES: [&str; 3] = ["LOGGGA", "LOGRMC", "LOGATT"];
const CDRADIO_IDS: [u32; 4] = [0xF020, 0xF021, 0xF022, 0xF023];
const CDRADIO_KEYS: [&str; 4] = ["bauderate", "workfreqpoint", "recvmode", "formcode"];
const NTRIP_CORS_IDS: [u32; 6] = [0xF030, 0xF031, 0xF032, 0xF033, 0xF034, 0xF035];
const NTRIP_SERVICE_IDS: [u32; 6] = [0xF040, 0xF041, 0xF042, 0xF043, 0xF044, 0xF045];
const NTRIP_KEYS: [&str; 6] = [
    "ip",
    "port",
    "username",
    "password",
    "mountpoint",
    "reportinterval",
];
const JT808_SERVICE_IDS: [u32; 4] = [0xF050, 0xF051, 0xF052, 0xF053];
const JT808_SERVICE_KEYS: [&str; 4] = ["ip", "port", "phonenum", "reportinterval"];

/// Executes one operator command line and returns the textual reply.
pub async fn execute(line: &str, registry: &Arc<TerminalRegistry>) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((phone, rest)) = tokens.split_first() else {
        return REPLY_FAILED.to_string();
    };

    let link = match registry.lookup_digits(phone) {
        TerminalLookup::Unknown => return REPLY_NO_SUCH_DEVICE.to_string(),
        TerminalLookup::Offline => return REPLY_NOT_CONNECTED.to_string(),
        TerminalLookup::Online(link) => link,
    };

    let Some((verb, args)) = rest.split_first() else {
        return REPLY_FAILED.to_string();
    };

    let reply = match *verb {
        "upgrade" => handle_upgrade(phone, args, registry, &link).await,
        "get" => match args.first() {
            Some(profile) => get_profile(&link, profile).await,
            None => None,
        },
        "set" => match args.split_first() {
            Some((profile, values)) => set_profile(&link, profile, values).await,
            None => None,
        },
        "getterminalparameter" => get_raw_parameters(&link, args).await,
        "setterminalparameter" => set_raw_parameters(&link, args).await,
        "setcirculararea" => match parse_circular_areas(args) {
            Some((action, areas)) => set_areas(&link, action, AreaSet::Circular(areas)).await,
            None => None,
        },
        "setrectanglearea" => match parse_rectangle_areas(args) {
            Some((action, areas)) => set_areas(&link, action, AreaSet::Rectangle(areas)).await,
            None => None,
        },
        "setpolygonalarea" => match parse_polygon_areas(args) {
            Some((action, areas)) => set_areas(&link, action, AreaSet::Polygon(areas)).await,
            None => None,
        },
        "delcirculararea" => delete_areas(&link, AreaKind::Circular, args).await,
        "delrectanglearea" => delete_areas(&link, AreaKind::Rectangle, args).await,
        "delpolygonalarea" => delete_areas(&link, AreaKind::Polygon, args).await,
        _ => None,
    };
    reply.unwrap_or_else(|| REPLY_FAILED.to_string())
}

/// Sends one dialog into the terminal's queue and waits for its outcome.
async fn dialog(link: &TerminalLink, request: DialogRequest) -> Option<DialogReply> {
    let (reply_tx, reply_rx) = oneshot::channel();
    link.send(TerminalMessage::Dialog(TerminalCommand {
        request,
        reply: reply_tx,
    }))
    .await
    .ok()?;
    reply_rx.await.ok()?.ok()
}

async fn handle_upgrade(
    phone: &str,
    args: &[&str],
    registry: &Arc<TerminalRegistry>,
    link: &TerminalLink,
) -> Option<String> {
    let [kind, version, path] = args else {
        return None;
    };
    let upgrade_type = match *kind {
        "device" => 0x00,
        "gps" => 0x34,
        "cdradio" => 0x35,
        "system" => 0x36,
        _ => return None,
    };
    registry.set_pending_upgrade(
        phone,
        PendingUpgrade {
            upgrade_type,
            version: version.to_string(),
            file_path: (*path).into(),
        },
    );
    // the transfer runs detached in the terminal's task
    link.send(TerminalMessage::Upgrade).await.ok()?;
    Some(REPLY_COMPLETED.to_string())
}

async fn get_profile(link: &TerminalLink, profile: &str) -> Option<String> {
    let ids: &[u32] = match profile {
        "startup" => &STARTUP_IDS,
        "gps" => &GPS_IDS,
        "cdradio" => &CDRADIO_IDS,
        "ntripcors" => &NTRIP_CORS_IDS,
        "ntripservice" => &NTRIP_SERVICE_IDS,
        "jt808service" => &JT808_SERVICE_IDS,
        _ => return None,
    };
    let DialogReply::Parameters(params) =
        dialog(link, DialogRequest::GetParameters(ids.to_vec())).await?
    else {
        return None;
    };
    Some(match profile {
        "startup" => format_flag_profile("startup:", &STARTUP_IDS, &STARTUP_NAMES, &params),
        "gps" => format_flag_profile("gps:", &GPS_IDS, &GPS_NAMES, &params),
        "cdradio" => format_kv_profile("cdradio: ", &CDRADIO_IDS, &CDRADIO_KEYS, &params),
        "ntripcors" => format_kv_profile("ntripcors: ", &NTRIP_CORS_IDS, &NTRIP_KEYS, &params),
        "ntripservice" => {
            format_kv_profile("ntripservice: ", &NTRIP_SERVICE_IDS, &NTRIP_KEYS, &params)
        }
        _ => format_kv_profile(
            "jt808service: ",
            &JT808_SERVICE_IDS,
            &JT808_SERVICE_KEYS,
            &params,
        ),
    })
}

async fn set_profile(link: &TerminalLink, profile: &str, values: &[&str]) -> Option<String> {
    let params = match profile {
        "startup" => flag_parameters(&STARTUP_IDS, &STARTUP_NAMES, values),
        "gps" => flag_parameters(&GPS_IDS, &GPS_NAMES, values),
        "cdradio" => positional_parameters(&CDRADIO_IDS, values)?,
        "ntripcors" => positional_parameters(&NTRIP_CORS_IDS, values)?,
        "ntripservice" => positional_parameters(&NTRIP_SERVICE_IDS, values)?,
        "jt808service" => positional_parameters(&JT808_SERVICE_IDS, values)?,
        _ => return None,
    };
    dialog(link, DialogRequest::SetParameters(params)).await?;
    Some(REPLY_COMPLETED.to_string())
}

async fn get_raw_parameters(link: &TerminalLink, args: &[&str]) -> Option<String> {
    let ids = args
        .iter()
        .map(|arg| u32::from_str_radix(arg, 16).ok())
        .collect::<Option<Vec<u32>>>()?;
    let DialogReply::Parameters(params) =
        dialog(link, DialogRequest::GetParameters(ids)).await?
    else {
        return None;
    };
    let rendered: Vec<String> = params
        .iter()
        .map(|p| format!("{:04X}:{}", p.id, p.value_text()))
        .collect();
    Some(format!(
        "terminal parameter(id:value): {}",
        rendered.join(",")
    ))
}

async fn set_raw_parameters(link: &TerminalLink, args: &[&str]) -> Option<String> {
    let mut params = Vec::new();
    for arg in args {
        let (id, value) = arg.split_once(':')?;
        let id = u32::from_str_radix(id, 16).ok()?;
        // ids outside the registry are skipped, not an error
        if ParameterType::of(id) == ParameterType::Unknown {
            continue;
        }
        params.push(Parameter::from_text(id, value).ok()?);
    }
    if params.is_empty() {
        return Some(REPLY_COMPLETED.to_string());
    }
    dialog(link, DialogRequest::SetParameters(params)).await?;
    Some(REPLY_COMPLETED.to_string())
}

async fn set_areas(link: &TerminalLink, action: AreaAction, areas: AreaSet) -> Option<String> {
    if areas.is_empty() {
        return Some(REPLY_COMPLETED.to_string());
    }
    dialog(link, DialogRequest::SetAreas { action, areas }).await?;
    Some(REPLY_COMPLETED.to_string())
}

async fn delete_areas(link: &TerminalLink, kind: AreaKind, args: &[&str]) -> Option<String> {
    let ids = args
        .iter()
        .map(|arg| u32::from_str_radix(arg, 16).ok())
        .collect::<Option<Vec<u32>>>()?;
    dialog(link, DialogRequest::DeleteAreas { kind, ids }).await?;
    Some(REPLY_COMPLETED.to_string())
}

/// Boolean profile expansion: each named subsystem becomes 1 when its name
/// appears in the argument list.
fn flag_parameters(ids: &[u32], names: &[&str], values: &[&str]) -> Vec<Parameter> {
    ids.iter()
        .zip(names)
        .map(|(id, name)| {
            let enabled = values.contains(name);
            Parameter::from_text(*id, if enabled { "1" } else { "0" })
                .expect("flag parameters are byte-typed")
        })
        .collect()
}

/// Positional profile expansion: one value per id, in table order.
fn positional_parameters(ids: &[u32], values: &[&str]) -> Option<Vec<Parameter>> {
    if values.len() != ids.len() {
        return None;
    }
    ids.iter()
        .zip(values)
        .map(|(id, value)| Parameter::from_text(*id, value).ok())
        .collect()
}

fn param_by_id<'a>(params: &'a [Parameter], id: u32) -> Option<&'a Parameter> {
    params.iter().find(|p| p.id == id)
}

/// `startup: gps ntripcors ...` style reply: names of subsystems whose flag
/// decoded as 1.
fn format_flag_profile(
    prefix: &str,
    ids: &[u32],
    names: &[&str],
    params: &[Parameter],
) -> String {
    let mut out = prefix.to_string();
    for (id, name) in ids.iter().zip(names) {
        let enabled = param_by_id(params, *id).and_then(Parameter::as_uint) == Some(1);
        if enabled {
            out.push(' ');
            out.push_str(name);
        }
    }
    out
}

/// `ntripcors: ip=..,port=..` style reply.
fn format_kv_profile(prefix: &str, ids: &[u32], keys: &[&str], params: &[Parameter]) -> String {
    let rendered: Vec<String> = ids
        .iter()
        .zip(keys)
        .map(|(id, key)| {
            let value = param_by_id(params, *id)
                .map(Parameter::value_text)
                .unwrap_or_default();
            format!("{key}={value}")
        })
        .collect();
    format!("{prefix}{}", rendered.join(","))
}

/// Token cursor over area description arguments.
struct AreaTokens<'a> {
    tokens: std::slice::Iter<'a, &'a str>,
}

impl<'a> AreaTokens<'a> {
    fn new(tokens: &'a [&'a str]) -> Self {
        Self {
            tokens: tokens.iter(),
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        self.tokens.next().copied()
    }

    fn is_empty(&self) -> bool {
        self.tokens.len() == 0
    }

    fn hex_u32(&mut self) -> Option<u32> {
        u32::from_str_radix(self.next()?, 16).ok()
    }

    fn attribute(&mut self) -> Option<AreaAttribute> {
        let bits = u16::from_str_radix(self.next()?, 16).ok()?;
        Some(AreaAttribute::from_bits(bits))
    }

    fn decimal<T: std::str::FromStr>(&mut self) -> Option<T> {
        self.next()?.parse().ok()
    }

    fn coordinate(&mut self) -> Option<Coordinate> {
        let latitude: f64 = self.decimal()?;
        let longitude: f64 = self.decimal()?;
        Some(Coordinate::from_degrees(latitude, longitude))
    }

    fn optionals(
        &mut self,
        attribute: AreaAttribute,
    ) -> Option<(Option<TimeWindow>, Option<SpeedLimit>)> {
        let time = if attribute.by_time() {
            Some(TimeWindow {
                start: bcd::compress_time(self.next()?).ok()?,
                end: bcd::compress_time(self.next()?).ok()?,
            })
        } else {
            None
        };
        let speed = if attribute.speed_limit() {
            Some(SpeedLimit {
                max_speed: self.decimal()?,
                overspeed_duration: self.decimal()?,
            })
        } else {
            None
        };
        Some((time, speed))
    }
}

fn parse_circular_areas(args: &[&str]) -> Option<(AreaAction, Vec<CircularArea>)> {
    let mut tokens = AreaTokens::new(args);
    let action = AreaAction::from_keyword(tokens.next()?)?;
    let mut areas = Vec::new();
    while !tokens.is_empty() {
        let id = tokens.hex_u32()?;
        let attribute = tokens.attribute()?;
        let center = tokens.coordinate()?;
        let radius = tokens.decimal()?;
        let (time, speed) = tokens.optionals(attribute)?;
        areas.push(CircularArea {
            id,
            attribute,
            center,
            radius,
            time,
            speed,
        });
    }
    Some((action, areas))
}

fn parse_rectangle_areas(args: &[&str]) -> Option<(AreaAction, Vec<RectangleArea>)> {
    let mut tokens = AreaTokens::new(args);
    let action = AreaAction::from_keyword(tokens.next()?)?;
    let mut areas = Vec::new();
    while !tokens.is_empty() {
        let id = tokens.hex_u32()?;
        let attribute = tokens.attribute()?;
        let top_left = tokens.coordinate()?;
        let bottom_right = tokens.coordinate()?;
        let (time, speed) = tokens.optionals(attribute)?;
        areas.push(RectangleArea {
            id,
            attribute,
            top_left,
            bottom_right,
            time,
            speed,
        });
    }
    Some((action, areas))
}

fn parse_polygon_areas(args: &[&str]) -> Option<(AreaAction, Vec<PolygonArea>)> {
    let mut tokens = AreaTokens::new(args);
    let action = AreaAction::from_keyword(tokens.next()?)?;
    let mut areas = Vec::new();
    while !tokens.is_empty() {
        let id = tokens.hex_u32()?;
        let attribute = tokens.attribute()?;
        let (time, speed) = tokens.optionals(attribute)?;
        let count: u16 = tokens.decimal()?;
        let vertices = (0..count)
            .map(|_| tokens.coordinate())
            .collect::<Option<Vec<_>>>()?;
        areas.push(PolygonArea {
            id,
            attribute,
            time,
            speed,
            vertices,
        });
    }
    Some((action, areas))
}
