//! Steady-state terminal connections.
//!
//! Each authenticated terminal is owned by one task running [`serve`]. The
//! task multiplexes the socket with an inbound command queue, so an
//! operator dialog gets exclusive use of the socket for its duration
//! without touching any other terminal.

use crate::error::ServerError;
use crate::registry::TerminalRegistry;
use crate::upgrade;
use bytes::Bytes;
use jt808_protocol::area::{AreaAction, AreaKind, AreaSet};
use jt808_protocol::message::{Downlink, Encoder, UnifiedResponse, Uplink};
use jt808_protocol::{
    FrameBuffer, Header, Parameter, PhoneNumber, ProtocolError, ResultCode,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};

/// One synchronous request/response exchange with a terminal.
#[derive(Debug)]
pub enum DialogRequest {
    /// Query parameters; an empty id list queries everything.
    GetParameters(Vec<u32>),
    SetParameters(Vec<Parameter>),
    SetAreas { action: AreaAction, areas: AreaSet },
    DeleteAreas { kind: AreaKind, ids: Vec<u32> },
}

/// What a completed dialog hands back to the orchestrator.
#[derive(Debug)]
pub enum DialogReply {
    Done,
    Parameters(Vec<Parameter>),
}

/// A dialog paired with its reply channel.
#[derive(Debug)]
pub struct TerminalCommand {
    pub request: DialogRequest,
    pub reply: oneshot::Sender<Result<DialogReply, ServerError>>,
}

/// Everything the connection task can be asked to do.
#[derive(Debug)]
pub enum TerminalMessage {
    Dialog(TerminalCommand),
    /// Run the upgrade queued in the registry's pending slot.
    Upgrade,
}

/// A framed terminal socket with its downlink encoder.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: FrameBuffer,
    encoder: Encoder,
    read_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buffer: FrameBuffer::new(),
            encoder: Encoder::new(PhoneNumber::default()),
            read_timeout: None,
        }
    }

    /// Caps how long a single frame read may stall. Stands in for the
    /// kernel keepalive budget: a terminal silent past this point is
    /// considered dead, in dialogs and in steady state alike.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = Some(timeout);
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phone(&self) -> PhoneNumber {
        self.encoder.phone()
    }

    /// Adopts the phone number announced in a received header so downlink
    /// frames carry the terminal's identity.
    pub fn set_phone(&mut self, phone: PhoneNumber) {
        self.encoder.set_phone(phone);
    }

    /// Receives the next complete frame, retrying transient read errors.
    /// Stalls longer than the read timeout count as a dead terminal.
    pub async fn recv_frame(&mut self) -> Result<(Header, Bytes), ServerError> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.recv_frame_inner())
                .await
                .map_err(|_| ServerError::TerminalGone)?,
            None => self.recv_frame_inner().await,
        }
    }

    async fn recv_frame_inner(&mut self) -> Result<(Header, Bytes), ServerError> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(frame);
            }
            match self.stream.read(&mut buf).await {
                Ok(0) => return Err(ServerError::TerminalGone),
                Ok(n) => self.buffer.extend(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Encodes and writes a downlink message, one or more frames.
    pub async fn send(&mut self, message: &Downlink) -> Result<(), ServerError> {
        for frame in self.encoder.encode(message)? {
            self.stream.write_all(&frame).await?;
        }
        Ok(())
    }

    async fn send_ack(&mut self, header: &Header, result: ResultCode) -> Result<(), ServerError> {
        self.send(&Downlink::UnifiedResponse(UnifiedResponse {
            respond_flow: header.flow_number,
            respond_id: header.message_id,
            result,
        }))
        .await
    }

    /// Handles one steady-state uplink frame. Position reports and upgrade
    /// results are acknowledged; other uplinks are only logged.
    pub async fn handle_uplink(&mut self, header: &Header, body: &[u8]) -> Result<(), ServerError> {
        match Uplink::decode(header.message_id, body) {
            Ok(Uplink::PositionReport(report)) => {
                tracing::info!(
                    terminal = %header.phone,
                    latitude = report.latitude_deg(),
                    longitude = report.longitude_deg(),
                    altitude = report.altitude,
                    speed_kmh = report.speed_kmh(),
                    bearing = report.bearing,
                    "position report"
                );
                if let Some(satellites) = report.satellites {
                    tracing::debug!(terminal = %header.phone, satellites, "gnss satellites");
                }
                self.send_ack(header, ResultCode::Success).await
            }
            Ok(Uplink::UpgradeResult(result)) => {
                tracing::info!(
                    terminal = %header.phone,
                    result = ?result.result,
                    "upgrade result report"
                );
                self.send_ack(header, ResultCode::Success).await
            }
            Ok(Uplink::UnifiedResponse(response)) => {
                tracing::debug!(
                    terminal = %header.phone,
                    respond_id = format!("0x{:04X}", response.respond_id),
                    result = ?response.result,
                    "unsolicited unified response"
                );
                Ok(())
            }
            Ok(Uplink::CanBus(data)) => {
                tracing::info!(
                    terminal = %header.phone,
                    items = data.items.len(),
                    "CAN bus upload"
                );
                Ok(())
            }
            Ok(Uplink::PassThrough { kind, data }) => {
                tracing::info!(
                    terminal = %header.phone,
                    kind,
                    len = data.len(),
                    "uplink passthrough"
                );
                Ok(())
            }
            Ok(other) => {
                tracing::debug!(terminal = %header.phone, message = ?other, "ignored uplink");
                Ok(())
            }
            Err(ProtocolError::UnsupportedMessage(id)) => {
                tracing::warn!(
                    terminal = %header.phone,
                    message_id = format!("0x{id:04X}"),
                    "unknown uplink ignored"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one operator dialog to completion.
    pub async fn run_dialog(&mut self, request: DialogRequest) -> Result<DialogReply, ServerError> {
        match request {
            DialogRequest::GetParameters(ids) => {
                let message = if ids.is_empty() {
                    Downlink::GetAllParameters
                } else {
                    Downlink::GetParameters(ids)
                };
                self.send(&message).await?;
                self.collect_parameter_reports().await.map(DialogReply::Parameters)
            }
            DialogRequest::SetParameters(params) => {
                // one frame at a time, each acknowledged before the next
                let frames = self.encoder.encode(&Downlink::SetParameters(params))?;
                for frame in frames {
                    self.stream.write_all(&frame).await?;
                    self.await_unified(jt808_protocol::DOWN_SET_PARAMETERS).await?;
                }
                Ok(DialogReply::Done)
            }
            DialogRequest::SetAreas { action, areas } => {
                let message = Downlink::SetAreas { action, areas };
                let respond_id = message.message_id();
                self.send(&message).await?;
                self.await_unified(respond_id).await?;
                Ok(DialogReply::Done)
            }
            DialogRequest::DeleteAreas { kind, ids } => {
                let message = Downlink::DeleteAreas { kind, ids };
                let respond_id = message.message_id();
                self.send(&message).await?;
                self.await_unified(respond_id).await?;
                Ok(DialogReply::Done)
            }
        }
    }

    /// Accumulates 0x0104 reports, acknowledging each, until the final
    /// fragment arrives.
    async fn collect_parameter_reports(&mut self) -> Result<Vec<Parameter>, ServerError> {
        let mut collected = Vec::new();
        loop {
            let (header, body) = self.recv_frame().await?;
            match Uplink::decode(header.message_id, &body) {
                Ok(Uplink::ParameterReport { params, .. }) => {
                    self.send_ack(&header, ResultCode::Success).await?;
                    collected.extend(params);
                    if header.fragment.map_or(true, |f| f.is_last()) {
                        return Ok(collected);
                    }
                }
                Ok(other) => {
                    tracing::trace!(message = ?other, "skipped while awaiting parameter report");
                }
                Err(ProtocolError::UnsupportedMessage(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Waits for the uplink unified response answering `respond_id`.
    pub(crate) async fn await_unified(&mut self, respond_id: u16) -> Result<ResultCode, ServerError> {
        loop {
            let (header, body) = self.recv_frame().await?;
            match Uplink::decode(header.message_id, &body) {
                Ok(Uplink::UnifiedResponse(response)) if response.respond_id == respond_id => {
                    tracing::debug!(
                        respond_id = format!("0x{respond_id:04X}"),
                        result = ?response.result,
                        "terminal acknowledged"
                    );
                    return Ok(response.result);
                }
                Ok(other) => {
                    tracing::trace!(message = ?other, "skipped while awaiting acknowledgement");
                }
                Err(ProtocolError::UnsupportedMessage(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Drives one authenticated terminal until it disconnects, idles out or the
/// server shuts down. Always detaches the registry link on the way out.
pub async fn serve(
    mut conn: Connection,
    mut inbox: mpsc::Receiver<TerminalMessage>,
    registry: Arc<TerminalRegistry>,
    keepalive: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let phone = conn.phone();
    conn.set_read_timeout(keepalive);
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(TerminalMessage::Dialog(command)) => {
                    let result = conn.run_dialog(command.request).await;
                    let failed = result.is_err();
                    if let Err(e) = &result {
                        tracing::warn!(terminal = %phone, error = %e, "dialog failed");
                    }
                    let _ = command.reply.send(result);
                    if failed {
                        break;
                    }
                }
                Some(TerminalMessage::Upgrade) => {
                    let Some(job) = registry.take_pending_upgrade(&phone) else {
                        continue;
                    };
                    let manufacturer = registry.manufacturer_id(&phone).unwrap_or_default();
                    if let Err(e) = upgrade::run(&mut conn, &job, manufacturer).await {
                        tracing::warn!(terminal = %phone, error = %e, "firmware upgrade aborted");
                        break;
                    }
                }
                None => break,
            },
            frame = conn.recv_frame() => match frame {
                Ok((header, body)) => {
                    if let Err(e) = conn.handle_uplink(&header, &body).await {
                        tracing::debug!(terminal = %phone, error = %e, "uplink handling failed");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(terminal = %phone, error = %e, "terminal read failed");
                    break;
                }
            },
            _ = shutdown.recv() => break,
        }
    }
    registry.detach(&phone);
    tracing::info!(terminal = %phone, peer = %conn.peer(), "terminal disconnected");
}
