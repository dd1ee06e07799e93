//! Gateway server: terminal listener plus operator control channel.

use crate::command;
use crate::config::Config;
use crate::connection::{self, Connection};
use crate::error::ServerError;
use crate::registry::TerminalRegistry;
use crate::session;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::broadcast;

/// Largest control command accepted in one request.
const MAX_CONTROL_COMMAND: usize = 64 * 1024;

/// The JT/T 808 gateway.
pub struct Server {
    config: Config,
    registry: Arc<TerminalRegistry>,
    listener: TcpListener,
    control: UnixListener,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Binds the terminal listener and the control socket.
    ///
    /// A stale control socket file from a previous run is removed before
    /// binding.
    pub async fn bind(config: Config, registry: TerminalRegistry) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.network.bind_addr()).await?;

        let socket_path = &config.control.socket_path;
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let control = UnixListener::bind(socket_path)?;

        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            config,
            registry: Arc::new(registry),
            listener,
            control,
            shutdown,
            running: AtomicBool::new(false),
        })
    }

    /// The terminal listener address, useful when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(Into::into)
    }

    pub fn registry(&self) -> Arc<TerminalRegistry> {
        self.registry.clone()
    }

    /// Runs the accept loops until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            addr = %self.local_addr()?,
            control = %self.config.control.socket_path.display(),
            terminals = self.registry.len(),
            "gateway listening"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => self.accept_terminal(stream, addr),
                    Err(e) => tracing::error!(error = %e, "terminal accept error"),
                },
                result = self.control.accept() => match result {
                    Ok((stream, _)) => {
                        let registry = self.registry.clone();
                        tokio::spawn(handle_control(stream, registry));
                    }
                    Err(e) => tracing::error!(error = %e, "control accept error"),
                },
                _ = shutdown_rx.recv() => {
                    tracing::info!("gateway shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.config.control.socket_path);
        Ok(())
    }

    fn accept_terminal(&self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.connected_count() >= self.config.network.max_terminals {
            tracing::warn!(peer = %addr, "terminal limit reached, rejecting connection");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
        }

        let registry = self.registry.clone();
        let keepalive = self.config.network.keepalive();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            handle_terminal(stream, addr, registry, keepalive, shutdown).await;
        });
    }

    /// Initiates shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn handle_terminal(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<TerminalRegistry>,
    keepalive: Duration,
    shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(peer = %addr, "terminal connected");
    let mut conn = Connection::new(stream, addr);

    let inbox = match tokio::time::timeout(keepalive, session::handshake(&mut conn, &registry))
        .await
    {
        Ok(Ok(inbox)) => inbox,
        Ok(Err(e)) => {
            tracing::debug!(peer = %addr, error = %e, "handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(peer = %addr, "handshake timed out");
            return;
        }
    };

    connection::serve(conn, inbox, registry, keepalive, shutdown).await;
}

/// Serves one control-channel client: a single textual command, a single
/// textual reply, then the connection is closed.
async fn handle_control(mut stream: UnixStream, registry: Arc<TerminalRegistry>) {
    let mut buf = vec![0u8; MAX_CONTROL_COMMAND];
    let n = match stream.read(&mut buf).await {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let line = String::from_utf8_lossy(&buf[..n]);
    let line = line.trim();
    tracing::info!(command = %line, "control command");

    let reply = command::execute(line, &registry).await;
    tracing::info!(reply = %reply, "control reply");
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        tracing::debug!(error = %e, "control reply write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTerminal;
    use jt808_protocol::message::{UnifiedResponse, Uplink};
    use jt808_protocol::params::PARAM_STARTUP_GPS;
    use jt808_protocol::{Downlink, Parameter, ResultCode, DOWN_GET_PARAMETERS};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.network.bind_ip = Some("127.0.0.1".parse().unwrap());
        config.network.port = 0;
        config.control.socket_path = dir.path().join("control.sock");
        config
    }

    async fn control_roundtrip(path: &PathBuf, line: &str) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    async fn start_server(records: &str) -> (TempDir, Arc<Server>, SocketAddr, PathBuf) {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let socket_path = config.control.socket_path.clone();
        let registry = TerminalRegistry::parse(records).unwrap();
        let server = Arc::new(Server::bind(config, registry).await.unwrap());
        let addr = server.local_addr().unwrap();

        let run_server = server.clone();
        tokio::spawn(async move {
            let _ = run_server.run().await;
        });
        tokio::task::yield_now().await;
        (dir, server, addr, socket_path)
    }

    #[tokio::test]
    async fn test_unknown_device_over_control_channel() {
        let (_dir, server, _addr, socket_path) = start_server("012345678901;12345").await;
        let reply = control_roundtrip(&socket_path, "999 get startup").await;
        assert_eq!(reply, "has not such device!!!");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_get_startup_end_to_end() {
        let (_dir, server, addr, socket_path) = start_server("012345678901;12345").await;

        let mut terminal = FakeTerminal::connect(addr, "012345678901").await;
        terminal.handshake(12345).await;

        // terminal side: answer the parameter query with 1,0,1,0,1
        let terminal_task = tokio::spawn(async move {
            let (header, body) = terminal.recv().await;
            assert_eq!(header.message_id, DOWN_GET_PARAMETERS);
            match Downlink::decode(&header, &body).unwrap() {
                Downlink::GetParameters(ids) => {
                    assert_eq!(ids, vec![0xF000, 0xF001, 0xF002, 0xF003, 0xF004]);
                }
                other => panic!("unexpected message: {other:?}"),
            }
            let values = ["1", "0", "1", "0", "1"];
            let params: Vec<Parameter> = (0..5)
                .map(|i| Parameter::from_text(0xF000 + i as u32, values[i]).unwrap())
                .collect();
            terminal
                .send(&Uplink::ParameterReport {
                    respond_flow: header.flow_number,
                    params,
                })
                .await;
            let _ = terminal.recv().await; // report acknowledgement
            terminal
        });

        let reply = control_roundtrip(&socket_path, "012345678901 get startup").await;
        assert_eq!(reply, "startup: gps ntripcors jt808service");

        drop(terminal_task.await.unwrap());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_offline_device_over_control_channel() {
        let (_dir, server, _addr, socket_path) = start_server("012345678901;12345").await;
        let reply = control_roundtrip(&socket_path, "012345678901 get startup").await;
        assert_eq!(reply, "device has not connect!!!");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_position_report_ack_end_to_end() {
        let (_dir, server, addr, _socket_path) = start_server("012345678901;12345").await;

        let mut terminal = FakeTerminal::connect(addr, "012345678901").await;
        terminal.handshake(12345).await;

        terminal
            .send(&Uplink::PositionReport(
                jt808_protocol::message::PositionReport {
                    alarm: Default::default(),
                    status: Default::default(),
                    latitude: 31_230_416,
                    longitude: 121_473_701,
                    altitude: 15,
                    speed: 420,
                    bearing: 90,
                    timestamp: [0x24, 0x03, 0x15, 0x10, 0x20, 0x30],
                    satellites: None,
                    fix_status: None,
                },
            ))
            .await;

        let (header, body) = terminal.recv().await;
        match Downlink::decode(&header, &body).unwrap() {
            Downlink::UnifiedResponse(UnifiedResponse {
                respond_id, result, ..
            }) => {
                assert_eq!(respond_id, jt808_protocol::UP_POSITION_REPORT);
                assert_eq!(result, ResultCode::Success);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_second_connection_for_same_phone_is_rejected() {
        let (_dir, server, addr, _socket_path) = start_server("012345678901;12345").await;

        let mut first = FakeTerminal::connect(addr, "012345678901").await;
        first.handshake(12345).await;

        let mut second = FakeTerminal::connect(addr, "012345678901").await;
        match second.register().await {
            Downlink::RegisterResponse { result, .. } => {
                assert_eq!(
                    result,
                    jt808_protocol::RegisterResult::TerminalAlreadyRegistered
                );
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        server.shutdown();
    }
}
