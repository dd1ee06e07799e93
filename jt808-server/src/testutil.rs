//! Test helpers: an in-process terminal emulator speaking the uplink side
//! of the protocol.

use bytes::{Bytes, BytesMut};
use jt808_protocol::frame::encode_frame;
use jt808_protocol::message::Uplink;
use jt808_protocol::{Downlink, Fragment, FrameBuffer, Header, PhoneNumber};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Builds a connected TCP pair plus the client's address as seen by the
/// server side.
pub(crate) async fn tcp_pair() -> (TcpStream, TcpStream, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, peer) = listener.accept().await.unwrap();
    (server, client, peer)
}

/// Minimal terminal emulator: frames uplink messages with its own flow
/// counter and decodes downlink frames from the server.
pub(crate) struct FakeTerminal {
    stream: TcpStream,
    buffer: FrameBuffer,
    phone: PhoneNumber,
    flow: u16,
}

impl FakeTerminal {
    pub fn new(stream: TcpStream, digits: &str) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::new(),
            phone: PhoneNumber::from_digits(digits).unwrap(),
            flow: 0,
        }
    }

    pub async fn connect(addr: SocketAddr, digits: &str) -> Self {
        Self::new(TcpStream::connect(addr).await.unwrap(), digits)
    }

    fn frame(&mut self, message: &Uplink, fragment: Option<Fragment>) -> BytesMut {
        let mut body = BytesMut::new();
        message.encode_body(&mut body);
        self.flow = self.flow.wrapping_add(1);
        let header = Header::for_body(message.message_id(), self.phone, self.flow, &body, fragment);
        encode_frame(&header, &body)
    }

    pub async fn send(&mut self, message: &Uplink) {
        self.send_with(message, None).await;
    }

    pub async fn send_with(&mut self, message: &Uplink, fragment: Option<Fragment>) {
        let frame = self.frame(message, fragment);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn recv(&mut self) -> (Header, Bytes) {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.buffer.next_frame().unwrap() {
                return frame;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection");
            self.buffer.extend(&buf[..n]);
        }
    }

    /// Attempts to read; returns `None` once the server closes the socket.
    pub async fn try_recv(&mut self) -> Option<(Header, Bytes)> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.buffer.next_frame().unwrap() {
                return Some(frame);
            }
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buffer.extend(&buf[..n]),
            }
        }
    }

    /// Sends a register frame and returns the decoded register response.
    pub async fn register(&mut self) -> Downlink {
        self.send(&Uplink::Register {
            province: 0,
            city: 0,
            manufacturer_id: *b"VMFGA",
        })
        .await;
        let (header, body) = self.recv().await;
        Downlink::decode(&header, &body).unwrap()
    }

    /// Sends an authentication frame and returns the decoded unified
    /// response.
    pub async fn authenticate(&mut self, code: [u8; 4]) -> Downlink {
        self.send(&Uplink::Authentication {
            code: code.to_vec(),
        })
        .await;
        let (header, body) = self.recv().await;
        Downlink::decode(&header, &body).unwrap()
    }

    /// Runs the full register + authenticate handshake with the decimal
    /// authcode as stored in the terminal database.
    pub async fn handshake(&mut self, authcode: u32) {
        match self.register().await {
            Downlink::RegisterResponse { result, auth_code, .. } => {
                assert!(result.is_success(), "register rejected: {result:?}");
                assert_eq!(auth_code, Some(authcode.to_le_bytes()));
            }
            other => panic!("unexpected register reply: {other:?}"),
        }
        match self.authenticate(authcode.to_le_bytes()).await {
            Downlink::UnifiedResponse(response) => {
                assert!(response.result.is_success(), "authentication rejected");
            }
            other => panic!("unexpected authentication reply: {other:?}"),
        }
    }
}
