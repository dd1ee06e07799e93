//! Registration and authentication handshake.
//!
//! A freshly accepted socket must register and authenticate before it joins
//! the steady-state connection pool:
//!
//! ```text
//! AwaitingRegister -> AwaitingAuthentication -> Steady
//! ```
//!
//! Any unexpected message drops the connection without a reply.

use crate::connection::{Connection, TerminalMessage};
use crate::error::ServerError;
use crate::registry::{RegisterVerdict, TerminalRegistry};
use jt808_protocol::message::{Downlink, UnifiedResponse, Uplink};
use jt808_protocol::{RegisterResult, ResultCode, UP_AUTHENTICATION, UP_REGISTER};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handshake progress of a new terminal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRegister,
    AwaitingAuthentication,
    Steady,
}

/// Capacity of the per-terminal command queue.
const COMMAND_QUEUE_DEPTH: usize = 8;

/// Drives the handshake on a new connection. On success the terminal is
/// attached to the registry and the command queue receiver is returned for
/// the steady-state loop.
pub async fn handshake(
    conn: &mut Connection,
    registry: &Arc<TerminalRegistry>,
) -> Result<mpsc::Receiver<TerminalMessage>, ServerError> {
    let mut state = SessionState::AwaitingRegister;

    let (header, body) = conn.recv_frame().await?;
    if header.message_id != UP_REGISTER {
        tracing::debug!(
            peer = %conn.peer(),
            message_id = format!("0x{:04X}", header.message_id),
            ?state,
            "dropping connection: expected register"
        );
        return Err(ServerError::ProtocolViolation(header.message_id));
    }
    let manufacturer_id = match Uplink::decode(header.message_id, &body)? {
        Uplink::Register {
            manufacturer_id, ..
        } => manufacturer_id,
        _ => unreachable!("register id decodes to a register body"),
    };
    conn.set_phone(header.phone);

    let verdict = registry.register_verdict(&header.phone);
    let (result, auth_code) = match verdict {
        RegisterVerdict::Accepted { auth_code } => (RegisterResult::Success, Some(auth_code)),
        RegisterVerdict::AlreadyRegistered => (RegisterResult::TerminalAlreadyRegistered, None),
        RegisterVerdict::NoSuchTerminal => (RegisterResult::NoSuchTerminal, None),
        RegisterVerdict::NoSuchVehicle => (RegisterResult::NoSuchVehicle, None),
    };
    conn.send(&Downlink::RegisterResponse {
        respond_flow: header.flow_number,
        result,
        auth_code,
    })
    .await?;
    if !result.is_success() {
        tracing::info!(terminal = %header.phone, ?result, "registration rejected");
        return Err(ServerError::RegistryMiss);
    }
    state = SessionState::AwaitingAuthentication;

    let (header, body) = conn.recv_frame().await?;
    if header.message_id != UP_AUTHENTICATION {
        tracing::debug!(
            terminal = %conn.phone(),
            message_id = format!("0x{:04X}", header.message_id),
            ?state,
            "dropping connection: expected authentication"
        );
        return Err(ServerError::ProtocolViolation(header.message_id));
    }
    conn.set_phone(header.phone);
    let authenticated = registry.authenticate(&header.phone, &body);
    let response = Downlink::UnifiedResponse(UnifiedResponse {
        respond_flow: header.flow_number,
        respond_id: UP_AUTHENTICATION,
        result: if authenticated {
            ResultCode::Success
        } else {
            ResultCode::Failure
        },
    });
    if !authenticated {
        conn.send(&response).await?;
        tracing::info!(terminal = %header.phone, "authentication failed");
        return Err(ServerError::AuthenticationFailed);
    }

    // attach before replying so the terminal is addressable the moment it
    // sees the success response
    let (link, inbox) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    if !registry.attach(&conn.phone(), manufacturer_id, link) {
        // lost a race against a concurrent handshake for the same phone
        return Err(ServerError::RegistryMiss);
    }
    if let Err(e) = conn.send(&response).await {
        registry.detach(&conn.phone());
        return Err(e);
    }
    state = SessionState::Steady;
    tracing::info!(terminal = %conn.phone(), peer = %conn.peer(), ?state, "terminal authenticated");
    Ok(inbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{tcp_pair, FakeTerminal};
    use jt808_protocol::message::Uplink;
    use jt808_protocol::PhoneNumber;

    async fn setup(
        records: &str,
    ) -> (Connection, FakeTerminal, Arc<TerminalRegistry>) {
        let (server_stream, client_stream, peer) = tcp_pair().await;
        let conn = Connection::new(server_stream, peer);
        let terminal = FakeTerminal::new(client_stream, "012345678901");
        let registry = Arc::new(TerminalRegistry::parse(records).unwrap());
        (conn, terminal, registry)
    }

    #[tokio::test]
    async fn test_authentication_before_register_drops_silently() {
        let (mut conn, mut terminal, registry) = setup("012345678901;12345").await;

        let server = tokio::spawn(async move { handshake(&mut conn, &registry).await.err() });
        terminal
            .send(&Uplink::Authentication {
                code: 12345u32.to_le_bytes().to_vec(),
            })
            .await;

        let error = server.await.unwrap().expect("handshake must fail");
        assert!(matches!(error, ServerError::ProtocolViolation(_)));
        // no reply was sent before the drop
        assert!(terminal.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_phone_is_rejected_then_dropped() {
        let (mut conn, mut terminal, registry) = setup("019900001111;7").await;

        let server = tokio::spawn(async move { handshake(&mut conn, &registry).await.err() });
        match terminal.register().await {
            Downlink::RegisterResponse {
                result, auth_code, ..
            } => {
                assert_eq!(result, RegisterResult::NoSuchTerminal);
                assert_eq!(auth_code, None);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(matches!(
            server.await.unwrap(),
            Some(ServerError::RegistryMiss)
        ));
        assert!(terminal.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_reports_no_such_vehicle() {
        let (mut conn, mut terminal, registry) = setup("").await;

        tokio::spawn(async move { handshake(&mut conn, &registry).await.err() });
        match terminal.register().await {
            Downlink::RegisterResponse { result, .. } => {
                assert_eq!(result, RegisterResult::NoSuchVehicle);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_live_phone_is_rejected() {
        let (mut conn, mut terminal, registry) = setup("012345678901;12345").await;
        let (link, _inbox) = mpsc::channel(1);
        registry.attach(
            &PhoneNumber::from_digits("012345678901").unwrap(),
            *b"VMFGA",
            link,
        );

        tokio::spawn(async move { handshake(&mut conn, &registry).await.err() });
        match terminal.register().await {
            Downlink::RegisterResponse { result, .. } => {
                assert_eq!(result, RegisterResult::TerminalAlreadyRegistered);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_code_fails_authentication() {
        let (mut conn, mut terminal, registry) = setup("012345678901;12345").await;

        let server = tokio::spawn(async move { handshake(&mut conn, &registry).await.err() });
        terminal.register().await;
        match terminal.authenticate([0xFF; 4]).await {
            Downlink::UnifiedResponse(response) => {
                assert_eq!(response.result, ResultCode::Failure);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(matches!(
            server.await.unwrap(),
            Some(ServerError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_successful_handshake_attaches_terminal() {
        let (mut conn, mut terminal, registry) = setup("012345678901;12345").await;

        let server_registry = registry.clone();
        let server =
            tokio::spawn(async move { handshake(&mut conn, &server_registry).await.map(|_| conn) });
        terminal.handshake(12345).await;

        let conn = server.await.unwrap().unwrap();
        assert_eq!(conn.phone().digits(), "012345678901");
        assert_eq!(registry.connected_count(), 1);
        assert_eq!(
            registry.manufacturer_id(&conn.phone()),
            Some(*b"VMFGA")
        );
    }
}
