// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::TransportConfig;
use crate::error::{constants, ProtocolError};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::*;
use crate::protocol::message::{Command, CommandBody, Credentials};
use crate::transport::connection::Connection;
use std::sync::Arc;
use std::time::Duration;

const STEP: Duration = Duration::from_millis(2000);

fn pair() -> (Connection, Connection) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let config = TransportConfig::default();
    let server = Connection::from_stream(a, None, &config);
    let client = Connection::from_stream(b, None, &config);
    assert!(server.start_reader());
    assert!(client.start_reader());
    (server, client)
}

fn admin_only() -> Arc<dyn Authorizer> {
    Arc::new(|name: &str, pwd: &str| name == "admin" && pwd == "admin")
}

async fn login(
    name: &str,
    pwd: &str,
) -> (
    Connection,
    Connection,
    crate::error::Result<crate::protocol::message::Identity>,
    crate::error::Result<crate::protocol::message::Identity>,
    ServerState,
) {
    let (server, client) = pair();
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move {
            let mut hs = ServerHandshake::new(admin_only(), STEP);
            let result = hs.run(&server).await;
            (result, hs.state())
        })
    };

    let mut hs = ClientHandshake::new(Credentials::new(name, pwd));
    let client_result = hs.run(&client, Duration::from_secs(5)).await;
    let (server_result, state) = server_task.await.unwrap();
    (server, client, server_result, client_result, state)
}

#[tokio::test]
async fn test_handshake_accepts_valid_credentials() {
    let (server, client, server_result, client_result, state) = login("admin", "admin").await;

    assert_eq!(server_result.unwrap().name, "admin");
    assert_eq!(client_result.unwrap().name, "admin");
    assert_eq!(state, ServerState::Authorized);
    assert!(server.has_session_key());
    assert!(client.has_session_key());
    assert_eq!(server.identity().unwrap().id, 0);
    assert!(!server.is_closed());
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_handshake_rejects_wrong_password() {
    let (server, _client, server_result, client_result, state) = login("admin", "nope").await;

    match client_result {
        Err(ProtocolError::AuthorizationRejected(msg)) => {
            assert_eq!(msg, constants::REJECT_BAD_CREDENTIALS)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        server_result,
        Err(ProtocolError::AuthorizationRejected(_))
    ));
    assert_eq!(state, ServerState::Rejected);
    assert!(server.is_closed());
    assert!(server.identity().is_none());
}

#[tokio::test]
async fn test_handshake_rejects_empty_name() {
    let (_server, client, _server_result, client_result, _) = login("", "admin").await;

    match client_result {
        Err(ProtocolError::AuthorizationRejected(msg)) => {
            assert_eq!(msg, constants::REJECT_EMPTY_NAME)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_server_handshake_times_out_against_silent_peer() {
    let (server, _client) = pair();
    let mut hs = ServerHandshake::new(admin_only(), Duration::from_millis(100));

    match hs.run(&server).await {
        Err(ProtocolError::HandshakeError(msg)) => {
            assert_eq!(msg, constants::ERR_NO_PUBLIC_KEY_REPLY)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_client_rejects_out_of_order_request() {
    let (server, client) = pair();
    let body = CommandBody::ok(0u64);
    assert!(
        server
            .send_body(server.next_seq(), Command::RequestCredentials, &body)
            .await
    );

    let mut hs = ClientHandshake::new(Credentials::new("admin", "admin"));
    match hs.run(&client, Duration::from_secs(2)).await {
        Err(ProtocolError::HandshakeError(msg)) => {
            assert!(msg.starts_with(constants::ERR_OUT_OF_ORDER))
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(hs.state(), ClientState::Rejected);
}

#[tokio::test]
async fn test_client_ignores_heartbeat_during_login() {
    let (server, client) = pair();
    assert!(
        server
            .send_body(server.next_seq(), Command::Heartbeat, &CommandBody::default())
            .await
    );

    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { ServerHandshake::new(admin_only(), STEP).run(&server).await })
    };
    let mut hs = ClientHandshake::new(Credentials::new("admin", "admin"));
    assert!(hs.run(&client, Duration::from_secs(5)).await.is_ok());
    assert!(server_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_traffic_after_login_uses_session_key() {
    let (server, client, server_result, client_result, _) = login("admin", "admin").await;
    server_result.unwrap();
    client_result.unwrap();

    let dispatcher = Dispatcher::new();
    dispatcher
        .register(Command::Test, |_conn, package| {
            let body = package.body()?;
            Ok(Some(CommandBody {
                isok: package.encrypted,
                msg: body.msg,
                data: body.data,
            }))
        })
        .unwrap();
    server.set_handler(Arc::new(dispatcher));

    let reply = client
        .request(
            Command::Test,
            &CommandBody::ok("ping").with_msg("echo"),
            Duration::from_secs(2),
        )
        .await
        .expect("reply");
    assert!(reply.isok, "request was not sealed");
    assert_eq!(reply.msg, "echo");
    assert_eq!(reply.data, serde_json::json!("ping"));
}
