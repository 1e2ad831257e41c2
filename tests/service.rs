//! Server and client over loopback TCP

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use sealed_link::config::NetworkConfig;
use sealed_link::error::{constants, ProtocolError};
use sealed_link::protocol::dispatcher::Dispatcher;
use sealed_link::protocol::message::{Command, CommandBody};
use sealed_link::service::{Client, Server};
use std::time::Duration;

fn config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.server.handshake_timeout = Duration::from_millis(2000);
        c.client.handshake_timeout = Duration::from_millis(3000);
        c.client.request_timeout = Duration::from_millis(2000);
    })
}

fn echo_dispatcher() -> Dispatcher {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(Command::Application(100), |conn, package| {
            let name = conn.identity().map(|i| i.name).unwrap_or_default();
            Ok(Some(
                CommandBody::ok(package.body()?.data).with_msg(format!("hello {name}")),
            ))
        })
        .unwrap();
    dispatcher
}

async fn start() -> (Server, NetworkConfig, tokio::sync::mpsc::Receiver<sealed_link::Connection>) {
    let mut config = config();
    let mut server =
        Server::new(config.clone(), |name: &str, pwd: &str| name == "admin" && pwd == "admin")
            .with_handler(echo_dispatcher());
    let (addr, accepted) = server.start().await.unwrap();
    config.client.address = addr.to_string();
    (server, config, accepted)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_login_and_request_over_tcp() {
    let (mut server, config, mut accepted) = start().await;

    let client = Client::login(&config, "admin", "admin").await.unwrap();
    assert_eq!(client.identity().name, "admin");

    let conn = tokio::time::timeout(Duration::from_secs(2), accepted.recv())
        .await
        .unwrap()
        .expect("authorized connection");
    assert_eq!(conn.identity().unwrap().name, "admin");
    assert!(conn.has_session_key());

    let reply = client
        .request(Command::Application(100), &CommandBody::ok(7))
        .await
        .unwrap();
    assert!(reply.isok);
    assert_eq!(reply.msg, "hello admin");
    assert_eq!(reply.data, serde_json::json!(7));

    // server pushes to the client's unsolicited queue
    assert!(
        conn.send_body(conn.next_seq(), Command::Application(200), &CommandBody::ok("news"))
            .await
    );
    let pushed = client.next_package(Duration::from_secs(2)).await.unwrap();
    assert!(pushed.encrypted);
    assert_eq!(pushed.command, Command::Application(200));

    client.close().await;
    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .unwrap();
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bad_password_is_rejected() {
    let (mut server, config, mut accepted) = start().await;

    match Client::login(&config, "admin", "wrong").await {
        Err(ProtocolError::AuthorizationRejected(msg)) => {
            assert_eq!(msg, constants::REJECT_BAD_CREDENTIALS)
        }
        other => panic!("unexpected {other:?}"),
    }

    // rejected connections never reach the consumer
    let delivered = tokio::time::timeout(Duration::from_millis(300), accepted.recv()).await;
    assert!(delivered.is_err());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unrouted_request_times_out() {
    let (mut server, mut config, _accepted) = start().await;
    config.client.request_timeout = Duration::from_millis(200);

    let client = Client::login(&config, "admin", "admin").await.unwrap();
    let result = client
        .request(Command::Application(999), &CommandBody::default())
        .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));

    client.close().await;
    assert!(matches!(
        client.request(Command::Application(100), &CommandBody::default()).await,
        Err(ProtocolError::ConnectionClosed)
    ));
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_fails_closed_when_server_drops_connection() {
    let (mut server, mut config, mut accepted) = start().await;
    config.client.request_timeout = Duration::from_millis(500);

    let client = Client::login(&config, "admin", "admin").await.unwrap();
    let conn = tokio::time::timeout(Duration::from_secs(2), accepted.recv())
        .await
        .unwrap()
        .expect("authorized connection");

    let body = CommandBody::default();
    let (result, _) = tokio::join!(
        client.request(Command::Application(999), &body),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            conn.close().await;
        }
    );
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    server.stop().await;
}

#[tokio::test]
async fn test_server_refuses_invalid_config() {
    let mut config = config();
    config.server.accept_backlog = 0;

    let mut server = Server::new(config, |_: &str, _: &str| true);
    assert!(matches!(
        server.start().await,
        Err(ProtocolError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_login_to_closed_port_fails() {
    let mut config = config();
    config.client.address = "127.0.0.1:1".to_string();
    config.client.connect_timeout = Duration::from_millis(500);

    assert!(Client::login(&config, "admin", "admin").await.is_err());
}
