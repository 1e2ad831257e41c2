use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::ClientHandshake;
use crate::protocol::message::{Command, CommandBody, Credentials, Identity, Package};
use crate::transport::connection::{Connection, PackageHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Authorized client connection
#[derive(Debug, Clone)]
pub struct Client {
    conn: Connection,
    identity: Identity,
    request_timeout: Duration,
}

impl Client {
    /// Connect to `config.client.address`, start the reader and log in.
    ///
    /// The connection is closed if the login fails.
    #[instrument(skip(config, pwd), fields(address = %config.client.address))]
    pub async fn login(config: &NetworkConfig, name: &str, pwd: &str) -> Result<Self> {
        let conn = Connection::connect(
            &config.client.address,
            config.client.connect_timeout,
            &config.transport,
        )
        .await?;
        conn.start_reader();

        let mut handshake = ClientHandshake::new(Credentials::new(name, pwd));
        let identity = handshake
            .run(&conn, config.client.handshake_timeout)
            .await?;

        Ok(Self {
            conn,
            identity,
            request_timeout: config.client.request_timeout,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Send a request and wait for its reply body.
    ///
    /// Fails with `ConnectionClosed` if the connection is or becomes closed
    /// before a reply arrives, and with `Timeout` otherwise.
    pub async fn request(&self, command: Command, body: &CommandBody) -> Result<CommandBody> {
        if self.conn.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        match self.conn.request(command, body, self.request_timeout).await {
            Some(reply) => Ok(reply),
            None if self.conn.is_closed() => Err(ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::Timeout),
        }
    }

    /// Fire-and-forget
    pub async fn send(&self, command: Command, body: &CommandBody) -> Result<()> {
        if self.conn.send_body(self.conn.next_seq(), command, body).await {
            Ok(())
        } else {
            Err(ProtocolError::ConnectionClosed)
        }
    }

    /// Next unsolicited package pushed by the server
    pub async fn next_package(&self, timeout: Duration) -> Option<Package> {
        self.conn.read_package(timeout).await
    }

    pub fn set_handler(&self, handler: Arc<dyn PackageHandler>) {
        self.conn.set_handler(handler);
    }

    pub async fn close(&self) {
        self.conn.close().await;
    }
}
