//! Login handshake: key exchange followed by credential authorization.
//!
//! The server drives the exchange as a series of request/reply round-trips;
//! the client answers each request from its unsolicited queue.
//!
//! ```text
//! server                                  client
//!   RequestPublicKey {server pub}  ───►           (clear)
//!                                  ◄───  {client pub}       (sealed to server pub)
//!   RequestSessionKey {key}        ───►           (sealed to client pub)
//!                                  ◄───  ack                (session key)
//!   RequestCredentials {unix secs} ───►           (session key)
//!                                  ◄───  {name, pwd}
//!   AuthorizeResult {isok, msg}    ───►           (fresh sequence)
//! ```
//!
//! Every state is per connection; nothing is shared between handshakes.

use crate::core::sequence::REPLY_BIT;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{
    Command, CommandBody, Credentials, HandshakeMessage, Identity,
};
use crate::transport::connection::Connection;
use crate::utils::crypto;
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::with_timeout_error;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

/// Decides whether a name/password pair may log in
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, name: &str, pwd: &str) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&str, &str) -> bool + Send + Sync + 'static,
{
    fn authorize(&self, name: &str, pwd: &str) -> bool {
        self(name, pwd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    RequestPublicKey,
    RequestSessionKey,
    RequestCredentials,
    Authorized,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    AwaitPublicKey,
    AwaitSessionKey,
    AwaitCredentialsRequest,
    AwaitResult,
    Authorized,
    Rejected,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Anything other than an explicit rejection reports as a handshake failure
fn as_handshake_error(e: ProtocolError) -> ProtocolError {
    match e {
        ProtocolError::AuthorizationRejected(_) | ProtocolError::HandshakeError(_) => e,
        other => ProtocolError::HandshakeError(other.to_string()),
    }
}

fn encode(conn: &Connection, message: &HandshakeMessage) -> Result<Vec<u8>> {
    let json = message.to_body()?.to_json()?;
    conn.encode_payload(&json, &[])
}

/// Server side of the login exchange
pub struct ServerHandshake {
    authorizer: Arc<dyn Authorizer>,
    step_timeout: Duration,
    state: ServerState,
}

impl ServerHandshake {
    pub fn new(authorizer: Arc<dyn Authorizer>, step_timeout: Duration) -> Self {
        Self {
            authorizer,
            step_timeout,
            state: ServerState::Init,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Run the exchange on a connection whose reader is already started.
    ///
    /// On any failure the connection is closed.
    #[instrument(skip(self, conn), fields(id = conn.id()))]
    pub async fn run(&mut self, conn: &Connection) -> Result<Identity> {
        let _timer = Timer::start("server_handshake");
        global_metrics().handshake_attempt();

        match self.exchange(conn).await.map_err(as_handshake_error) {
            Ok(identity) => {
                global_metrics().handshake_success();
                info!(name = %identity.name, "Client authorized");
                Ok(identity)
            }
            Err(e) => {
                global_metrics().handshake_failed();
                self.state = ServerState::Rejected;
                warn!(error = %e, "Handshake failed");
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, conn: &Connection) -> Result<Identity> {
        self.state = ServerState::RequestPublicKey;
        let request = HandshakeMessage::PublicKey(conn.public_key_hex());
        let payload = encode(conn, &request)?;
        let reply = self
            .round_trip(conn, request.command(), payload, constants::ERR_NO_PUBLIC_KEY_REPLY)
            .await?;
        let HandshakeMessage::PublicKey(client_key) =
            HandshakeMessage::parse_reply(Command::RequestPublicKey, &reply)?
        else {
            return Err(ProtocolError::UnexpectedMessage);
        };
        conn.set_peer_public_key(crypto::public_key_from_hex(&client_key)?);
        debug!("Client public key received");

        self.state = ServerState::RequestSessionKey;
        let mut key = crypto::generate_session_key()?;
        let request = HandshakeMessage::SessionKey(hex::encode(key));
        // sealed to the client's public key, then the session key takes over
        let payload = encode(conn, &request);
        let installed = conn.install_session_key(&key);
        key.zeroize();
        let payload = payload?;
        installed?;
        let reply = self
            .round_trip(conn, request.command(), payload, constants::ERR_NO_SESSION_KEY_REPLY)
            .await?;
        HandshakeMessage::parse_reply(Command::RequestSessionKey, &reply)?;
        debug!("Session key acknowledged");

        self.state = ServerState::RequestCredentials;
        let request = HandshakeMessage::CredentialsRequest {
            timestamp: unix_now(),
        };
        let payload = encode(conn, &request)?;
        let reply = self
            .round_trip(conn, request.command(), payload, constants::ERR_NO_CREDENTIALS_REPLY)
            .await?;

        let verdict = Credentials::from_data(&reply.data).and_then(|creds| {
            if self.authorizer.authorize(&creds.name, &creds.pwd) {
                Ok(creds)
            } else {
                Err(constants::REJECT_BAD_CREDENTIALS)
            }
        });

        let result = HandshakeMessage::AuthorizeResult {
            isok: verdict.is_ok(),
            msg: verdict.as_ref().err().map(|m| m.to_string()).unwrap_or_default(),
        };
        let sent = conn
            .send_body(conn.next_seq(), Command::AuthorizeResult, &result.to_body()?)
            .await;

        match verdict {
            Ok(creds) if sent => {
                self.state = ServerState::Authorized;
                let identity = Identity {
                    id: 0,
                    name: creds.name,
                };
                conn.set_identity(identity.clone());
                Ok(identity)
            }
            Ok(_) => Err(ProtocolError::HandshakeError(
                "failed to deliver authorization result".into(),
            )),
            Err(msg) => Err(ProtocolError::AuthorizationRejected(msg.into())),
        }
    }

    async fn round_trip(
        &self,
        conn: &Connection,
        command: Command,
        payload: Vec<u8>,
        missing: &str,
    ) -> Result<CommandBody> {
        let packet = conn
            .send_and_wait(conn.next_seq(), command, payload, self.step_timeout)
            .await
            .ok_or_else(|| ProtocolError::HandshakeError(missing.into()))?;
        conn.decode_package(&packet)?.body()
    }
}

/// Client side of the login exchange
pub struct ClientHandshake {
    credentials: Credentials,
    state: ClientState,
}

impl ClientHandshake {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: ClientState::AwaitPublicKey,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Answer server requests until authorized, rejected or `timeout` passes.
    ///
    /// The connection's reader must be running and no handler registered.
    #[instrument(skip(self, conn), fields(id = conn.id(), name = %self.credentials.name))]
    pub async fn run(&mut self, conn: &Connection, timeout: Duration) -> Result<Identity> {
        let _timer = Timer::start("client_handshake");
        global_metrics().handshake_attempt();

        match with_timeout_error(self.exchange(conn), timeout)
            .await
            .map_err(as_handshake_error)
        {
            Ok(identity) => {
                global_metrics().handshake_success();
                info!("Logged in");
                Ok(identity)
            }
            Err(e) => {
                global_metrics().handshake_failed();
                self.state = ClientState::Rejected;
                warn!(error = %e, "Login failed");
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, conn: &Connection) -> Result<Identity> {
        loop {
            let packet = conn
                .read_packet(Duration::ZERO)
                .await
                .ok_or(ProtocolError::ConnectionClosed)?;
            let package = conn.decode_package(&packet)?;
            let command = package.command;
            if !command.is_handshake() {
                debug!(%command, "Ignoring command during login");
                continue;
            }

            let request = HandshakeMessage::parse_request(command, &package.body()?)?;
            match (self.state, request) {
                (ClientState::AwaitPublicKey, HandshakeMessage::PublicKey(server_key)) => {
                    conn.set_peer_public_key(crypto::public_key_from_hex(&server_key)?);
                    let reply = HandshakeMessage::PublicKey(conn.public_key_hex());
                    self.reply(conn, package.seq, &reply).await?;
                    self.state = ClientState::AwaitSessionKey;
                }
                (ClientState::AwaitSessionKey, HandshakeMessage::SessionKey(key_hex)) => {
                    let mut key = hex::decode(key_hex.trim())
                        .map_err(|e| ProtocolError::KeyError(e.to_string()))?;
                    let installed = conn.install_session_key(&key);
                    key.zeroize();
                    installed?;
                    self.reply(conn, package.seq, &HandshakeMessage::SessionKeyAck)
                        .await?;
                    self.state = ClientState::AwaitCredentialsRequest;
                }
                (
                    ClientState::AwaitCredentialsRequest,
                    HandshakeMessage::CredentialsRequest { .. },
                ) => {
                    let reply = HandshakeMessage::Credentials(self.credentials.clone());
                    self.reply(conn, package.seq, &reply).await?;
                    self.state = ClientState::AwaitResult;
                }
                (ClientState::AwaitResult, HandshakeMessage::AuthorizeResult { isok, msg }) => {
                    if !isok {
                        self.state = ClientState::Rejected;
                        return Err(ProtocolError::AuthorizationRejected(msg));
                    }
                    self.state = ClientState::Authorized;
                    let identity = Identity {
                        id: 0,
                        name: self.credentials.name.clone(),
                    };
                    conn.set_identity(identity.clone());
                    return Ok(identity);
                }
                (state, request) => {
                    return Err(ProtocolError::HandshakeError(format!(
                        "{}: {} while {state:?}",
                        constants::ERR_OUT_OF_ORDER,
                        request.command()
                    )));
                }
            }
        }
    }

    async fn reply(&self, conn: &Connection, seq: u16, message: &HandshakeMessage) -> Result<()> {
        if conn
            .send_body(seq | REPLY_BIT, message.command(), &message.to_body()?)
            .await
        {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeError(format!(
                "failed to answer {}",
                message.command()
            )))
        }
    }
}
