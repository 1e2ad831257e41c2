//! Command catalog and JSON payloads.

use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Command code carried in the outer header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Heartbeat,
    RequestPublicKey,
    RequestSessionKey,
    RequestCredentials,
    AuthorizeResult,
    Test,
    /// Any code outside the built-in catalog
    Application(u16),
}

impl Command {
    pub fn code(self) -> u16 {
        match self {
            Command::Heartbeat => 0,
            Command::RequestPublicKey => 1,
            Command::RequestSessionKey => 2,
            Command::RequestCredentials => 3,
            Command::AuthorizeResult => 4,
            Command::Test => 5,
            Command::Application(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Command::Heartbeat,
            1 => Command::RequestPublicKey,
            2 => Command::RequestSessionKey,
            3 => Command::RequestCredentials,
            4 => Command::AuthorizeResult,
            5 => Command::Test,
            other => Command::Application(other),
        }
    }

    /// Whether the command belongs to the login exchange
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Command::RequestPublicKey
                | Command::RequestSessionKey
                | Command::RequestCredentials
                | Command::AuthorizeResult
        )
    }
}

impl From<u16> for Command {
    fn from(code: u16) -> Self {
        Command::from_code(code)
    }
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> Self {
        cmd.code()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Heartbeat => f.write_str("HEARTBEAT"),
            Command::RequestPublicKey => f.write_str("REQUEST_PUBLIC_KEY"),
            Command::RequestSessionKey => f.write_str("REQUEST_SESSION_KEY"),
            Command::RequestCredentials => f.write_str("REQUEST_CREDENTIALS"),
            Command::AuthorizeResult => f.write_str("AUTHORIZE_RESULT"),
            Command::Test => f.write_str("TEST"),
            Command::Application(code) => write!(f, "APP_{code}"),
        }
    }
}

/// JSON body of every command: `{"isok": bool, "msg": string, "data": any}`.
///
/// Missing fields fall back to `false`, `""` and `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandBody {
    #[serde(default)]
    pub isok: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Value,
}

impl CommandBody {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            isok: true,
            msg: String::new(),
            data: data.into(),
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            isok: false,
            msg: msg.into(),
            data: Value::Null,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `data` as a string, or an error naming what was expected
    pub fn data_str(&self, what: &str) -> Result<&str> {
        self.data
            .as_str()
            .ok_or_else(|| ProtocolError::HandshakeError(format!("{what}: data is not a string")))
    }
}

/// A packet after envelope and decryption
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub seq: u16,
    pub command: Command,
    pub encrypted: bool,
    pub json: String,
    pub extension: Vec<u8>,
}

impl Package {
    pub fn is_reply(&self) -> bool {
        self.seq & crate::core::sequence::REPLY_BIT != 0
    }

    pub fn body(&self) -> Result<CommandBody> {
        CommandBody::from_json(&self.json)
    }
}

/// Name and password submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub name: String,
    pub pwd: String,
}

impl Credentials {
    pub fn new(name: impl Into<String>, pwd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pwd: pwd.into(),
        }
    }

    /// Validate the `data` field of a credentials reply.
    ///
    /// The error is the rejection message sent back to the client.
    pub fn from_data(data: &Value) -> std::result::Result<Self, &'static str> {
        let map = match data {
            Value::Null => return Err(constants::REJECT_EMPTY_DATA),
            Value::Object(map) => map,
            _ => return Err(constants::REJECT_NOT_OBJECT),
        };

        let name = match map.get("name") {
            None => return Err(constants::REJECT_NO_NAME),
            Some(v) => v.as_str().unwrap_or_default(),
        };
        if name.is_empty() {
            return Err(constants::REJECT_EMPTY_NAME);
        }

        let pwd = match map.get("pwd") {
            None => return Err(constants::REJECT_NO_PASSWORD),
            Some(v) => v.as_str().unwrap_or_default(),
        };

        Ok(Self::new(name, pwd))
    }
}

/// Identity attached to a connection after authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: u64,
    pub name: String,
}

/// Login payloads, keyed by the command they travel under.
///
/// Requests flow server to client; every variant except `AuthorizeResult`
/// is answered under the same command with the reply bit set.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeMessage {
    /// Hex SEC1 public key, in both directions
    PublicKey(String),
    /// Hex session key, server to client
    SessionKey(String),
    /// Client acknowledges the installed session key
    SessionKeyAck,
    /// Server asks for credentials, stamped with unix seconds
    CredentialsRequest { timestamp: u64 },
    Credentials(Credentials),
    AuthorizeResult { isok: bool, msg: String },
}

impl HandshakeMessage {
    pub fn command(&self) -> Command {
        match self {
            HandshakeMessage::PublicKey(_) => Command::RequestPublicKey,
            HandshakeMessage::SessionKey(_) | HandshakeMessage::SessionKeyAck => {
                Command::RequestSessionKey
            }
            HandshakeMessage::CredentialsRequest { .. } | HandshakeMessage::Credentials(_) => {
                Command::RequestCredentials
            }
            HandshakeMessage::AuthorizeResult { .. } => Command::AuthorizeResult,
        }
    }

    pub fn to_body(&self) -> Result<CommandBody> {
        Ok(match self {
            HandshakeMessage::PublicKey(hex) => CommandBody::ok(hex.clone()),
            HandshakeMessage::SessionKey(hex) => {
                CommandBody::ok(hex.clone()).with_msg("session key")
            }
            HandshakeMessage::SessionKeyAck => CommandBody::ok(Value::Null),
            HandshakeMessage::CredentialsRequest { timestamp } => CommandBody::ok(*timestamp),
            HandshakeMessage::Credentials(creds) => CommandBody::ok(serde_json::to_value(creds)?),
            HandshakeMessage::AuthorizeResult { isok, msg } => CommandBody {
                isok: *isok,
                msg: msg.clone(),
                data: Value::Null,
            },
        })
    }

    /// Interpret a server request as seen by the client
    pub fn parse_request(command: Command, body: &CommandBody) -> Result<Self> {
        match command {
            Command::RequestPublicKey => Ok(HandshakeMessage::PublicKey(
                body.data_str("public key request")?.to_string(),
            )),
            Command::RequestSessionKey => Ok(HandshakeMessage::SessionKey(
                body.data_str("session key request")?.to_string(),
            )),
            Command::RequestCredentials => Ok(HandshakeMessage::CredentialsRequest {
                timestamp: body.data.as_u64().unwrap_or_default(),
            }),
            Command::AuthorizeResult => Ok(HandshakeMessage::AuthorizeResult {
                isok: body.isok,
                msg: body.msg.clone(),
            }),
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Interpret a client reply to the public key or session key request.
    ///
    /// `isok == false` is a refusal and fails the handshake.
    pub fn parse_reply(command: Command, body: &CommandBody) -> Result<Self> {
        if !body.isok {
            return Err(ProtocolError::HandshakeError(format!(
                "{}: {command} {}",
                constants::ERR_PEER_REFUSED,
                body.msg
            )));
        }
        match command {
            Command::RequestPublicKey => Ok(HandshakeMessage::PublicKey(
                body.data_str("public key reply")?.to_string(),
            )),
            Command::RequestSessionKey => Ok(HandshakeMessage::SessionKeyAck),
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }
}
