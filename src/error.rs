//! # Error Types
//!
//! Error handling for the sealed-link transport.
//!
//! This module defines every error variant that can surface from connecting,
//! framing, sealing and the authorization handshake.
//!
//! ## Error Categories
//! - **Transport**: connect/read/write failures, EOF and resets. Fatal to the
//!   connection they occur on.
//! - **Framing**: bad magic or malformed headers. The stream reader resyncs,
//!   so these only surface from the strict whole-buffer decoders.
//! - **Decode / Crypto**: malformed JSON, failed decryption, missing keys.
//! - **Handshake**: protocol violations and credential rejection.
//!
//! Request/reply APIs (`send`, `send_and_wait`, `read_package`) report
//! failures as `bool`/`Option` and log the underlying `ProtocolError`; the
//! connection-level and handshake APIs return `Result`.
//!
//! ## Example Usage
//! ```rust
//! use sealed_link::error::{ProtocolError, Result};
//! use tracing::error;
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>()
//!         .map_err(|e| ProtocolError::ConfigError(format!("bad port {raw}: {e}")))
//! }
//!
//! if let Err(e) = parse_port("70000") {
//!     error!(error = %e, "Invalid port");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_INVALID_HEADER: &str = "Invalid protocol header";
    pub const ERR_INVALID_PACKET: &str = "Invalid packet structure";
    pub const ERR_OVERSIZED_PACKET: &str = "Packet exceeds maximum size";
    pub const ERR_BODY_TOO_LARGE: &str = "Envelope body exceeds 65535 bytes";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_EMPTY_CIPHERTEXT: &str = "Ciphertext is empty";
    pub const ERR_BAD_PADDING: &str = "Invalid block padding";
    pub const ERR_SESSION_KEY_SET: &str = "Session key already established";
    pub const ERR_INVALID_PUBLIC_KEY: &str = "Invalid public key";

    /// Handshake errors
    pub const ERR_NO_PUBLIC_KEY_REPLY: &str = "No reply to public key request";
    pub const ERR_NO_SESSION_KEY_REPLY: &str = "No reply to session key request";
    pub const ERR_NO_CREDENTIALS_REPLY: &str = "No reply to credentials request";
    pub const ERR_PEER_REFUSED: &str = "Peer refused handshake step";
    pub const ERR_OUT_OF_ORDER: &str = "Handshake request out of order";

    /// Authorization rejection messages sent back to the peer
    pub const REJECT_EMPTY_DATA: &str = "Empty data field";
    pub const REJECT_NOT_OBJECT: &str = "Data field is not an object";
    pub const REJECT_NO_NAME: &str = "No name field";
    pub const REJECT_EMPTY_NAME: &str = "Empty name";
    pub const REJECT_NO_PASSWORD: &str = "No password field";
    pub const REJECT_BAD_CREDENTIALS: &str = "name or password is not correct";
}

// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid protocol header")]
    InvalidHeader,

    #[error("Invalid packet structure: {0}")]
    InvalidPacket(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Authorization rejected: {0}")]
    AuthorizationRejected(String),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the error means the underlying stream is unusable
    pub fn is_fatal_transport(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
