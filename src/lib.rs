//! # sealed-link
//!
//! Encrypted, authenticated request/reply transport for JSON commands between
//! trusted peers over TCP (or any duplex byte stream).
//!
//! ## Layers
//! - [`core`]: outer packet framing, inner envelope, sequence numbers
//! - [`transport`]: connections, the packet pump, the TCP listener
//! - [`protocol`]: command catalog, login handshake, dispatcher
//! - [`service`]: server and client façades
//! - [`utils`]: crypto, logging, timeouts, metrics
//!
//! ## Example
//! ```rust,no_run
//! use sealed_link::config::NetworkConfig;
//! use sealed_link::protocol::message::{Command, CommandBody};
//! use sealed_link::service::{Client, Server};
//!
//! # async fn run() -> sealed_link::error::Result<()> {
//! let config = NetworkConfig::default();
//! let mut server = Server::new(config.clone(), |name: &str, pwd: &str| {
//!     name == "admin" && pwd == "admin"
//! });
//! let (_addr, mut authorized) = server.start().await?;
//! tokio::spawn(async move {
//!     while let Some(conn) = authorized.recv().await {
//!         tracing::info!(id = conn.id(), "client logged in");
//!     }
//! });
//!
//! let client = Client::login(&config, "admin", "admin").await?;
//! let reply = client.request(Command::Test, &CommandBody::ok("ping")).await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::packet::Packet;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::message::{Command, CommandBody, Package};
pub use crate::transport::connection::{Connection, PackageHandler};
