//! # Transport Layer
//!
//! Connections, the packet pump, and the TCP listener.
//!
//! ## Components
//! - **Channel**: framed reader/writer halves with I/O deadlines
//! - **Pump**: reply correlation and the unsolicited queue
//! - **Connection**: per-peer state, key policy and request/reply API
//! - **Listener**: accept loop handing connections to a callback
//!
//! Any `AsyncRead + AsyncWrite` stream can back a [`connection::Connection`];
//! TCP is used by the listener and by `Connection::connect`.

pub mod channel;
pub mod connection;
pub mod listener;
pub mod pump;

pub use connection::{Connection, PackageHandler};
pub use listener::Listener;
