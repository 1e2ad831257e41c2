//! # Service Layer
//!
//! Ready-to-use server and client built on the transport and handshake.
//!
//! ## Components
//! - **Server**: listener that authorizes connections and delivers them on a channel
//! - **Client**: dials, logs in and issues requests

pub mod client;
pub mod server;

pub use client::Client;
pub use server::Server;
