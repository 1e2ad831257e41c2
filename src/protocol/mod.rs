//! # Protocol Layer
//!
//! Commands, JSON payloads, the login handshake and command routing.
//!
//! ## Components
//! - **Message**: command catalog, `CommandBody`, `Package` and handshake DTOs
//! - **Handshake**: server and client login state machines
//! - **Dispatcher**: routes unsolicited packages to per-command handlers
//!
//! ## Security
//! - Session keys are exchanged under P-256 ECIES and never replaced
//! - All traffic after the key exchange is sealed with the session key

pub mod dispatcher;
pub mod handshake;
pub mod message;

#[cfg(test)]
mod tests;
