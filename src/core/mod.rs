//! # Core Protocol Components
//!
//! Low-level packet handling, stream framing and sequence numbering.
//!
//! ## Components
//! - **Packet**: outer envelope with magic, sequence, command and length
//! - **Codec**: Tokio codec with magic resynchronization
//! - **Envelope**: inner encrypted flag, JSON body and extension bytes
//! - **Sequence**: per-connection rolling sequence numbers
//!
//! ## Wire Format
//! ```text
//! [Magic 0xAE86(2)] [Seq(2)] [Cmd(2)] [Length(4)] [Payload(N)]
//! Payload = [Flags(1)] [BodyLen(2)] [Body] [Extension...]
//! ```
//!
//! ## Security
//! - Maximum packet size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod envelope;
pub mod packet;
pub mod sequence;
