//! Inner envelope carried in every packet payload.
//!
//! ```text
//! [flags (1): bit0 = encrypted] [body length (2)] [body] [extension bytes ...]
//! ```

use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Flag bit set when the body is sealed
pub const FLAG_ENCRYPTED: u8 = 0x01;

/// flags(1) + body length(2)
pub const ENVELOPE_HEADER_SIZE: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub encrypted: bool,
    pub body: Vec<u8>,
    pub extension: Vec<u8>,
}

impl Envelope {
    pub fn new(encrypted: bool, body: Vec<u8>, extension: Vec<u8>) -> Self {
        Self {
            encrypted,
            body,
            extension,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body_len = u16::try_from(self.body.len())
            .map_err(|_| ProtocolError::InvalidPacket(constants::ERR_BODY_TOO_LARGE.into()))?;

        let mut buf =
            BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.body.len() + self.extension.len());
        buf.put_u8(if self.encrypted { FLAG_ENCRYPTED } else { 0 });
        buf.put_u16(body_len);
        buf.put_slice(&self.body);
        buf.put_slice(&self.extension);
        Ok(buf.to_vec())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENVELOPE_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacket(format!(
                "envelope needs {ENVELOPE_HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let encrypted = buf[0] & FLAG_ENCRYPTED != 0;
        let body_len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let rest = &buf[ENVELOPE_HEADER_SIZE..];
        if body_len > rest.len() {
            return Err(ProtocolError::InvalidPacket(format!(
                "envelope body length {body_len} overruns {} remaining bytes",
                rest.len()
            )));
        }

        let (body, extension) = rest.split_at(body_len);
        Ok(Self {
            encrypted,
            body: body.to_vec(),
            extension: extension.to_vec(),
        })
    }
}
