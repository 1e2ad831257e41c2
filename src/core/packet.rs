use crate::config::{MAGIC_BYTES, MAX_PAYLOAD_SIZE};
use crate::core::sequence::REPLY_BIT;
use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Outer header length: magic(2) + seq(2) + cmd(2) + length(4)
pub const HEADER_SIZE: usize = 10;

/// One outer envelope as it travels on the wire.
///
/// ```text
/// [magic 0xAE86 (2)] [seq (2)] [cmd (2)] [length (4)] [payload (length)]
/// ```
/// All integers are big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u16,
    pub command: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(seq: u16, command: u16, payload: Vec<u8>) -> Self {
        Self {
            seq,
            command,
            payload,
        }
    }

    /// Whether bit 15 of the sequence marks this as a reply
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.seq & REPLY_BIT != 0
    }

    /// Sequence with the reply bit cleared
    #[inline]
    pub fn request_seq(&self) -> u16 {
        self.seq & !REPLY_BIT
    }

    /// Sequence a reply to this packet must carry
    #[inline]
    pub fn reply_seq(&self) -> u16 {
        self.seq | REPLY_BIT
    }

    /// Total encoded size
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the encoded packet to `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&MAGIC_BYTES);
        dst.put_u16(self.seq);
        dst.put_u16(self.command);
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    /// Serialize packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Deserialize exactly one packet from a whole buffer
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::from_bytes_with_limit(buf, MAX_PAYLOAD_SIZE)
    }

    /// Strict decode with an explicit payload limit.
    ///
    /// Unlike the stream codec this never resyncs: bad magic is an error.
    pub fn from_bytes_with_limit(buf: &[u8], max_payload_size: usize) -> Result<Self> {
        if buf.len() < HEADER_SIZE || buf[0..2] != MAGIC_BYTES {
            return Err(ProtocolError::InvalidHeader);
        }

        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let command = u16::from_be_bytes([buf[4], buf[5]]);
        let length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;

        if length > max_payload_size {
            return Err(ProtocolError::OversizedPacket(length));
        }

        let available = buf.len() - HEADER_SIZE;
        if available < length {
            return Err(ProtocolError::InvalidPacket(format!(
                "{}: expected {length} payload bytes, got {available}",
                constants::ERR_INVALID_PACKET
            )));
        }
        if available > length {
            return Err(ProtocolError::InvalidPacket(format!(
                "{}: {} trailing bytes",
                constants::ERR_INVALID_PACKET,
                available - length
            )));
        }

        Ok(Self {
            seq,
            command,
            payload: buf[HEADER_SIZE..].to_vec(),
        })
    }
}
