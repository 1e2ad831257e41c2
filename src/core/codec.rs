use crate::config::{MAGIC_BYTES, MAX_PAYLOAD_SIZE};
use crate::core::packet::{Packet, HEADER_SIZE};
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Stream codec for outer packets.
///
/// Garbage in front of a frame is skipped until the magic is found again, and
/// a header announcing more than `max_payload_size` bytes is treated the same
/// way. Neither ends the stream.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl PacketCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

/// Drop bytes up to the next magic. Returns false if none was found.
fn seek_magic(src: &mut BytesMut) -> bool {
    let found = src.windows(MAGIC_BYTES.len()).position(|w| w == MAGIC_BYTES);
    let skip = match found {
        Some(offset) => offset,
        // keep a trailing first magic byte, the second may still arrive
        None if src.last() == Some(&MAGIC_BYTES[0]) => src.len() - 1,
        None => src.len(),
    };

    if skip > 0 {
        warn!(skipped = skip, "Resynchronizing packet stream");
        global_metrics().framing_resync();
        src.advance(skip);
    }
    found.is_some()
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            if !seek_magic(src) {
                return Ok(None);
            }

            if src.len() < HEADER_SIZE {
                src.reserve(HEADER_SIZE - src.len());
                return Ok(None);
            }

            let length = u32::from_be_bytes([src[6], src[7], src[8], src[9]]) as usize;
            if length > self.max_payload_size {
                warn!(
                    length,
                    max = self.max_payload_size,
                    "Oversized packet header, skipping magic"
                );
                global_metrics().framing_resync();
                src.advance(MAGIC_BYTES.len());
                continue;
            }

            let total = HEADER_SIZE + length;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let seq = u16::from_be_bytes([src[2], src[3]]);
            let command = u16::from_be_bytes([src[4], src[5]]);
            src.advance(HEADER_SIZE);
            let payload = src.split_to(length).to_vec();
            global_metrics().packet_received(total as u64);

            return Ok(Some(Packet {
                seq,
                command,
                payload,
            }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None => {
                if !src.is_empty() {
                    debug!(remaining = src.len(), "Discarding partial frame at EOF");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_payload_size {
            return Err(ProtocolError::OversizedPacket(item.payload.len()));
        }
        item.write_to(dst);
        global_metrics().packet_sent(item.encoded_len() as u64);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lone_first_magic_byte_is_kept() {
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::from(&[0x01, 0x02, 0xAE][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &[0xAE]);
    }

    #[test]
    fn oversized_header_skips_to_next_frame() {
        let mut codec = PacketCodec::new(8);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xAE, 0x86, 0, 1, 0, 0, 0, 0, 1, 0]);
        Packet::new(2, 3, vec![4]).write_to(&mut buf);

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet, Packet::new(2, 3, vec![4]));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_at_eof_is_discarded() {
        let mut codec = PacketCodec::default();
        let full = Packet::new(1, 1, vec![1, 2, 3]).to_bytes();
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
