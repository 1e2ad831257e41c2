#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use sealed_link::core::codec::PacketCodec;
use sealed_link::core::envelope::Envelope;
use sealed_link::Packet;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Fuzz packet and envelope parsing - test for panics, crashes, infinite loops
    let _ = Packet::from_bytes(data);
    let _ = Envelope::from_bytes(data);

    let mut codec = PacketCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
