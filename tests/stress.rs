#![allow(clippy::unwrap_used)]

use bytes::BytesMut;
use sealed_link::core::codec::PacketCodec;
use sealed_link::core::packet::Packet;
use sealed_link::utils::crypto::{self, SessionCipher};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_packet_encode_decode_large_series() {
    // heavy burst of packets through one buffer
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();

    for size in [0usize, 1, 64, 512, 4096, 65536, 1_048_576] {
        for i in 0..200u16 {
            codec
                .encode(Packet::new(i, 5, vec![0u8; size]), &mut buf)
                .unwrap();
        }
        for i in 0..200u16 {
            let packet = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(packet.seq, i);
            assert_eq!(packet.payload.len(), size);
        }
        assert!(buf.is_empty());
    }
}

#[test]
fn stress_noisy_stream_recovers_every_frame() {
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();

    for i in 0..1_000u16 {
        buf.extend_from_slice(&[0x00, 0x86, 0x13][..(i % 4) as usize]);
        buf.extend_from_slice(&Packet::new(i, 1, vec![(i & 0xFF) as u8; 32]).to_bytes());
    }

    for i in 0..1_000u16 {
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.seq, i);
    }
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn stress_session_cipher_many_messages() {
    let cipher = SessionCipher::new(crypto::generate_session_key().unwrap());
    for size in [0usize, 1, 15, 16, 17, 1000, 60_000] {
        for _ in 0..50 {
            let plain = vec![0x42; size];
            let sealed = cipher.random_encrypt(&plain).unwrap();
            assert_eq!(cipher.random_decrypt(&sealed).unwrap(), plain);
        }
    }
}
