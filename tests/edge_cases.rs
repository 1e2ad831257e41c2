#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: boundary conditions, malformed input and key misuse

use sealed_link::config::{TransportConfig, MAX_PAYLOAD_SIZE};
use sealed_link::core::envelope::Envelope;
use sealed_link::core::packet::Packet;
use sealed_link::core::sequence::{SequenceGenerator, MAX_SEQUENCE};
use sealed_link::error::ProtocolError;
use sealed_link::protocol::dispatcher::Dispatcher;
use sealed_link::protocol::message::{Command, CommandBody, Package};
use sealed_link::transport::connection::Connection;
use sealed_link::utils::crypto::{self, EccKeyPair, SessionCipher};
use sealed_link::utils::timeout::with_timeout_error;
use std::time::Duration;

// ============================================================================
// PACKET EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_payload() {
    let bytes = Packet::new(0, 0, vec![]).to_bytes();
    let decoded = Packet::from_bytes(&bytes).expect("Should decode empty payload");
    assert!(decoded.payload.is_empty());
}

#[test]
fn test_packet_max_payload_size() {
    let packet = Packet::new(1, 1, vec![0xAB; MAX_PAYLOAD_SIZE]);
    let decoded = Packet::from_bytes(&packet.to_bytes()).expect("Should decode max payload");
    assert_eq!(decoded.payload.len(), MAX_PAYLOAD_SIZE);
}

#[test]
fn test_packet_oversized_length_rejected() {
    let mut bad = vec![0xAE, 0x86, 0, 1, 0, 1];
    bad.extend_from_slice(&20_000_000u32.to_be_bytes());
    bad.extend_from_slice(&[0xFF; 10]);

    match Packet::from_bytes(&bad) {
        Err(ProtocolError::OversizedPacket(size)) => assert_eq!(size, 20_000_000),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_packet_invalid_magic_bytes() {
    let mut bytes = Packet::new(1, 1, vec![1]).to_bytes();
    bytes[1] = 0x87;
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::InvalidHeader)
    ));
}

#[test]
fn test_packet_empty_buffer() {
    assert!(matches!(
        Packet::from_bytes(&[]),
        Err(ProtocolError::InvalidHeader)
    ));
}

#[test]
fn test_packet_reply_bit_on_max_sequence() {
    let packet = Packet::new(MAX_SEQUENCE, 5, vec![]);
    let reply = Packet::new(packet.reply_seq(), 5, vec![]);
    assert!(reply.is_reply());
    assert_eq!(reply.request_seq(), MAX_SEQUENCE);
}

// ============================================================================
// ENVELOPE EDGE CASES
// ============================================================================

#[test]
fn test_envelope_max_body() {
    let env = Envelope::new(false, vec![b'a'; u16::MAX as usize], vec![1, 2]);
    let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded.body.len(), u16::MAX as usize);
    assert_eq!(decoded.extension, vec![1, 2]);
}

#[test]
fn test_envelope_body_one_over_max() {
    let env = Envelope::new(false, vec![0; u16::MAX as usize + 1], vec![]);
    assert!(env.to_bytes().is_err());
}

#[test]
fn test_envelope_ignores_unknown_flag_bits() {
    let env = Envelope::from_bytes(&[0xFE, 0x00, 0x00]).unwrap();
    assert!(!env.encrypted);
}

// ============================================================================
// SEQUENCE EDGE CASES
// ============================================================================

#[test]
fn test_sequence_full_cycle_wraps_to_zero() {
    let seq = SequenceGenerator::new();
    let mut last = 0;
    for _ in 0..MAX_SEQUENCE {
        last = seq.next();
    }
    assert_eq!(last, MAX_SEQUENCE);
    assert_eq!(seq.next(), 0);
}

// ============================================================================
// CRYPTO EDGE CASES
// ============================================================================

#[test]
fn test_session_cipher_large_plaintext() {
    let cipher = SessionCipher::new(crypto::generate_session_key().unwrap());
    let plain = vec![0x5A; 60_000];
    let sealed = cipher.random_encrypt(&plain).unwrap();
    assert_eq!(cipher.random_decrypt(&sealed).unwrap(), plain);
}

#[test]
fn test_session_cipher_corrupted_ciphertext() {
    let cipher = SessionCipher::new([3u8; 16]);
    let mut sealed = cipher.random_encrypt(b"{\"isok\":true}").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0xFF;

    if let Ok(plain) = cipher.random_decrypt(&sealed) {
        assert_ne!(plain, b"{\"isok\":true}");
    }
}

#[test]
fn test_random_decrypt_rejects_short_plaintext() {
    let cipher = SessionCipher::new([3u8; 16]);
    let sealed = cipher.encrypt(b"1234567").unwrap();
    assert!(matches!(
        cipher.random_decrypt(&sealed),
        Err(ProtocolError::DecryptionFailure)
    ));
}

#[test]
fn test_ecies_tampered_ciphertext_fails() {
    let pair = EccKeyPair::generate();
    let mut sealed = crypto::ecies_encrypt(pair.public_key(), b"key material").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(pair.decrypt(&sealed).is_err());
}

#[test]
fn test_ecies_truncated_input_fails() {
    let pair = EccKeyPair::generate();
    assert!(pair.decrypt(&[0u8; 20]).is_err());
}

#[test]
fn test_public_key_accepts_uncompressed_form() {
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    let pair = EccKeyPair::generate();
    let uncompressed = hex::encode(pair.public_key().to_encoded_point(false).as_bytes());
    assert_eq!(
        &crypto::public_key_from_hex(&uncompressed).unwrap(),
        pair.public_key()
    );
}

// ============================================================================
// CONNECTION KEY POLICY
// ============================================================================

#[tokio::test]
async fn test_session_key_is_set_once() {
    let (a, _b) = tokio::io::duplex(1024);
    let conn = Connection::from_stream(a, None, &TransportConfig::default());

    conn.install_session_key(&[1u8; 16]).unwrap();
    assert!(matches!(
        conn.install_session_key(&[2u8; 16]),
        Err(ProtocolError::KeyError(_))
    ));
}

#[tokio::test]
async fn test_session_key_length_checked() {
    let (a, _b) = tokio::io::duplex(1024);
    let conn = Connection::from_stream(a, None, &TransportConfig::default());
    assert!(conn.install_session_key(&[1u8; 8]).is_err());
    assert!(!conn.has_session_key());
}

#[tokio::test]
async fn test_clear_payload_without_keys() {
    let (a, _b) = tokio::io::duplex(1024);
    let conn = Connection::from_stream(a, None, &TransportConfig::default());

    let payload = conn.encode_payload("{\"isok\":true}", &[9]).unwrap();
    let env = Envelope::from_bytes(&payload).unwrap();
    assert!(!env.encrypted);
    assert_eq!(env.body, b"{\"isok\":true}");
    assert_eq!(env.extension, vec![9]);
}

#[tokio::test]
async fn test_sealed_payload_without_matching_key_fails_decode() {
    let (a, _b) = tokio::io::duplex(1024);
    let (c, _d) = tokio::io::duplex(1024);
    let config = TransportConfig::default();
    let sender = Connection::from_stream(a, None, &config);
    let stranger = Connection::from_stream(c, None, &config);

    let someone_else = EccKeyPair::generate();
    sender.set_peer_public_key(someone_else.public_key().clone());
    let payload = sender.encode_payload("{}", &[]).unwrap();

    let packet = Packet::new(1, Command::Test.code(), payload);
    assert!(stranger.decode_package(&packet).is_err());
}

#[tokio::test]
async fn test_extension_bytes_survive_encryption() {
    let (a, _b) = tokio::io::duplex(1024);
    let conn = Connection::from_stream(a, None, &TransportConfig::default());
    conn.install_session_key(&[4u8; 16]).unwrap();

    let payload = conn.encode_payload("{\"msg\":\"x\"}", &[0xDE, 0xAD]).unwrap();
    let package = conn
        .decode_package(&Packet::new(2, 900, payload))
        .unwrap();
    assert!(package.encrypted);
    assert_eq!(package.command, Command::Application(900));
    assert_eq!(package.json, "{\"msg\":\"x\"}");
    assert_eq!(package.extension, vec![0xDE, 0xAD]);
}

// ============================================================================
// DISPATCHER EDGE CASES
// ============================================================================

fn package(command: Command) -> Package {
    Package {
        seq: 1,
        command,
        encrypted: false,
        json: "{}".to_string(),
        extension: vec![],
    }
}

#[tokio::test]
async fn test_dispatcher_unrouted_command_errors() {
    let (a, _b) = tokio::io::duplex(1024);
    let conn = Connection::from_stream(a, None, &TransportConfig::default());
    let dispatcher = Dispatcher::new();

    assert!(matches!(
        dispatcher.dispatch(&conn, &package(Command::Test)),
        Err(ProtocolError::UnexpectedMessage)
    ));
    assert!(dispatcher
        .dispatch(&conn, &package(Command::Heartbeat))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_dispatcher_handler_override() {
    let (a, _b) = tokio::io::duplex(1024);
    let conn = Connection::from_stream(a, None, &TransportConfig::default());
    let dispatcher = Dispatcher::new();

    dispatcher
        .register(Command::Test, |_, _| Ok(Some(CommandBody::fail("first"))))
        .unwrap();
    dispatcher
        .register(Command::Test, |_, _| Ok(Some(CommandBody::ok("second"))))
        .unwrap();

    let reply = dispatcher
        .dispatch(&conn, &package(Command::Test))
        .unwrap()
        .unwrap();
    assert!(reply.isok);

    assert!(dispatcher.unregister(Command::Test).unwrap());
    assert!(!dispatcher.unregister(Command::Test).unwrap());
}

// ============================================================================
// TIMEOUT EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_timeout_immediate_complete() {
    let result = with_timeout_error(async { Ok::<_, ProtocolError>(42) }, Duration::ZERO).await;
    assert!(matches!(result, Ok(42) | Err(ProtocolError::Timeout)));
}
