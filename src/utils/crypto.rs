//! # Confidentiality Layer
//!
//! Two schemes protect the JSON body of a package:
//!
//! - **Session cipher**: AES-128-CBC with PKCS#7 padding. Every message
//!   carries its own random 16-byte IV in front of the ciphertext, and the
//!   plaintext is wrapped in 4 random bytes on each side so repeated short
//!   payloads never share a ciphertext prefix.
//! - **ECIES over P-256**: used only during the handshake to move the session
//!   key. An ephemeral ECDH agreement is stretched with HKDF-SHA256 into an
//!   AES-128-GCM key.
//!
//! ## Wire forms
//! ```text
//! session: [IV(16)] [AES-CBC(random(4) || plaintext || random(4) || pad)]
//! ecies:   [ephemeral pub, SEC1 compressed (33)] [nonce(12)] [GCM ciphertext+tag]
//! ```

use crate::error::{constants, ProtocolError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Session key length in bytes (AES-128)
pub const SESSION_KEY_LEN: usize = 16;

/// Random bytes added on each side of the plaintext
pub const RANDOM_WRAP_LEN: usize = 4;

/// SEC1 compressed point length for P-256
pub const PUBLIC_KEY_LEN: usize = 33;

const GCM_NONCE_LEN: usize = 12;
const ECIES_INFO: &[u8] = b"sealed-link ecies v1";

/// Append PKCS#7 padding.
///
/// The pad length is `block_size - (len % block_size)`, so aligned input
/// gains a whole block.
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let padding = block_size - data.len() % block_size;
    let mut out = Vec::with_capacity(data.len() + padding);
    out.extend_from_slice(data);
    out.resize(data.len() + padding, padding as u8);
    out
}

/// Strip PKCS#7 padding by reading the trailing byte as the pad count.
pub fn pkcs7_unpad(data: &[u8]) -> Result<&[u8]> {
    let last = *data
        .last()
        .ok_or_else(|| ProtocolError::KeyError(constants::ERR_EMPTY_CIPHERTEXT.into()))?;
    let count = last as usize;
    if count == 0 || count > data.len() {
        return Err(ProtocolError::KeyError(constants::ERR_BAD_PADDING.into()));
    }
    Ok(&data[..data.len() - count])
}

/// Generate a fresh random session key
pub fn generate_session_key() -> Result<[u8; SESSION_KEY_LEN]> {
    let mut key = [0u8; SESSION_KEY_LEN];
    getrandom::fill(&mut key).map_err(|_| ProtocolError::EncryptionFailure)?;
    Ok(key)
}

/// Symmetric cipher bound to a negotiated session key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; SESSION_KEY_LEN],
}

impl SessionCipher {
    pub fn new(key: [u8; SESSION_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Build from a raw slice, rejecting anything that is not 16 bytes
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; SESSION_KEY_LEN] = key.try_into().map_err(|_| {
            ProtocolError::KeyError(format!(
                "session key must be {SESSION_KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// Encrypt with a fresh IV. Output is `IV || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; BLOCK_SIZE];
        getrandom::fill(&mut iv).map_err(|_| ProtocolError::EncryptionFailure)?;

        let mut buf = pkcs7_pad(plaintext, BLOCK_SIZE);
        let mut enc = Aes128CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| ProtocolError::EncryptionFailure)?;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        let mut out = Vec::with_capacity(BLOCK_SIZE + buf.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&buf);
        Ok(out)
    }

    /// Decrypt `IV || ciphertext` and strip padding
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (iv, ciphertext) = data.split_at(BLOCK_SIZE);

        let mut buf = ciphertext.to_vec();
        let mut dec = Aes128CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| ProtocolError::DecryptionFailure)?;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        let plain_len = pkcs7_unpad(&buf)
            .map_err(|_| ProtocolError::DecryptionFailure)?
            .len();
        buf.truncate(plain_len);
        Ok(buf)
    }

    /// Encrypt with 4 random bytes on each side of the plaintext
    pub fn random_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let head: [u8; RANDOM_WRAP_LEN] = rand::random();
        let tail: [u8; RANDOM_WRAP_LEN] = rand::random();

        let mut wrapped = Vec::with_capacity(plaintext.len() + 2 * RANDOM_WRAP_LEN);
        wrapped.extend_from_slice(&head);
        wrapped.extend_from_slice(plaintext);
        wrapped.extend_from_slice(&tail);

        let sealed = self.encrypt(&wrapped);
        wrapped.zeroize();
        sealed
    }

    /// Inverse of [`SessionCipher::random_encrypt`]
    pub fn random_decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let plain = self.decrypt(data)?;
        if plain.len() < 2 * RANDOM_WRAP_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        Ok(plain[RANDOM_WRAP_LEN..plain.len() - RANDOM_WRAP_LEN].to_vec())
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

/// Derive the AES-GCM key for one ECIES message
fn ecies_key(secret: &EphemeralSecret, peer: &PublicKey, ephemeral: &[u8]) -> Result<[u8; 16]> {
    let shared = secret.diffie_hellman(peer);
    let hk = Hkdf::<Sha256>::new(Some(ephemeral), &shared.raw_secret_bytes()[..]);
    let mut key = [0u8; 16];
    hk.expand(ECIES_INFO, &mut key)
        .map_err(|_| ProtocolError::KeyError("hkdf expand failed".into()))?;
    Ok(key)
}

/// Encode a public key as hex of its compressed SEC1 point
pub fn public_key_to_hex(key: &PublicKey) -> String {
    hex::encode(key.to_encoded_point(true).as_bytes())
}

/// Parse a hex SEC1 point (compressed or uncompressed)
pub fn public_key_from_hex(text: &str) -> Result<PublicKey> {
    let bytes = hex::decode(text.trim())
        .map_err(|e| ProtocolError::KeyError(format!("{}: {e}", constants::ERR_INVALID_PUBLIC_KEY)))?;
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|_| ProtocolError::KeyError(constants::ERR_INVALID_PUBLIC_KEY.into()))
}

/// Seal `plaintext` so only the holder of `recipient`'s private key can open it
pub fn ecies_encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_pub = ephemeral.public_key().to_encoded_point(true);
    let ephemeral_bytes = ephemeral_pub.as_bytes();

    let mut key = ecies_key(&ephemeral, recipient, ephemeral_bytes)?;
    let cipher = Aes128Gcm::new_from_slice(&key).map_err(|_| ProtocolError::EncryptionFailure);
    key.zeroize();
    let cipher = cipher?;

    let mut nonce = [0u8; GCM_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ProtocolError::EncryptionFailure)?;

    let mut out = Vec::with_capacity(ephemeral_bytes.len() + GCM_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_bytes);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Local ephemeral key pair used for the handshake
pub struct EccKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EccKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_hex(&self) -> String {
        public_key_to_hex(&self.public)
    }

    /// Open a message produced by [`ecies_encrypt`] for this key pair
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < PUBLIC_KEY_LEN + GCM_NONCE_LEN + 16 {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (ephemeral_bytes, rest) = data.split_at(PUBLIC_KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(GCM_NONCE_LEN);

        let ephemeral =
            PublicKey::from_sec1_bytes(ephemeral_bytes).map_err(|_| ProtocolError::DecryptionFailure)?;
        let mut key = ecies_key(&self.secret, &ephemeral, ephemeral_bytes)?;
        let cipher = Aes128Gcm::new_from_slice(&key).map_err(|_| ProtocolError::DecryptionFailure);
        key.zeroize();

        cipher?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

impl std::fmt::Debug for EccKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EccKeyPair")
            .field("public", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}
