//! Payload encryption for the pipeline.
//!
//! Every hop uses AES-256-GCM with a fresh 12-byte random nonce prepended to
//! the ciphertext: `nonce || ciphertext || tag`. Key material is 32 bytes,
//! sourced from configuration as 64 hex chars — the same key on both sides
//! of any single hop.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use thiserror::Error;

use crate::config::EncryptionConfig;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Seal plaintext under `key`. Output is `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open `nonce || ciphertext || tag` under `key`.
///
/// Fails on a truncated frame, a flipped bit anywhere, or the wrong key.
pub fn decrypt(data: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::TooShort(data.len()));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    let nonce = Nonce::from_slice(&data[..NONCE_LEN]);

    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| CryptoError::Decrypt)
}

/// Seal a chunk payload for the next hop. Passthrough when encryption is off.
pub fn seal_payload(data: &[u8], cfg: &EncryptionConfig) -> Result<Vec<u8>, CryptoError> {
    if !cfg.enabled {
        return Ok(data.to_vec());
    }
    encrypt(data, &cfg.forward_key()?)
}

/// Open a chunk payload received from the previous hop.
pub fn open_payload(data: &[u8], cfg: &EncryptionConfig) -> Result<Vec<u8>, CryptoError> {
    if !cfg.enabled {
        return Ok(data.to_vec());
    }
    decrypt(data, &cfg.ingress_key()?)
}

/// Decode a 64-hex-char key string into raw key bytes.
pub fn decode_key(hex_key: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = hex::decode(hex_key).map_err(|_| CryptoError::BadKeyEncoding)?;
    bytes.try_into().map_err(|_| CryptoError::KeyLength)
}

/// Mint an inter-node auth token: 32 random bytes as 64 hex chars.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: tag mismatch or wrong key")]
    Decrypt,

    #[error("ciphertext too short: {0} bytes, need at least the nonce")]
    TooShort(usize),

    #[error("key is not valid hex")]
    BadKeyEncoding,

    #[error("key must be exactly 32 bytes")]
    KeyLength,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let k = key(0x42);
        for msg in [&b""[..], &b"x"[..], &b"a longer message spanning a few words"[..]] {
            let sealed = encrypt(msg, &k).unwrap();
            assert_eq!(decrypt(&sealed, &k).unwrap(), msg);
        }
    }

    #[test]
    fn nonce_is_prepended_and_fresh() {
        let k = key(0x01);
        let a = encrypt(b"same message", &k).unwrap();
        let b = encrypt(b"same message", &k).unwrap();
        // Fresh nonce every call: identical plaintext, different frames.
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
        // nonce + ciphertext + 16-byte tag
        assert_eq!(a.len(), NONCE_LEN + 12 + 16);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt(b"secret", &key(0xAA)).unwrap();
        assert!(matches!(
            decrypt(&sealed, &key(0xAB)),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let k = key(0x7F);
        let mut sealed = encrypt(b"important data", &k).unwrap();
        sealed[NONCE_LEN + 2] ^= 0xFF;
        assert!(decrypt(&sealed, &k).is_err());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(matches!(
            decrypt(&[0u8; 5], &key(0)),
            Err(CryptoError::TooShort(5))
        ));
    }

    #[test]
    fn decode_key_round_trip() {
        let k = decode_key(&hex::encode(key(0x33))).unwrap();
        assert_eq!(k, key(0x33));
        assert!(decode_key("zz").is_err());
        assert!(matches!(decode_key("abcd"), Err(CryptoError::KeyLength)));
    }

    #[test]
    fn token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn payload_passthrough_when_disabled() {
        let cfg = EncryptionConfig::default();
        assert!(!cfg.enabled);
        let sealed = seal_payload(b"cleartext", &cfg).unwrap();
        assert_eq!(sealed, b"cleartext");
        assert_eq!(open_payload(&sealed, &cfg).unwrap(), b"cleartext");
    }

    #[test]
    fn payload_sealed_when_enabled() {
        let cfg = EncryptionConfig {
            enabled: true,
            key: hex::encode(key(0x11)),
            forward_key: None,
        };
        let sealed = seal_payload(b"cleartext", &cfg).unwrap();
        assert_ne!(sealed, b"cleartext");
        assert_eq!(open_payload(&sealed, &cfg).unwrap(), b"cleartext");
    }
}
