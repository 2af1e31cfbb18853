//! Payload encryption.
//!
//! The session layer only sees the [`Cipher`] trait. The shipped
//! implementation is ChaCha20-Poly1305 with a fresh random 96-bit nonce per
//! message, laid out as `nonce || ciphertext || tag`. On the wire the result
//! is base64 armored (see [`seal`] / [`open`]).
//!
//! Key material derives ZeroizeOnDrop and is never printed.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered payload)")]
    Decrypt,
    #[error("envelope is not valid base64: {0}")]
    Envelope(#[from] base64::DecodeError),
    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),
}

/// Symmetric encryption collaborator used for payloads in flight.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

// ── Key ───────────────────────────────────────────────────────────────────────

/// A 256-bit shared key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key in standard or URL-safe base64.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let text = text.trim();
        let mut decoded = STANDARD
            .decode(text)
            .or_else(|_| URL_SAFE.decode(text))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {len}"
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

// ── ChaCha20-Poly1305 ─────────────────────────────────────────────────────────

pub struct ChaChaCipher {
    aead: ChaCha20Poly1305,
}

impl ChaChaCipher {
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(&key.0)),
        }
    }
}

impl Cipher for ChaChaCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(CryptoError::TooShort(ciphertext.len()));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)
    }
}

// ── Envelope armor ────────────────────────────────────────────────────────────

/// Encrypt and base64-armor a payload for the wire.
pub fn seal(cipher: &dyn Cipher, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = cipher.encrypt(plaintext)?;
    Ok(STANDARD.encode(ciphertext).into_bytes())
}

/// Reverse of [`seal`].
pub fn open(cipher: &dyn Cipher, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = STANDARD.decode(envelope.trim_ascii())?;
    cipher.decrypt(&ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ChaChaCipher {
        ChaChaCipher::new(&SymmetricKey::generate())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let big = [0xFFu8; 10_000];
        let payloads: [&[u8]; 4] = [b"", b"x", b"hello world", &big];
        for payload in payloads {
            let ct = c.encrypt(payload).unwrap();
            assert_eq!(ct.len(), NONCE_LEN + payload.len() + 16);
            assert_eq!(c.decrypt(&ct).unwrap(), payload);
        }
    }

    #[test]
    fn nonces_differ() {
        let c = cipher();
        assert_ne!(c.encrypt(b"same").unwrap(), c.encrypt(b"same").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = cipher().encrypt(b"secret").unwrap();
        assert!(matches!(cipher().decrypt(&ct), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let mut ct = c.encrypt(b"secret").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(c.decrypt(&ct), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn short_ciphertext_rejected() {
        assert!(matches!(cipher().decrypt(&[1, 2, 3]), Err(CryptoError::TooShort(3))));
    }

    #[test]
    fn seal_open_roundtrip() {
        let c = cipher();
        let envelope = seal(&c, b"payload").unwrap();
        assert!(envelope.iter().all(|b| b.is_ascii()));
        assert_eq!(open(&c, &envelope).unwrap(), b"payload");
        assert_eq!(open(&c, &seal(&c, b"").unwrap()).unwrap(), b"");
    }

    #[test]
    fn open_rejects_bad_armor() {
        assert!(matches!(open(&cipher(), b"not base64!!"), Err(CryptoError::Envelope(_))));
    }

    #[test]
    fn key_base64_roundtrip() {
        let key = SymmetricKey::generate();
        let parsed = SymmetricKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed.to_base64(), key.to_base64());
        assert!(SymmetricKey::from_base64("c2hvcnQ=").is_err());
    }
}
