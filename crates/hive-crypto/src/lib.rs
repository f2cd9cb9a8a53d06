//! # hive-crypto
//!
//! Cryptographic primitives for the HiveMind listener protocol.
//!
//! Session traffic is protected by a negotiated symmetric AEAD cipher keyed
//! with a 16-octet session key. The session key is agreed either
//! asymmetrically (X25519 against the node keypair) or derived from a shared
//! password, and is never transmitted.
//!
//! ## Modules
//!
//! - [`cipher`] — Negotiable AEAD ciphers (AES-128-GCM, ChaCha20-Poly1305)
//! - [`x25519`] — Node keypair and Diffie-Hellman agreement
//! - [`handshake`] — Asymmetric and password-derived key exchanges
//! - [`ecies`] — Asymmetric payload encryption for intercom envelopes
//! - [`kdf`] — Domain-separated BLAKE3 key derivation

pub mod cipher;
pub mod ecies;
pub mod handshake;
pub mod kdf;
pub mod x25519;

mod aes;
mod chacha;

use zeroize::Zeroize;

/// Session key size: 128 bits.
pub const SESSION_KEY_SIZE: usize = 16;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD authentication failed")]
    AuthenticationFailed,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key agreement failed.
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    /// Argon2id derivation failed.
    #[error("argon2id error: {0}")]
    Argon2(String),

    /// ECIES encryption/decryption failed.
    #[error("ECIES error: {0}")]
    Ecies(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A 16-octet symmetric session key.
///
/// Construction is strict: material that is not exactly [`SESSION_KEY_SIZE`]
/// octets is rejected, never truncated. The handshake paths that derive keys
/// from longer shared secrets go through [`SessionKey::from_shared_secret`],
/// which takes the first 16 octets by definition of the protocol.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a session key from exactly 16 octets of material.
    pub fn new(material: &[u8]) -> Result<Self> {
        if material.len() != SESSION_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SESSION_KEY_SIZE,
                actual: material.len(),
            });
        }
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        bytes.copy_from_slice(material);
        Ok(Self { bytes })
    }

    /// Derive a session key from a key-agreement shared secret.
    ///
    /// The protocol defines the session key as the first 16 octets of the
    /// shared secret. The secret must be at least that long.
    pub fn from_shared_secret(secret: &[u8]) -> Result<Self> {
        if secret.len() < SESSION_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SESSION_KEY_SIZE,
                actual: secret.len(),
            });
        }
        Self::new(&secret[..SESSION_KEY_SIZE])
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        write!(f, "SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_exact_length() {
        let key = SessionKey::new(&[7u8; 16]).expect("16 octets");
        assert_eq!(key.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn test_session_key_rejects_short() {
        assert!(matches!(
            SessionKey::new(&[0u8; 8]),
            Err(CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_session_key_rejects_long() {
        // longer material is rejected, not truncated
        assert!(SessionKey::new(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_from_shared_secret_takes_prefix() {
        let mut secret = [0u8; 32];
        for (i, b) in secret.iter_mut().enumerate() {
            *b = i as u8;
        }
        let key = SessionKey::from_shared_secret(&secret).expect("derive");
        assert_eq!(&key.as_bytes()[..], &secret[..16]);
    }

    #[test]
    fn test_from_shared_secret_rejects_short() {
        assert!(SessionKey::from_shared_secret(&[0u8; 4]).is_err());
    }
}
