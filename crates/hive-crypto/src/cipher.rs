//! Negotiable AEAD session ciphers.
//!
//! Two ciphers are supported on the wire: `AES-GCM` (the default) and
//! `CHACHA20-POLY1305`. Both use a 12-byte random nonce and a 16-byte
//! authentication tag, which keeps the encryption envelope layout
//! cipher-independent.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{aes, chacha, CryptoError, Result, SessionKey};

/// Nonce size shared by both supported ciphers.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size shared by both supported ciphers.
pub const TAG_SIZE: usize = 16;

/// A negotiable symmetric AEAD cipher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cipher {
    /// AES-128-GCM, the default.
    #[serde(rename = "AES-GCM")]
    AesGcm,
    /// ChaCha20-Poly1305.
    #[serde(rename = "CHACHA20-POLY1305")]
    Chacha20Poly1305,
}

impl Cipher {
    /// Server-side default preference order.
    pub const DEFAULT_PREFERENCE: [Cipher; 2] = [Cipher::AesGcm, Cipher::Chacha20Poly1305];

    /// The wire name of this cipher.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cipher::AesGcm => "AES-GCM",
            Cipher::Chacha20Poly1305 => "CHACHA20-POLY1305",
        }
    }

    /// Parse a wire name.
    pub fn from_str_opt(name: &str) -> Option<Cipher> {
        match name {
            "AES-GCM" => Some(Cipher::AesGcm),
            "CHACHA20-POLY1305" => Some(Cipher::Chacha20Poly1305),
            _ => None,
        }
    }

    /// Encrypt `plaintext` under a freshly generated random nonce.
    ///
    /// Returns `(nonce, ciphertext || tag)`.
    pub fn encrypt(
        &self,
        key: &SessionKey,
        plaintext: &[u8],
    ) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = match self {
            Cipher::AesGcm => aes::encrypt(key, &nonce, plaintext)?,
            Cipher::Chacha20Poly1305 => chacha::encrypt(key, &nonce, plaintext)?,
        };
        Ok((nonce, ciphertext))
    }

    /// Decrypt `ciphertext || tag` under the given nonce.
    ///
    /// Fails with [`CryptoError::AuthenticationFailed`] on tag mismatch and
    /// [`CryptoError::InvalidInput`] on a malformed nonce.
    pub fn decrypt(&self, key: &SessionKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce: &[u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| CryptoError::InvalidInput(format!("bad nonce length {}", nonce.len())))?;
        match self {
            Cipher::AesGcm => aes::decrypt(key, nonce, ciphertext),
            Cipher::Chacha20Poly1305 => chacha::decrypt(key, nonce, ciphertext),
        }
    }
}

impl std::fmt::Display for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(b"0123456789abcdef").expect("key")
    }

    #[test]
    fn test_roundtrip_both_ciphers() {
        for cipher in Cipher::DEFAULT_PREFERENCE {
            let (nonce, ciphertext) = cipher.encrypt(&key(), b"payload").expect("encrypt");
            let plaintext = cipher.decrypt(&key(), &nonce, &ciphertext).expect("decrypt");
            assert_eq!(plaintext, b"payload");
        }
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let (n1, _) = Cipher::AesGcm.encrypt(&key(), b"x").expect("encrypt");
        let (n2, _) = Cipher::AesGcm.encrypt(&key(), b"x").expect("encrypt");
        assert_ne!(n1, n2);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(Cipher::AesGcm.as_str(), "AES-GCM");
        assert_eq!(
            Cipher::from_str_opt("CHACHA20-POLY1305"),
            Some(Cipher::Chacha20Poly1305)
        );
        assert_eq!(Cipher::from_str_opt("DES"), None);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&Cipher::AesGcm).expect("serialize");
        assert_eq!(json, "\"AES-GCM\"");
    }

    #[test]
    fn test_bad_nonce_length() {
        assert!(matches!(
            Cipher::AesGcm.decrypt(&key(), &[0u8; 5], &[0u8; 20]),
            Err(CryptoError::InvalidInput(_))
        ));
    }
}
