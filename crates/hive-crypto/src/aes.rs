//! AES-128-GCM AEAD encryption.
//!
//! The default session cipher. Keyed directly with the 16-octet session key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Key, Nonce,
};

use crate::{CryptoError, Result, SessionKey};

/// Nonce size for AES-GCM (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// Encrypt with AES-128-GCM.
///
/// Returns ciphertext with the 16-byte authentication tag appended.
pub fn encrypt(key: &SessionKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Decrypt with AES-128-GCM.
///
/// `ciphertext` must carry the appended authentication tag. Fails with
/// [`CryptoError::AuthenticationFailed`] if the tag does not verify.
pub fn decrypt(key: &SessionKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(&[0x42u8; 16]).expect("key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let nonce = [0x01u8; NONCE_SIZE];
        let ciphertext = encrypt(&key(), &nonce, b"hello hive").expect("encrypt");
        let plaintext = decrypt(&key(), &nonce, &ciphertext).expect("decrypt");
        assert_eq!(plaintext, b"hello hive");
    }

    #[test]
    fn test_ciphertext_has_tag() {
        let nonce = [0x01u8; NONCE_SIZE];
        let ciphertext = encrypt(&key(), &nonce, b"abc").expect("encrypt");
        assert_eq!(ciphertext.len(), 3 + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let nonce = [0x01u8; NONCE_SIZE];
        let other = SessionKey::new(&[0x43u8; 16]).expect("key");
        let ciphertext = encrypt(&key(), &nonce, b"abc").expect("encrypt");
        assert!(matches!(
            decrypt(&other, &nonce, &ciphertext),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let nonce = [0x01u8; NONCE_SIZE];
        let mut ciphertext = encrypt(&key(), &nonce, b"abc").expect("encrypt");
        ciphertext[0] ^= 0xFF;
        assert!(decrypt(&key(), &nonce, &ciphertext).is_err());
    }
}
