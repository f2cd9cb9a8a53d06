//! ChaCha20-Poly1305 AEAD encryption (RFC 8439).
//!
//! The cipher wants a 256-bit key; the session key is 128-bit, so the cipher
//! key is expanded with BLAKE3 under a registered context string.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::kdf::{self, contexts};
use crate::{CryptoError, Result, SessionKey};

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

fn cipher_key(key: &SessionKey) -> [u8; 32] {
    kdf::derive_key(contexts::CHACHA_CIPHER_KEY, key.as_bytes())
}

/// Encrypt with ChaCha20-Poly1305.
///
/// Returns ciphertext with the 16-byte authentication tag appended.
pub fn encrypt(key: &SessionKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&cipher_key(key)));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Decrypt with ChaCha20-Poly1305.
///
/// `ciphertext` must carry the appended authentication tag.
pub fn decrypt(key: &SessionKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&cipher_key(key)));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
