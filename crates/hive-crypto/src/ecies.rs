//! ECIES-X25519-ChaCha20-BLAKE3 asymmetric payload encryption.
//!
//! Used by intercom envelopes: the payload is encrypted to the target
//! node's public key and traverses intermediate nodes opaquely.
//!
//! ## Algorithm
//!
//! ```text
//! Encrypt(recipient_pk, plaintext):
//!   1. (eph_sk, eph_pk) = fresh X25519 keypair
//!   2. shared = X25519(eph_sk, recipient_pk)
//!   3. enc_key = BLAKE3::derive_key("HiveMind v1 ecies-encryption-key",
//!               shared || eph_pk || recipient_pk)
//!   4. nonce = BLAKE3::derive_key("HiveMind v1 ecies-nonce",
//!             shared || eph_pk)[..12]
//!   5. ct = ChaCha20-Poly1305.Encrypt(enc_key, nonce, plaintext)
//!   6. return eph_pk || ct || tag
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

use crate::kdf::{self, contexts};
use crate::x25519::{NodePublic, NodeSecret};
use crate::{CryptoError, Result};

/// Poly1305 tag size.
const TAG_SIZE: usize = 16;

/// An ECIES blob: ephemeral public key followed by ciphertext and tag.
pub struct EciesBlob {
    /// The ephemeral public key (32 bytes).
    pub eph_pk: [u8; 32],
    /// The ciphertext with appended Poly1305 tag.
    pub ciphertext_and_tag: Vec<u8>,
}

impl EciesBlob {
    /// Serialize to bytes: `eph_pk || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.ciphertext_and_tag.len());
        out.extend_from_slice(&self.eph_pk);
        out.extend_from_slice(&self.ciphertext_and_tag);
        out
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 32 + TAG_SIZE {
            return Err(CryptoError::Ecies("blob too short".into()));
        }
        let mut eph_pk = [0u8; 32];
        eph_pk.copy_from_slice(&data[..32]);
        Ok(Self {
            eph_pk,
            ciphertext_and_tag: data[32..].to_vec(),
        })
    }
}

fn derive_parts(shared: &[u8; 32], eph_pk: &[u8; 32], recipient_pk: &[u8; 32]) -> ([u8; 32], [u8; 12]) {
    let mut key_material = Vec::with_capacity(96);
    key_material.extend_from_slice(shared);
    key_material.extend_from_slice(eph_pk);
    key_material.extend_from_slice(recipient_pk);
    let enc_key = kdf::derive_key(contexts::ECIES_ENCRYPTION_KEY, &key_material);

    let mut nonce_material = Vec::with_capacity(64);
    nonce_material.extend_from_slice(shared);
    nonce_material.extend_from_slice(eph_pk);
    let nonce_full = kdf::derive_key(contexts::ECIES_NONCE, &nonce_material);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&nonce_full[..12]);

    (enc_key, nonce)
}

/// Encrypt `plaintext` to a recipient public key.
pub fn encrypt(recipient_pk: &NodePublic, plaintext: &[u8]) -> Result<EciesBlob> {
    let mut randomness = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut randomness);

    let eph_secret = NodeSecret::from_bytes(randomness);
    let eph_pk = eph_secret.public().to_bytes();
    let shared = eph_secret.diffie_hellman(recipient_pk);

    let (enc_key, nonce) = derive_parts(shared.as_bytes(), &eph_pk, recipient_pk.as_bytes());

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&enc_key));
    let ciphertext_and_tag = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Ecies("encryption failed".into()))?;

    Ok(EciesBlob {
        eph_pk,
        ciphertext_and_tag,
    })
}

/// Decrypt an ECIES blob with the recipient's secret key.
pub fn decrypt(recipient_sk: &NodeSecret, blob: &EciesBlob) -> Result<Vec<u8>> {
    let eph_pk = NodePublic::from_bytes(blob.eph_pk);
    let recipient_pk = recipient_sk.public();
    let shared = recipient_sk.diffie_hellman(&eph_pk);

    let (enc_key, nonce) = derive_parts(shared.as_bytes(), &blob.eph_pk, recipient_pk.as_bytes());

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&enc_key));
    cipher
        .decrypt(Nonce::from_slice(&nonce), blob.ciphertext_and_tag.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecies_roundtrip() {
        let sk = NodeSecret::generate();
        let pk = sk.public();

        let blob = encrypt(&pk, b"opaque intercom payload").expect("encrypt");
        let plaintext = decrypt(&sk, &blob).expect("decrypt");
        assert_eq!(plaintext, b"opaque intercom payload");
    }

    #[test]
    fn test_ecies_wrong_key_fails() {
        let sk1 = NodeSecret::generate();
        let sk2 = NodeSecret::generate();

        let blob = encrypt(&sk1.public(), b"secret").expect("encrypt");
        assert!(decrypt(&sk2, &blob).is_err());
    }

    #[test]
    fn test_ecies_serialization() {
        let sk = NodeSecret::generate();
        let blob = encrypt(&sk.public(), b"data").expect("encrypt");

        let bytes = blob.to_bytes();
        let restored = EciesBlob::from_bytes(&bytes).expect("deserialize");
        assert_eq!(decrypt(&sk, &restored).expect("decrypt"), b"data");
    }

    #[test]
    fn test_ecies_short_blob_rejected() {
        assert!(EciesBlob::from_bytes(&[0u8; 10]).is_err());
    }
}
