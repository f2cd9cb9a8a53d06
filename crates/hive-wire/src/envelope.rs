//! Symmetric encryption envelopes.
//!
//! Post-handshake traffic is wrapped in one of two envelope forms:
//!
//! - **JSON** (text frames): `{"ciphertext": ..., "tag": ..., "nonce": ...}`
//!   with every field passed through the negotiated transmission encoding.
//!   We emit the detached-tag form; decoding also accepts envelopes whose
//!   `tag` is absent, in which case the final 16 bytes of the ciphertext
//!   are taken as the tag.
//! - **Binary** (binary frames): the contiguous buffer
//!   `nonce || ciphertext || tag`.

use serde::{Deserialize, Serialize};

use hive_crypto::cipher::{Cipher, NONCE_SIZE, TAG_SIZE};
use hive_crypto::SessionKey;

use crate::encoding::Encoding;
use crate::{Result, WireError};

/// The JSON encryption envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonEnvelope {
    /// Encoded ciphertext; may carry the appended tag when `tag` is absent.
    pub ciphertext: String,
    /// Encoded authentication tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Encoded nonce.
    pub nonce: String,
}

/// Whether a text frame looks like an encryption envelope rather than a
/// plain serialized message.
pub fn is_encrypted_frame(raw: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .map(|v| v.get("ciphertext").is_some())
        .unwrap_or(false)
}

/// Encrypt plaintext into the JSON envelope form.
pub fn encrypt_as_json(
    cipher: Cipher,
    key: &SessionKey,
    encoding: Encoding,
    plaintext: &[u8],
) -> Result<String> {
    let (nonce, mut ciphertext) = cipher.encrypt(key, plaintext)?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

    let envelope = JsonEnvelope {
        ciphertext: encoding.encode(&ciphertext),
        tag: Some(encoding.encode(&tag)),
        nonce: encoding.encode(&nonce),
    };
    serde_json::to_string(&envelope).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Decrypt a JSON envelope back to plaintext.
///
/// Accepts both tag placements: a detached `tag` field, or the tag appended
/// to the ciphertext.
pub fn decrypt_from_json(
    cipher: Cipher,
    key: &SessionKey,
    encoding: Encoding,
    raw: &str,
) -> Result<Vec<u8>> {
    let envelope: JsonEnvelope =
        serde_json::from_str(raw).map_err(|e| WireError::Deserialization(e.to_string()))?;

    let nonce = encoding.decode(&envelope.nonce)?;
    let mut ciphertext = encoding.decode(&envelope.ciphertext)?;
    match envelope.tag {
        Some(tag) => ciphertext.extend_from_slice(&encoding.decode(&tag)?),
        None => {
            if ciphertext.len() < TAG_SIZE {
                return Err(WireError::Frame("ciphertext shorter than tag".into()));
            }
            // tag already appended
        }
    }

    Ok(cipher.decrypt(key, &nonce, &ciphertext)?)
}

/// Encrypt a contiguous byte buffer for a binary frame.
///
/// Layout: `nonce || ciphertext || tag`.
pub fn encrypt_bin(cipher: Cipher, key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = cipher.encrypt(key, plaintext)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a binary frame buffer.
pub fn decrypt_bin(cipher: Cipher, key: &SessionKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(WireError::Frame("encrypted frame too short".into()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    Ok(cipher.decrypt(key, nonce, ciphertext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(b"sixteen byte key").expect("key")
    }

    #[test]
    fn test_json_roundtrip_every_cipher_and_encoding() {
        for cipher in Cipher::DEFAULT_PREFERENCE {
            for encoding in Encoding::DEFAULT_PREFERENCE {
                let raw = encrypt_as_json(cipher, &key(), encoding, b"hive payload")
                    .expect("encrypt");
                let plaintext =
                    decrypt_from_json(cipher, &key(), encoding, &raw).expect("decrypt");
                assert_eq!(plaintext, b"hive payload", "{cipher} {encoding}");
            }
        }
    }

    #[test]
    fn test_json_accepts_appended_tag() {
        // build an envelope with the tag appended to the ciphertext and no
        // tag field, the form some peers emit
        let (nonce, ciphertext) = Cipher::AesGcm.encrypt(&key(), b"joined").expect("encrypt");
        let envelope = JsonEnvelope {
            ciphertext: Encoding::JsonHex.encode(&ciphertext),
            tag: None,
            nonce: Encoding::JsonHex.encode(&nonce),
        };
        let raw = serde_json::to_string(&envelope).expect("serialize");

        let plaintext =
            decrypt_from_json(Cipher::AesGcm, &key(), Encoding::JsonHex, &raw).expect("decrypt");
        assert_eq!(plaintext, b"joined");
    }

    #[test]
    fn test_json_tampered_fails() {
        let raw = encrypt_as_json(Cipher::AesGcm, &key(), Encoding::JsonHex, b"data")
            .expect("encrypt");
        let mut envelope: JsonEnvelope = serde_json::from_str(&raw).expect("parse");
        envelope.ciphertext = Encoding::JsonHex.encode(b"tampered!");
        let raw = serde_json::to_string(&envelope).expect("serialize");
        assert!(decrypt_from_json(Cipher::AesGcm, &key(), Encoding::JsonHex, &raw).is_err());
    }

    #[test]
    fn test_bin_roundtrip() {
        for cipher in Cipher::DEFAULT_PREFERENCE {
            let data = encrypt_bin(cipher, &key(), b"binary payload").expect("encrypt");
            assert_eq!(
                decrypt_bin(cipher, &key(), &data).expect("decrypt"),
                b"binary payload"
            );
        }
    }

    #[test]
    fn test_bin_short_frame_rejected() {
        assert!(decrypt_bin(Cipher::AesGcm, &key(), &[0u8; 8]).is_err());
    }

    #[test]
    fn test_is_encrypted_frame() {
        let raw = encrypt_as_json(Cipher::AesGcm, &key(), Encoding::JsonB64, b"x")
            .expect("encrypt");
        assert!(is_encrypted_frame(&raw));
        assert!(!is_encrypted_frame(r#"{"msg_type":"hello","payload":{}}"#));
        assert!(!is_encrypted_frame("not json"));
    }
}
