//! Transmission encodings for text frames.
//!
//! An encoding selects how the ciphertext/tag/nonce triple of an encryption
//! envelope is serialized into JSON string fields. The recognized encodings,
//! in descending default preference order, are JSON-B64, JSON-URLSAFE-B64,
//! JSON-B91, JSON-Z85B, JSON-Z85P, JSON-B32 and JSON-HEX.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{base91, z85, Result, WireError};

/// A negotiable transmission encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// Standard base64.
    #[serde(rename = "JSON-B64")]
    JsonB64,
    /// URL-safe base64.
    #[serde(rename = "JSON-URLSAFE-B64")]
    JsonUrlsafeB64,
    /// basE91.
    #[serde(rename = "JSON-B91")]
    JsonB91,
    /// Z85, arbitrary-length variant.
    #[serde(rename = "JSON-Z85B")]
    JsonZ85B,
    /// Z85, padded variant.
    #[serde(rename = "JSON-Z85P")]
    JsonZ85P,
    /// RFC 4648 base32.
    #[serde(rename = "JSON-B32")]
    JsonB32,
    /// Lowercase hex.
    #[serde(rename = "JSON-HEX")]
    JsonHex,
}

impl Encoding {
    /// Server-side default preference order, most preferred first.
    pub const DEFAULT_PREFERENCE: [Encoding; 7] = [
        Encoding::JsonB64,
        Encoding::JsonUrlsafeB64,
        Encoding::JsonB91,
        Encoding::JsonZ85B,
        Encoding::JsonZ85P,
        Encoding::JsonB32,
        Encoding::JsonHex,
    ];

    /// The wire name of this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::JsonB64 => "JSON-B64",
            Encoding::JsonUrlsafeB64 => "JSON-URLSAFE-B64",
            Encoding::JsonB91 => "JSON-B91",
            Encoding::JsonZ85B => "JSON-Z85B",
            Encoding::JsonZ85P => "JSON-Z85P",
            Encoding::JsonB32 => "JSON-B32",
            Encoding::JsonHex => "JSON-HEX",
        }
    }

    /// Parse a wire name.
    pub fn from_str_opt(name: &str) -> Option<Encoding> {
        Self::DEFAULT_PREFERENCE
            .iter()
            .copied()
            .find(|e| e.as_str() == name)
    }

    /// Encode raw bytes into the textual form carried in envelope fields.
    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            Encoding::JsonB64 => STANDARD.encode(data),
            Encoding::JsonUrlsafeB64 => URL_SAFE.encode(data),
            Encoding::JsonB91 => base91::encode(data),
            Encoding::JsonZ85B => z85::encode_z85b(data),
            Encoding::JsonZ85P => z85::encode_z85p(data),
            Encoding::JsonB32 => data_encoding::BASE32.encode(data),
            Encoding::JsonHex => hex::encode(data),
        }
    }

    /// Decode the textual form back to raw bytes.
    pub fn decode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::JsonB64 => STANDARD
                .decode(text)
                .map_err(|e| WireError::Encoding(e.to_string())),
            Encoding::JsonUrlsafeB64 => URL_SAFE
                .decode(text)
                .map_err(|e| WireError::Encoding(e.to_string())),
            Encoding::JsonB91 => base91::decode(text),
            Encoding::JsonZ85B => z85::decode_z85b(text),
            Encoding::JsonZ85P => z85::decode_z85p(text),
            Encoding::JsonB32 => data_encoding::BASE32
                .decode(text.as_bytes())
                .map_err(|e| WireError::Encoding(e.to_string())),
            Encoding::JsonHex => hex::decode(text).map_err(|e| WireError::Encoding(e.to_string())),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intersect the peer's preference vector with the locally allowed set,
/// preserving the peer's order.
///
/// Used for both encoding and cipher negotiation. An empty result is a
/// protocol failure for the caller to handle.
pub fn negotiate<T: PartialEq + Copy>(peer: &[T], allowed: &[T]) -> Vec<T> {
    peer.iter()
        .copied()
        .filter(|p| allowed.contains(p))
        .collect()
}
