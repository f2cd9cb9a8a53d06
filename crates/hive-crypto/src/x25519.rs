//! X25519 node keypair and key agreement (RFC 7748).
//!
//! Every broker node owns a long-lived X25519 keypair. The public half is
//! announced in the HELLO message (hex-encoded) and used by peers for the
//! asymmetric handshake and for intercom targeting.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// A node's X25519 static secret key.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct NodeSecret {
    inner: StaticSecret,
}

/// A node's X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePublic {
    bytes: [u8; 32],
}

/// An X25519 shared secret.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl NodeSecret {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// Create from a hex string (64 hex chars).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = decode_key_hex(hex_str)?;
        Ok(Self::from_bytes(bytes))
    }

    /// Get the raw bytes of this secret.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Hex-encode the secret for at-rest storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Compute the corresponding public key.
    pub fn public(&self) -> NodePublic {
        let pk = PublicKey::from(&self.inner);
        NodePublic {
            bytes: pk.to_bytes(),
        }
    }

    /// Perform Diffie-Hellman key agreement with a peer public key.
    pub fn diffie_hellman(&self, their_public: &NodePublic) -> SharedSecret {
        let pk = PublicKey::from(their_public.bytes);
        let shared = self.inner.diffie_hellman(&pk);
        SharedSecret {
            bytes: *shared.as_bytes(),
        }
    }
}

impl NodePublic {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse a hex-encoded public key as announced in HELLO.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Ok(Self::from_bytes(decode_key_hex(hex_str)?))
    }

    /// Get the raw bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// Get the raw bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Hex encoding used on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl SharedSecret {
    /// Get the raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

fn decode_key_hex(hex_str: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(hex_str.trim())
        .map_err(|e| CryptoError::InvalidInput(format!("bad hex key: {e}")))?;
    let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 32,
            actual: raw.len(),
        }
    })?;
    Ok(bytes)
}
