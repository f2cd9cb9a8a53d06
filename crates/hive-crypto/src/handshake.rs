//! Session key agreement.
//!
//! Two forms coexist on a connection:
//!
//! - [`KeyExchange`] — asymmetric. The broker announces its public key in
//!   HELLO; the peer replies with its own in a HANDSHAKE. Both sides run
//!   X25519 and take the first 16 octets of the shared secret as the
//!   session key.
//! - [`PasswordExchange`] — password-derived, constructed only when the
//!   client record carries a password. Each side contributes a random salt
//!   envelope; the session key is Argon2id over the password and the XOR of
//!   both salts, so it is identical on both ends and never transmitted.
//!
//! A peer may re-run either exchange at any time to rotate the session key.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::x25519::{NodePublic, NodeSecret};
use crate::{CryptoError, Result, SessionKey, SESSION_KEY_SIZE};

/// Salt size for the password exchange envelopes.
pub const SALT_SIZE: usize = 16;

/// Argon2id parameters for password key agreement.
///
/// Light enough to run per connection attempt: 4 MiB, 3 iterations.
const PSWD_M_COST: u32 = 4096;
const PSWD_T_COST: u32 = 3;
const PSWD_P_COST: u32 = 1;

/// Asymmetric key exchange backed by the node's static secret.
pub struct KeyExchange {
    secret: NodeSecret,
}

impl KeyExchange {
    /// Create an exchange backed by the given node secret.
    pub fn new(secret: NodeSecret) -> Self {
        Self { secret }
    }

    /// The hex-encoded public key announced in HELLO.
    pub fn public_hex(&self) -> String {
        self.secret.public().to_hex()
    }

    /// This node's public key.
    pub fn public(&self) -> NodePublic {
        self.secret.public()
    }

    /// Agree on a session key with a peer public key (hex, from a
    /// HANDSHAKE `pubkey` field).
    pub fn agree(&self, peer_pub_hex: &str) -> Result<SessionKey> {
        let peer = NodePublic::from_hex(peer_pub_hex)?;
        let shared = self.secret.diffie_hellman(&peer);
        SessionKey::from_shared_secret(shared.as_bytes())
    }
}

/// Password-derived key exchange.
pub struct PasswordExchange {
    password: String,
    salt: [u8; SALT_SIZE],
}

impl PasswordExchange {
    /// Create an exchange for the given password with a fresh random salt.
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            password: password.to_string(),
            salt,
        }
    }

    /// The hex-encoded salt envelope this side contributes.
    pub fn envelope(&self) -> String {
        hex::encode(self.salt)
    }

    /// Derive the session key from the remote envelope.
    ///
    /// Symmetric: both sides compute Argon2id(password, salt_a XOR salt_b),
    /// so envelope exchange order does not matter.
    pub fn agree(&self, remote_envelope_hex: &str) -> Result<SessionKey> {
        let remote = hex::decode(remote_envelope_hex.trim())
            .map_err(|e| CryptoError::InvalidInput(format!("bad envelope hex: {e}")))?;
        let remote: [u8; SALT_SIZE] =
            remote
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SALT_SIZE,
                    actual: remote.len(),
                })?;

        let mut salt = [0u8; SALT_SIZE];
        for (i, s) in salt.iter_mut().enumerate() {
            *s = self.salt[i] ^ remote[i];
        }

        let params = Params::new(
            PSWD_M_COST,
            PSWD_T_COST,
            PSWD_P_COST,
            Some(SESSION_KEY_SIZE),
        )
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; SESSION_KEY_SIZE];
        argon2
            .hash_password_into(self.password.as_bytes(), &salt, &mut output)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        SessionKey::new(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asymmetric_agreement() {
        let server = KeyExchange::new(NodeSecret::generate());
        let client = KeyExchange::new(NodeSecret::generate());

        let server_key = server.agree(&client.public_hex()).expect("agree");
        let client_key = client.agree(&server.public_hex()).expect("agree");

        assert_eq!(server_key.as_bytes(), client_key.as_bytes());
    }

    #[test]
    fn test_asymmetric_rejects_garbage_pubkey() {
        let server = KeyExchange::new(NodeSecret::generate());
        assert!(server.agree("zz not hex").is_err());
    }

    #[test]
    fn test_password_agreement() {
        let server = PasswordExchange::new("hunter2");
        let client = PasswordExchange::new("hunter2");

        let server_key = server.agree(&client.envelope()).expect("agree");
        let client_key = client.agree(&server.envelope()).expect("agree");

        assert_eq!(server_key.as_bytes(), client_key.as_bytes());
    }

    #[test]
    fn test_password_mismatch_yields_different_keys() {
        let server = PasswordExchange::new("hunter2");
        let client = PasswordExchange::new("hunter3");

        let server_key = server.agree(&client.envelope()).expect("agree");
        let client_key = client.agree(&server.envelope()).expect("agree");

        assert_ne!(server_key.as_bytes(), client_key.as_bytes());
    }

    #[test]
    fn test_password_envelopes_are_random() {
        let a = PasswordExchange::new("pw");
        let b = PasswordExchange::new("pw");
        assert_ne!(a.envelope(), b.envelope());
    }

    #[test]
    fn test_password_bad_envelope() {
        let server = PasswordExchange::new("pw");
        assert!(server.agree("aabb").is_err());
        assert!(server.agree("not hex at all").is_err());
    }
}
