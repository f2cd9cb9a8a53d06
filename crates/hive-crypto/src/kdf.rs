//! Domain-separated BLAKE3 key derivation.
//!
//! Every derived key uses a registered context string so material derived
//! for one purpose can never collide with another.

/// Registered BLAKE3 context strings. Using an unregistered context string
/// is a protocol violation.
pub mod contexts {
    /// Expands the 16-octet session key to the 256-bit ChaCha20 cipher key.
    pub const CHACHA_CIPHER_KEY: &str = "HiveMind v1 chacha-cipher-key";
    /// ECIES payload encryption key.
    pub const ECIES_ENCRYPTION_KEY: &str = "HiveMind v1 ecies-encryption-key";
    /// ECIES nonce derivation.
    pub const ECIES_NONCE: &str = "HiveMind v1 ecies-nonce";

    /// All registered context strings.
    pub const ALL_CONTEXTS: &[&str] = &[CHACHA_CIPHER_KEY, ECIES_ENCRYPTION_KEY, ECIES_NONCE];
}

/// Derive a 32-byte key from `material` under the given context string.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, material)
}
