//! # hive-wire
//!
//! Message codec and model for the HiveMind listener protocol.
//!
//! ## Modules
//!
//! - [`message`] — The [`HiveMessage`](message::HiveMessage) envelope, route
//!   hops and payload model
//! - [`encoding`] — Transmission encodings for text frames
//! - [`envelope`] — Symmetric encryption envelopes (JSON and binary forms)
//! - [`binfmt`] — Binary frame codec
//! - [`z85`], [`base91`] — Codec implementations without an ecosystem crate

pub mod base91;
pub mod binfmt;
pub mod encoding;
pub mod envelope;
pub mod message;
pub mod z85;

/// Error types for wire encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Encoding name not recognized during negotiation.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Text-encoding decode failure (bad alphabet, bad length, ...).
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A malformed frame.
    #[error("frame error: {0}")]
    Frame(String),

    /// Cryptographic failure while sealing or opening an envelope.
    #[error(transparent)]
    Crypto(#[from] hive_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, WireError>;
