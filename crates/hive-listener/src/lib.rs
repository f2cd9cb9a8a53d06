//! # hive-listener
//!
//! The HiveMind listener protocol: a stateful per-connection machine that
//! handles the handshake, envelope encryption, message dispatch among the
//! directional primitives with loop prevention, authorization gating against
//! a client record, and binary-typed payload routing.
//!
//! The transport (WebSocket or otherwise) and the agent behind the bus are
//! external collaborators reached through thin interfaces:
//! [`connection::ClientTransport`] delivers frames,
//! [`agent::AgentBus`] carries bus messages in both directions, and
//! [`binary::BinaryDataHandler`] consumes raw-byte payloads.

pub mod agent;
pub mod auth;
pub mod binary;
pub mod connection;
pub mod protocol;
pub mod registry;

pub use protocol::{HiveMindListener, ListenerCallbacks, ListenerConfig};

/// Error types for the listener protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// No client record matches the presented access key.
    #[error("invalid access key")]
    InvalidAccessKey,

    /// Crypto required but unattainable, or negotiation failed.
    #[error("protocol error: {0}")]
    ProtocolRequirement(String),

    /// Malformed HANDSHAKE (neither pubkey nor envelope).
    #[error("handshake failure: {0}")]
    HandshakeFailure(String),

    /// Malformed authorization token on the accept URI.
    #[error("bad authorization token: {0}")]
    BadAuthToken(String),

    /// Connection is closed.
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Wire(#[from] hive_wire::WireError),

    #[error(transparent)]
    Crypto(#[from] hive_crypto::CryptoError),

    #[error(transparent)]
    Db(#[from] hive_db::DbError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::connection::{ClientTransport, TransportFrame};
    use hive_wire::message::HiveMessage;

    /// Transport double that records every outbound frame.
    #[derive(Default)]
    pub struct MockTransport {
        frames: Mutex<Vec<TransportFrame>>,
        closed: AtomicBool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn frames(&self) -> Vec<TransportFrame> {
            self.frames
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        pub fn clear(&self) {
            self.frames
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }

        /// Parse all plaintext JSON frames as envelopes.
        pub fn sent_messages(&self) -> Vec<HiveMessage> {
            self.frames()
                .iter()
                .filter_map(|frame| match frame {
                    TransportFrame::Text(raw) => HiveMessage::deserialize(raw).ok(),
                    TransportFrame::Binary(_) => None,
                })
                .collect()
        }
    }

    impl ClientTransport for MockTransport {
        fn send(&self, frame: TransportFrame) {
            self.frames
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(frame);
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
