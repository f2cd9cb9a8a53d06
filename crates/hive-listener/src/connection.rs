//! Per-connection state and gating.
//!
//! One [`ClientConnection`] exists per accepted socket. It owns the
//! negotiated crypto parameters, the client's session, capability copies of
//! the client record, and the outgoing gate that enforces the per-client
//! message blacklist and envelope encryption.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use hive_crypto::cipher::Cipher;
use hive_crypto::handshake::{KeyExchange, PasswordExchange};
use hive_crypto::x25519::NodeSecret;
use hive_crypto::SessionKey;
use hive_db::ClientRecord;
use hive_types::session::Session;
use hive_types::NodeType;
use hive_wire::encoding::Encoding;
use hive_wire::envelope;
use hive_wire::message::{HiveMessage, HiveMessageType};
use hive_wire::{binfmt, WireError};

use crate::{ProtocolError, Result};

/// A frame as handed over by (or to) the transport collaborator.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportFrame {
    /// A text frame: serialized JSON, possibly an encryption envelope.
    Text(String),
    /// A binary frame, possibly encrypted as a contiguous buffer.
    Binary(Vec<u8>),
}

/// Outbound path to one connected client.
///
/// `send` must enqueue without blocking: fan-out iterates the peer table and
/// must never stall on a slow peer. A transport that buffers per connection
/// should bound its queue and disconnect on overflow.
pub trait ClientTransport: Send + Sync {
    /// Enqueue a frame for delivery.
    fn send(&self, frame: TransportFrame);
    /// Close the underlying connection.
    fn close(&self);
}

/// Listener-side connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport alive, credentials checked.
    Accepted,
    /// HELLO sent.
    Greeted,
    /// HANDSHAKE request sent, awaiting the peer's HANDSHAKE.
    Handshaking,
    /// Session key established, registered in the peer table.
    Authenticated,
    /// Gone.
    Closed,
}

/// A decoded inbound frame.
pub struct DecodedFrame {
    /// The parsed envelope.
    pub message: HiveMessage,
    /// Whether the frame arrived encrypted under the session key.
    pub encrypted: bool,
}

/// Mutable per-connection state. Frames for one connection are processed in
/// arrival order by its handler, so contention on this lock is incidental
/// (fan-out reads, agent-bus sends).
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub client_id: i64,
    pub name: String,
    pub node_type: NodeType,
    pub session: Session,
    pub cipher: Cipher,
    pub encoding: Encoding,
    pub binarize: bool,
    pub crypto_key: Option<SessionKey>,
    pub key_exchange: KeyExchange,
    pub pswd_exchange: Option<PasswordExchange>,
    pub peer_pubkey: Option<String>,
    pub is_admin: bool,
    pub allowed_types: Vec<String>,
    pub msg_blacklist: Vec<String>,
    pub skill_blacklist: Vec<String>,
    pub intent_blacklist: Vec<String>,
    pub can_broadcast: bool,
    pub can_escalate: bool,
    pub can_propagate: bool,
}

/// A connection to the listener.
pub struct ClientConnection {
    /// Access key presented at accept time.
    pub api_key: String,
    /// Useragent decoded from the authorization token.
    pub useragent: String,
    transport: Arc<dyn ClientTransport>,
    state: RwLock<ConnectionState>,
}

impl ClientConnection {
    /// Build a connection in the `Accepted` phase with a placeholder
    /// session. The node secret backs a fresh asymmetric key exchange.
    pub fn new(
        useragent: &str,
        api_key: &str,
        transport: Arc<dyn ClientTransport>,
        node_secret: NodeSecret,
    ) -> Self {
        Self {
            api_key: api_key.to_string(),
            useragent: useragent.to_string(),
            transport,
            state: RwLock::new(ConnectionState {
                phase: ConnectionPhase::Accepted,
                client_id: -1,
                name: String::new(),
                node_type: NodeType::Candidate,
                session: Session::default(),
                cipher: Cipher::AesGcm,
                encoding: Encoding::JsonB64,
                binarize: false,
                crypto_key: None,
                key_exchange: KeyExchange::new(node_secret),
                pswd_exchange: None,
                peer_pubkey: None,
                is_admin: false,
                allowed_types: Vec::new(),
                msg_blacklist: Vec::new(),
                skill_blacklist: Vec::new(),
                intent_blacklist: Vec::new(),
                can_broadcast: true,
                can_escalate: true,
                can_propagate: true,
            }),
        }
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, ConnectionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, ConnectionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Populate the connection from its client record.
    pub fn apply_record(&self, record: &ClientRecord) -> Result<()> {
        let preshared = record
            .crypto_key_bytes()?
            .map(|bytes| SessionKey::new(&bytes))
            .transpose()?;

        let mut st = self.state_mut();
        st.client_id = record.client_id;
        st.name = record.name.clone();
        st.node_type = NodeType::Node;
        st.is_admin = record.is_admin;
        st.crypto_key = preshared;
        st.allowed_types = record.allowed_types.clone();
        st.msg_blacklist = record.message_blacklist.clone();
        st.skill_blacklist = record.skill_blacklist.clone();
        st.intent_blacklist = record.intent_blacklist.clone();
        st.can_broadcast = record.can_broadcast;
        st.can_escalate = record.can_escalate;
        st.can_propagate = record.can_propagate;
        if let Some(password) = &record.password {
            st.pswd_exchange = Some(PasswordExchange::new(password));
        }
        Ok(())
    }

    /// Refresh the denylists from a re-synced record so admin edits apply
    /// without a restart.
    pub fn refresh_blacklists(&self, record: &ClientRecord) {
        let mut st = self.state_mut();
        st.msg_blacklist = record.message_blacklist.clone();
        st.skill_blacklist = record.skill_blacklist.clone();
        st.intent_blacklist = record.intent_blacklist.clone();
    }

    /// The routable address of this connection inside the broker:
    /// `{useragent}::{client_id}::{name}::{session_id}`.
    pub fn peer(&self) -> String {
        let st = self.state();
        format!(
            "{}::{}::{}::{}",
            self.useragent, st.client_id, st.name, st.session.session_id
        )
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state().phase
    }

    pub fn set_phase(&self, phase: ConnectionPhase) {
        self.state_mut().phase = phase;
    }

    pub fn is_admin(&self) -> bool {
        self.state().is_admin
    }

    pub fn session(&self) -> Session {
        self.state().session.clone()
    }

    pub fn has_crypto_key(&self) -> bool {
        self.state().crypto_key.is_some()
    }

    /// Whether an inbound bus message of this type may be injected.
    pub fn authorize(&self, msg_type: &str) -> bool {
        self.state().allowed_types.iter().any(|t| t == msg_type)
    }

    /// Ask the transport to close; the reaper removes us from the peer
    /// table via the disconnect path.
    pub fn close(&self) {
        self.state_mut().phase = ConnectionPhase::Closed;
        self.transport.close();
    }

    /// Send an envelope through the outgoing gate.
    ///
    /// BUS envelopes whose inner application type is blacklisted for this
    /// client are dropped silently. HELLO and HANDSHAKE always travel in
    /// the clear; everything else is encrypted once a session key exists,
    /// using binary framing when negotiated or when the payload is binary.
    pub fn send(&self, message: &HiveMessage) -> Result<()> {
        let st = self.state();
        if st.phase == ConnectionPhase::Closed {
            return Err(ProtocolError::Closed);
        }

        let is_bin = message.msg_type == HiveMessageType::Binary;
        if message.msg_type == HiveMessageType::Bus {
            if let Some(inner_type) = message.payload.bus_type() {
                if st.msg_blacklist.iter().any(|t| t == inner_type) {
                    debug!(
                        msg_type = inner_type,
                        peer = %self.peer_locked(&st),
                        "message type is blacklisted for client"
                    );
                    return Ok(());
                }
            }
        }

        let cleartext = matches!(
            message.msg_type,
            HiveMessageType::Hello | HiveMessageType::Handshake
        );

        let frame = match (&st.crypto_key, cleartext) {
            (Some(key), false) => {
                if st.binarize || is_bin {
                    let raw = binfmt::encode_frame(message)?;
                    TransportFrame::Binary(envelope::encrypt_bin(st.cipher, key, &raw)?)
                } else {
                    let raw = message.serialize()?;
                    TransportFrame::Text(envelope::encrypt_as_json(
                        st.cipher,
                        key,
                        st.encoding,
                        raw.as_bytes(),
                    )?)
                }
            }
            _ => {
                if is_bin {
                    TransportFrame::Binary(binfmt::encode_frame(message)?)
                } else {
                    TransportFrame::Text(message.serialize()?)
                }
            }
        };

        self.transport.send(frame);
        Ok(())
    }

    /// Decode an inbound frame into an envelope, decrypting when a session
    /// key is active.
    pub fn decode(&self, frame: &TransportFrame) -> Result<DecodedFrame> {
        let st = self.state();
        match frame {
            TransportFrame::Binary(data) => {
                let raw = match &st.crypto_key {
                    Some(key) => envelope::decrypt_bin(st.cipher, key, data)?,
                    None => data.clone(),
                };
                Ok(DecodedFrame {
                    message: binfmt::decode_frame(&raw)?,
                    encrypted: st.crypto_key.is_some(),
                })
            }
            TransportFrame::Text(raw) => {
                if envelope::is_encrypted_frame(raw) {
                    let key = st.crypto_key.as_ref().ok_or_else(|| {
                        WireError::Frame("encrypted frame before key agreement".into())
                    })?;
                    let plaintext =
                        envelope::decrypt_from_json(st.cipher, key, st.encoding, raw)?;
                    let text = String::from_utf8(plaintext)
                        .map_err(|e| WireError::Deserialization(e.to_string()))?;
                    Ok(DecodedFrame {
                        message: HiveMessage::deserialize(&text)?,
                        encrypted: true,
                    })
                } else {
                    if st.crypto_key.is_some() {
                        warn!(peer = %self.peer_locked(&st), "received unencrypted frame");
                    }
                    Ok(DecodedFrame {
                        message: HiveMessage::deserialize(raw)?,
                        encrypted: false,
                    })
                }
            }
        }
    }

    fn peer_locked(&self, st: &ConnectionState) -> String {
        format!(
            "{}::{}::{}::{}",
            self.useragent, st.client_id, st.name, st.session.session_id
        )
    }
}

/// The listener's shared map from peer id to active connection.
///
/// Owned by the listener and cloned into the agent bridge; concurrent
/// readers iterate it for fan-out while insertions (handshake completion)
/// and removals (close) take the write lock briefly.
#[derive(Clone, Default)]
pub struct PeerTable {
    inner: Arc<RwLock<HashMap<String, Arc<ClientConnection>>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: String, conn: Arc<ClientConnection>) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer, conn);
    }

    pub fn remove(&self, peer: &str) -> Option<Arc<ClientConnection>> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(peer)
    }

    pub fn get(&self, peer: &str) -> Option<Arc<ClientConnection>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .cloned()
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(peer)
    }

    /// A point-in-time copy for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<(String, Arc<ClientConnection>)> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(peer, conn)| (peer.clone(), conn.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;
    use hive_types::bus::BusMessage;

    fn connection() -> (Arc<MockTransport>, ClientConnection) {
        let transport = Arc::new(MockTransport::new());
        let conn = ClientConnection::new(
            "test-agent",
            "key-1",
            transport.clone(),
            NodeSecret::generate(),
        );
        (transport, conn)
    }

    fn record() -> ClientRecord {
        let mut record = ClientRecord::new(3, "key-1", "living room");
        record.message_blacklist = vec!["enclosure.mouth.viseme".into()];
        record
    }

    #[test]
    fn test_peer_id_format() {
        let (_transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");
        assert_eq!(conn.peer(), "test-agent::3::living room::default");

        conn.state_mut().session = Session::new("s1");
        assert_eq!(conn.peer(), "test-agent::3::living room::s1");
    }

    #[test]
    fn test_outgoing_blacklist_gate() {
        let (transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");

        let blocked = HiveMessage::bus(BusMessage::new("enclosure.mouth.viseme"));
        conn.send(&blocked).expect("send");
        assert!(transport.frames().is_empty());

        let allowed = HiveMessage::bus(BusMessage::new("speak"));
        conn.send(&allowed).expect("send");
        assert_eq!(transport.frames().len(), 1);
    }

    #[test]
    fn test_hello_goes_clear_even_with_key() {
        let (transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");
        conn.state_mut().crypto_key = Some(SessionKey::new(&[9u8; 16]).expect("key"));

        let hello = HiveMessage::json(
            HiveMessageType::Hello,
            serde_json::json!({"pubkey": "aa"}),
        );
        conn.send(&hello).expect("send");

        match &transport.frames()[0] {
            TransportFrame::Text(raw) => {
                assert!(!envelope::is_encrypted_frame(raw));
            }
            TransportFrame::Binary(_) => unreachable!("hello must be a text frame"),
        }
    }

    #[test]
    fn test_encrypted_roundtrip_through_gate() {
        let (transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");
        let key = SessionKey::new(&[9u8; 16]).expect("key");
        conn.state_mut().crypto_key = Some(key.clone());

        let msg = HiveMessage::bus(BusMessage::new("speak"));
        conn.send(&msg).expect("send");

        let frame = transport.frames().remove(0);
        match &frame {
            TransportFrame::Text(raw) => assert!(envelope::is_encrypted_frame(raw)),
            TransportFrame::Binary(_) => unreachable!("binarize off"),
        }

        // the connection can decode its own output since keys are symmetric
        let decoded = conn.decode(&frame).expect("decode");
        assert!(decoded.encrypted);
        assert_eq!(decoded.message, msg);
    }

    #[test]
    fn test_binarize_uses_binary_frames() {
        let (transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");
        {
            let mut st = conn.state_mut();
            st.crypto_key = Some(SessionKey::new(&[9u8; 16]).expect("key"));
            st.binarize = true;
        }

        conn.send(&HiveMessage::bus(BusMessage::new("speak")))
            .expect("send");
        assert!(matches!(transport.frames()[0], TransportFrame::Binary(_)));
    }

    #[test]
    fn test_decode_tampered_frame_fails_but_connection_lives() {
        let (transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");
        conn.state_mut().crypto_key = Some(SessionKey::new(&[9u8; 16]).expect("key"));

        conn.send(&HiveMessage::bus(BusMessage::new("speak")))
            .expect("send");
        let frame = transport.frames().remove(0);
        let tampered = match frame {
            TransportFrame::Text(raw) => {
                TransportFrame::Text(raw.replace("ciphertext", "ciphertext\" , \"x\":\"y"))
            }
            TransportFrame::Binary(_) => unreachable!(),
        };
        assert!(conn.decode(&tampered).is_err());
        assert!(!transport.is_closed());
    }

    #[test]
    fn test_authorize() {
        let (_transport, conn) = connection();
        conn.apply_record(&record()).expect("apply");
        assert!(conn.authorize("recognizer_loop:utterance"));
        assert!(!conn.authorize("system.shutdown"));
    }

    #[test]
    fn test_peer_table() {
        let table = PeerTable::new();
        let (_t1, c1) = connection();
        let c1 = Arc::new(c1);
        table.insert("peer-1".into(), c1.clone());
        assert!(table.contains("peer-1"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot().len(), 1);
        assert!(table.remove("peer-1").is_some());
        assert!(table.is_empty());
    }
}
