//! The listener protocol state machine.
//!
//! One [`HiveMindListener`] serves a whole broker. Per connection it drives
//! the lifecycle `Accepted → Greeted → Handshaking → Authenticated →
//! Closed`, dispatches authenticated envelopes by type, enforces the client
//! record's authorization, performs fan-out for the broadcast/propagate
//! primitives with loop prevention, and forwards escalations upstream via
//! the agent bus.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use hive_crypto::cipher::Cipher;
use hive_crypto::ecies::{self, EciesBlob};
use hive_crypto::x25519::NodeSecret;
use hive_db::{ClientStore, REVOKED_KEY};
use hive_types::bus::{BusMessage, Destination, MessageContext};
use hive_types::identity::NodeIdentity;
use hive_types::session::Session;
use hive_types::ProtocolVersion;
use hive_wire::encoding::{negotiate, Encoding};
use hive_wire::message::{BinaryPayloadType, HiveMessage, HiveMessageType, HivePayload};

use crate::agent::{topics, AgentBridge, AgentBus};
use crate::auth;
use crate::binary::{BinaryDataHandler, DEFAULT_SAMPLE_RATE, DEFAULT_SAMPLE_WIDTH};
use crate::connection::{
    ClientConnection, ClientTransport, ConnectionPhase, PeerTable, TransportFrame,
};
use crate::{ProtocolError, Result};

/// Listener-wide configuration.
#[derive(Clone)]
pub struct ListenerConfig {
    /// Reject unencrypted traffic after the handshake window.
    pub require_crypto: bool,
    /// Derive a key per session when no pre-shared key exists.
    pub handshake_enabled: bool,
    /// Advertise binary framing support during the handshake.
    pub binarize: bool,
    /// Encodings the server accepts, in preference order.
    pub allowed_encodings: Vec<Encoding>,
    /// Ciphers the server accepts, in preference order.
    pub allowed_ciphers: Vec<Cipher>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            require_crypto: true,
            handshake_enabled: true,
            binarize: false,
            allowed_encodings: Encoding::DEFAULT_PREFERENCE.to_vec(),
            allowed_ciphers: Cipher::DEFAULT_PREFERENCE.to_vec(),
        }
    }
}

/// Observation hook over an envelope.
pub type EnvelopeCallback = Arc<dyn Fn(&HiveMessage) + Send + Sync>;
/// Observation hook over a bus message.
pub type BusCallback = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// Optional observation callbacks invoked alongside dispatch.
#[derive(Clone, Default)]
pub struct ListenerCallbacks {
    /// A client asked to broadcast a payload.
    pub on_broadcast: Option<EnvelopeCallback>,
    /// A client asked to propagate a payload.
    pub on_propagate: Option<EnvelopeCallback>,
    /// A client asked to escalate a payload.
    pub on_escalate: Option<EnvelopeCallback>,
    /// A client attempted a fan-out it is not entitled to.
    pub on_illegal: Option<EnvelopeCallback>,
    /// A bus message was forwarded to the agent bus.
    pub on_bus: Option<BusCallback>,
    /// A client shared its own bus traffic (metrics only).
    pub on_shared_bus: Option<BusCallback>,
    /// Extension hook for reserved/unknown envelope types.
    pub on_unknown: Option<EnvelopeCallback>,
}

/// The HiveMind listener.
pub struct HiveMindListener {
    config: ListenerConfig,
    identity: NodeIdentity,
    node_secret: NodeSecret,
    peers: PeerTable,
    store: Mutex<Box<dyn ClientStore>>,
    bus: AgentBus,
    binary: Arc<dyn BinaryDataHandler>,
    callbacks: ListenerCallbacks,
}

impl HiveMindListener {
    /// Build a listener over a client store and a binary handler.
    pub fn new(
        config: ListenerConfig,
        identity: NodeIdentity,
        store: Box<dyn ClientStore>,
        binary: Arc<dyn BinaryDataHandler>,
    ) -> Result<Self> {
        let node_secret = NodeSecret::from_hex(&identity.secret_key)?;
        Ok(Self {
            config,
            identity,
            node_secret,
            peers: PeerTable::new(),
            store: Mutex::new(store),
            bus: AgentBus::default(),
            binary,
            callbacks: ListenerCallbacks::default(),
        })
    }

    /// Attach observation callbacks.
    pub fn with_callbacks(mut self, callbacks: ListenerCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// The agent bus this listener emits into and is driven from.
    pub fn agent_bus(&self) -> AgentBus {
        self.bus.clone()
    }

    /// Accessor clone of the peer table.
    pub fn peers(&self) -> PeerTable {
        self.peers.clone()
    }

    /// The agent-bus consumer for this listener's peer table.
    pub fn bridge(&self) -> AgentBridge {
        AgentBridge::new(self.peers.clone(), self.bus.clone())
    }

    /// Spawn the agent-bus worker driving [`AgentBridge`].
    pub fn spawn_agent_worker(&self) -> tokio::task::JoinHandle<()> {
        let bridge = self.bridge();
        let rx = self.bus.subscribe();
        tokio::spawn(crate::agent::run_bridge(bridge, rx))
    }

    fn lock_store(&self) -> MutexGuard<'_, Box<dyn ClientStore>> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Accept a transport connection carrying an authorization token.
    ///
    /// Decodes the token, checks the client record, applies it to a fresh
    /// connection and runs the greeting (HELLO + HANDSHAKE request).
    pub fn handle_accept(
        &self,
        auth_token: &str,
        transport: Arc<dyn ClientTransport>,
    ) -> Result<Arc<ClientConnection>> {
        let (useragent, api_key) = auth::decode_auth(auth_token)?;
        info!(%useragent, "authorizing client");

        let conn = Arc::new(ClientConnection::new(
            &useragent,
            &api_key,
            transport,
            self.node_secret.clone(),
        ));

        let record = if api_key == REVOKED_KEY {
            None
        } else {
            let mut store = self.lock_store();
            store.sync()?;
            store.get_by_key(&api_key)?
        };
        let Some(record) = record else {
            error!("client provided an invalid access key");
            self.emit_connection_error(&conn, "invalid access key");
            conn.close();
            return Err(ProtocolError::InvalidAccessKey);
        };
        conn.apply_record(&record)?;

        if !conn.has_crypto_key() && !self.config.handshake_enabled && self.config.require_crypto {
            error!("no pre-shared key for client and handshake disabled, but crypto required");
            self.emit_connection_error(&conn, "protocol error");
            conn.close();
            return Err(ProtocolError::ProtocolRequirement(
                "crypto required but no pre-shared key and handshake disabled".into(),
            ));
        }

        self.handle_new_client(&conn)?;
        Ok(conn)
    }

    fn handle_new_client(&self, conn: &Arc<ClientConnection>) -> Result<()> {
        debug!(peer = %conn.peer(), "new client");
        self.bus.emit(BusMessage {
            msg_type: topics::CLIENT_CONNECT.to_string(),
            data: serde_json::json!({
                "key": conn.api_key,
                "session_id": conn.session().session_id,
            }),
            context: MessageContext {
                source: Some(conn.peer()),
                ..MessageContext::default()
            },
        });

        let (pubkey_hex, has_key, has_password) = {
            let st = conn.state();
            (
                st.key_exchange.public_hex(),
                st.crypto_key.is_some(),
                st.pswd_exchange.is_some(),
            )
        };

        let hello = HiveMessage::json(
            HiveMessageType::Hello,
            serde_json::json!({
                "pubkey": pubkey_hex,
                "peer": conn.peer(),
                "node_id": self.identity.peer(),
            }),
        );
        debug!(peer = %conn.peer(), "saying HELLO");
        conn.send(&hello)?;
        conn.set_phase(ConnectionPhase::Greeted);

        let min_version = if !has_key && self.config.require_crypto {
            ProtocolVersion::One
        } else {
            ProtocolVersion::Zero
        };
        let request = serde_json::json!({
            "handshake": !has_key && self.config.handshake_enabled,
            "min_protocol_version": min_version.as_u8(),
            "max_protocol_version": ProtocolVersion::One.as_u8(),
            "binarize": self.config.binarize,
            "preshared_key": has_key,
            "password": has_password,
            "crypto_required": self.config.require_crypto,
            "encodings": self.config.allowed_encodings,
            "ciphers": self.config.allowed_ciphers,
        });
        debug!(peer = %conn.peer(), "requesting handshake");
        conn.send(&HiveMessage::json(HiveMessageType::Handshake, request))?;
        conn.set_phase(ConnectionPhase::Handshaking);
        Ok(())
    }

    /// Transport close: remove from the peer table and notify the agent.
    pub fn handle_client_disconnected(&self, conn: &Arc<ClientConnection>) {
        let peer = conn.peer();
        info!(peer = %peer, "client disconnected");
        self.peers.remove(&peer);
        conn.close();
        self.bus.emit(BusMessage {
            msg_type: topics::CLIENT_DISCONNECT.to_string(),
            data: serde_json::json!({"key": conn.api_key}),
            context: MessageContext {
                source: Some(peer),
                session: Some(conn.session()),
                ..MessageContext::default()
            },
        });
    }

    fn emit_connection_error(&self, conn: &Arc<ClientConnection>, err: &str) {
        self.bus.emit(BusMessage {
            msg_type: topics::CONNECTION_ERROR.to_string(),
            data: serde_json::json!({"error": err, "peer": conn.peer()}),
            context: MessageContext {
                source: Some(conn.peer()),
                ..MessageContext::default()
            },
        });
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Decode and process one transport frame.
    ///
    /// Frame-level failures (bad tag, malformed JSON) drop the frame and
    /// leave the connection open; only key and protocol failures close it.
    pub fn handle_frame(&self, conn: &Arc<ClientConnection>, frame: &TransportFrame) -> Result<()> {
        let decoded = match conn.decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "dropping undecodable frame");
                return Ok(());
            }
        };
        if self.config.require_crypto
            && !decoded.encrypted
            && !matches!(
                decoded.message.msg_type,
                HiveMessageType::Hello | HiveMessageType::Handshake
            )
        {
            warn!(
                peer = %conn.peer(),
                msg_type = ?decoded.message.msg_type,
                "dropping unencrypted frame, crypto is required"
            );
            return Ok(());
        }
        self.handle_message(conn, decoded.message)
    }

    /// Process a decoded envelope.
    pub fn handle_message(&self, conn: &Arc<ClientConnection>, mut message: HiveMessage) -> Result<()> {
        message.update_source_peer(&conn.peer());
        message.update_hop_data();
        debug!(peer = %conn.peer(), msg_type = ?message.msg_type, "handling message");

        match message.msg_type {
            HiveMessageType::Handshake => self.handle_handshake(conn, &message)?,
            HiveMessageType::Hello => self.handle_hello(conn, &message),
            HiveMessageType::Bus => self.handle_bus(conn, &message)?,
            HiveMessageType::SharedBus => self.handle_shared_bus(conn, &message),
            HiveMessageType::Broadcast => self.handle_broadcast(conn, &message)?,
            HiveMessageType::Propagate => self.handle_propagate(conn, &message)?,
            HiveMessageType::Escalate => self.handle_escalate(conn, &message)?,
            HiveMessageType::Intercom => {
                if !self.handle_intercom(conn, &message)? {
                    debug!(peer = %conn.peer(), "intercom message not for us");
                }
            }
            HiveMessageType::Binary => self.handle_binary(conn, &message),
            _ => self.handle_unknown(conn, &message),
        }

        self.touch_last_seen(conn);
        Ok(())
    }

    fn touch_last_seen(&self, conn: &ClientConnection) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut store = self.lock_store();
        let refreshed = store
            .update_timestamp(&conn.api_key, now)
            .and_then(|_| store.commit());
        if let Err(e) = refreshed {
            warn!(error = %e, "failed to refresh last_seen");
        }
    }

    // ------------------------------------------------------------------
    // HELLO / HANDSHAKE
    // ------------------------------------------------------------------

    /// Inbound HELLO: accept peer session, site id and public key.
    fn handle_hello(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) {
        let HivePayload::Json(Value::Object(payload)) = &message.payload else {
            return;
        };
        {
            let mut st = conn.state_mut();
            if let Some(sess) = payload.get("session") {
                if let Ok(sess) = serde_json::from_value::<Session>(sess.clone()) {
                    st.session = sess;
                }
            }
            if let Some(site_id) = payload.get("site_id").and_then(Value::as_str) {
                st.session.site_id = site_id.to_string();
            }
            if let Some(pubkey) = payload.get("pubkey").and_then(Value::as_str) {
                st.peer_pubkey = Some(pubkey.to_string());
            }
        }
        if !conn.session().is_default() {
            self.peers.insert(conn.peer(), conn.clone());
        }
    }

    /// Inbound HANDSHAKE: key agreement, parameter negotiation, rotation.
    fn handle_handshake(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) -> Result<()> {
        debug!(peer = %conn.peer(), "handshake received, deriving session key");
        let HivePayload::Json(Value::Object(payload)) = &message.payload else {
            warn!(peer = %conn.peer(), "malformed handshake, closing");
            conn.close();
            return Ok(());
        };

        {
            let mut st = conn.state_mut();
            if let Some(sess) = payload.get("session") {
                if let Ok(sess) = serde_json::from_value::<Session>(sess.clone()) {
                    st.session = sess;
                }
            }
            if let Some(site_id) = payload.get("site_id").and_then(Value::as_str) {
                st.session.site_id = site_id.to_string();
            }
        }

        let reply: serde_json::Map<String, Value>;

        if let Some(pubkey) = payload.get("pubkey").and_then(Value::as_str) {
            // asymmetric form; also the key-rotation path
            let agreed = {
                let st = conn.state();
                st.key_exchange.agree(pubkey)
            };
            let key = match agreed {
                Ok(key) => key,
                Err(e) => {
                    warn!(peer = %conn.peer(), error = %e, "bad handshake pubkey, closing");
                    conn.close();
                    return Ok(());
                }
            };
            let envelope_hex = {
                let mut st = conn.state_mut();
                st.peer_pubkey = Some(pubkey.to_string());
                // the key replaces the previous one atomically; frames
                // decoded before this point used the old key
                st.crypto_key = Some(key);
                st.key_exchange.public_hex()
            };
            let mut map = serde_json::Map::new();
            map.insert("envelope".into(), Value::String(envelope_hex));
            reply = map;
        } else if conn.state().pswd_exchange.is_some() && payload.contains_key("envelope") {
            // password-derived form: the access key travels, the password
            // never does
            let Some(remote_envelope) = payload.get("envelope").and_then(Value::as_str) else {
                warn!(peer = %conn.peer(), "handshake envelope is not a string, closing");
                conn.close();
                return Ok(());
            };

            let peer_encodings: Vec<Encoding> = string_list(payload.get("encodings"))
                .iter()
                .filter_map(|name| Encoding::from_str_opt(name))
                .collect();
            let peer_ciphers: Vec<Cipher> = string_list(payload.get("ciphers"))
                .iter()
                .filter_map(|name| Cipher::from_str_opt(name))
                .collect();

            let mut chosen_encoding = None;
            let mut chosen_cipher = None;
            if payload.contains_key("encodings") || payload.contains_key("ciphers") {
                let encodings = negotiate(&peer_encodings, &self.config.allowed_encodings);
                let ciphers = negotiate(&peer_ciphers, &self.config.allowed_ciphers);
                if encodings.is_empty() || ciphers.is_empty() {
                    error!(peer = %conn.peer(), "no cipher/encoding intersection with peer");
                    self.emit_connection_error(conn, "protocol error");
                    conn.close();
                    return Ok(());
                }
                chosen_encoding = Some(encodings[0]);
                chosen_cipher = Some(ciphers[0]);
            }

            let binarize = payload
                .get("binarize")
                .and_then(Value::as_bool)
                .unwrap_or(false)
                && self.config.binarize;

            let agreed = {
                let st = conn.state();
                st.pswd_exchange
                    .as_ref()
                    .map(|exchange| (exchange.agree(remote_envelope), exchange.envelope()))
            };
            let (key, local_envelope) = match agreed {
                Some((Ok(key), local_envelope)) => (key, local_envelope),
                Some((Err(e), _)) => {
                    warn!(peer = %conn.peer(), error = %e, "bad handshake envelope, closing");
                    conn.close();
                    return Ok(());
                }
                None => {
                    conn.close();
                    return Ok(());
                }
            };

            let (encoding, cipher) = {
                let mut st = conn.state_mut();
                if let Some(encoding) = chosen_encoding {
                    st.encoding = encoding;
                }
                if let Some(cipher) = chosen_cipher {
                    st.cipher = cipher;
                }
                st.binarize = binarize;
                st.crypto_key = Some(key);
                (st.encoding, st.cipher)
            };

            let mut map = serde_json::Map::new();
            map.insert("envelope".into(), Value::String(local_envelope));
            map.insert(
                "encoding".into(),
                serde_json::to_value(encoding)
                    .map_err(|e| hive_wire::WireError::Serialization(e.to_string()))?,
            );
            map.insert(
                "cipher".into(),
                serde_json::to_value(cipher)
                    .map_err(|e| hive_wire::WireError::Serialization(e.to_string()))?,
            );
            reply = map;
        } else {
            // missing both pubkey and envelope
            warn!(peer = %conn.peer(), "handshake carries neither pubkey nor envelope, closing");
            conn.close();
            return Ok(());
        }

        if conn.session().is_default() {
            warn!(peer = %conn.peer(), "client did not send a session in its handshake");
        } else {
            debug!(peer = %conn.peer(), "registering authenticated client");
            self.peers.insert(conn.peer(), conn.clone());
        }
        conn.set_phase(ConnectionPhase::Authenticated);

        // the peer can now derive the session key on its side
        conn.send(&HiveMessage::json(
            HiveMessageType::Handshake,
            Value::Object(reply),
        ))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // BUS / SHARED_BUS
    // ------------------------------------------------------------------

    fn handle_bus(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) -> Result<()> {
        let Some(bus_msg) = payload_to_bus(&message.payload) else {
            warn!(peer = %conn.peer(), "bus envelope without a bus payload");
            return Ok(());
        };

        // track session updates from the client side, filling in the
        // placeholder id when the client never negotiated one
        let mut sess = bus_msg.session();
        {
            let mut st = conn.state_mut();
            if st.session.is_default() {
                if sess.is_default() {
                    st.session.session_id = uuid::Uuid::new_v4().to_string();
                    debug!(session_id = %st.session.session_id, "generated random session id");
                } else {
                    st.session.session_id = sess.session_id.clone();
                    debug!(session_id = %st.session.session_id, "session id assigned via first message");
                }
            }
            if sess.is_default() {
                sess.session_id = st.session.session_id.clone();
            }
            if st.session.session_id == sess.session_id {
                st.session = sess;
            }
        }
        let peer = conn.peer();
        if !self.peers.contains(&peer) {
            self.peers.insert(peer.clone(), conn.clone());
        }

        if !conn.authorize(&bus_msg.msg_type) {
            warn!(peer = %peer, msg_type = %bus_msg.msg_type, "unauthorized bus message");
            return Ok(());
        }

        // re-sync the store so admin edits apply without a restart
        {
            let mut store = self.lock_store();
            store.sync()?;
            if let Some(record) = store.get_by_key(&conn.api_key)? {
                conn.refresh_blacklists(&record);
            }
        }

        let mut forwarded = bus_msg;
        let mut session = conn.session();
        {
            let st = conn.state();
            session.merge_blacklists(&st.skill_blacklist, &st.intent_blacklist);
        }
        forwarded.context.session = Some(session);

        if forwarded.msg_type == "speak" {
            // injected speak commands must become audible
            forwarded.context.destination = Some(Destination::Many(vec!["audio".into()]));
        } else if forwarded.context.destination.is_none() {
            // ensure the message is not treated as a broadcast
            forwarded.context.destination = Some(Destination::One("skills".into()));
        }
        forwarded.context.peer = Some(peer.clone());
        forwarded.context.source = Some(peer.clone());

        info!(peer = %peer, msg_type = %forwarded.msg_type, "forwarding message to agent bus");
        self.bus.emit(forwarded.clone());
        if let Some(callback) = &self.callbacks.on_bus {
            callback(&forwarded);
        }
        Ok(())
    }

    /// Passive observation of a client's own bus; never forwarded.
    fn handle_shared_bus(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) {
        debug!(peer = %conn.peer(), "monitoring client bus");
        if let Some(callback) = &self.callbacks.on_shared_bus {
            if let Some(bus_msg) = payload_to_bus(&message.payload) {
                callback(&bus_msg);
            }
        }
    }

    // ------------------------------------------------------------------
    // Fan-out primitives
    // ------------------------------------------------------------------

    /// Rebuild the inner envelope of a fan-out primitive: it inherits the
    /// hops accumulated by its carrier, this node becomes the source, and
    /// the originator stops being a target.
    fn unpack(&self, message: &HiveMessage, conn: &ClientConnection) -> Option<HiveMessage> {
        let mut payload = message.payload.as_hive()?.clone();
        payload.replace_route(message.route.clone());
        payload.update_source_peer(&self.identity.peer());
        payload.remove_target_peer(&conn.peer());
        Some(payload)
    }

    /// Deliver `payload` to every connection except the originator,
    /// stamping per-target hop data for loop prevention.
    fn fan_out(&self, payload: &HiveMessage, exclude_peer: &str) {
        for (peer_id, target) in self.peers.snapshot() {
            if peer_id == exclude_peer {
                continue;
            }
            let mut copy = payload.clone();
            copy.target_peers = vec![peer_id.clone()];
            copy.update_hop_data();
            if let Err(e) = target.send(&copy) {
                warn!(peer = %peer_id, error = %e, "fan-out send failed");
            }
        }
    }

    fn emit_upstream(&self, payload: &HiveMessage, conn: &ClientConnection) {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "cannot serialize upstream payload");
                return;
            }
        };
        self.bus.emit(BusMessage {
            msg_type: topics::SEND_UPSTREAM.to_string(),
            data,
            context: MessageContext {
                destination: Some(Destination::One("hive".into())),
                source: Some(self.identity.peer()),
                session: Some(conn.session()),
                ..MessageContext::default()
            },
        });
    }

    /// Shared body of the three fan-out primitives. Returns the unpacked
    /// payload when the caller should continue, `None` when the message was
    /// rejected, looped, or fully handled by a nested intercom.
    fn prepare_fan_out(
        &self,
        conn: &Arc<ClientConnection>,
        message: &HiveMessage,
        permitted: bool,
        action: &str,
        observer: Option<&EnvelopeCallback>,
    ) -> Result<Option<HiveMessage>> {
        let Some(payload) = self.unpack(message, conn) else {
            warn!(peer = %conn.peer(), "{action} envelope without a nested payload");
            return Ok(None);
        };

        if !permitted {
            warn!(peer = %conn.peer(), "received {action} from downstream, illegal action");
            if let Some(callback) = &self.callbacks.on_illegal {
                callback(&payload);
            }
            return Ok(None);
        }

        if message.route_contains(&self.identity.peer()) {
            debug!(peer = %conn.peer(), "{action} already visited this node, dropping");
            return Ok(None);
        }

        if let Some(callback) = observer {
            callback(&payload);
        }

        if payload.msg_type == HiveMessageType::Intercom && self.handle_intercom(conn, &payload)? {
            return Ok(None);
        }

        if payload.msg_type == HiveMessageType::Bus {
            // site-scoped delivery to our own agent bus
            if message.target_site_id.as_deref() == Some(self.identity.site_id.as_str()) {
                self.handle_bus(conn, &payload)?;
            }
        }

        Ok(Some(payload))
    }

    /// Downstream-only fan-out; admin clients only.
    fn handle_broadcast(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) -> Result<()> {
        let observer = self.callbacks.on_broadcast.clone();
        let Some(payload) =
            self.prepare_fan_out(conn, message, conn.is_admin(), "broadcast", observer.as_ref())?
        else {
            return Ok(());
        };
        self.fan_out(&payload, &conn.peer());
        Ok(())
    }

    /// Full-mesh flood: all peers plus upstream.
    fn handle_propagate(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) -> Result<()> {
        debug!(route = ?message.route, "propagate route");
        let permitted = conn.state().can_propagate;
        let observer = self.callbacks.on_propagate.clone();
        let Some(payload) =
            self.prepare_fan_out(conn, message, permitted, "propagate", observer.as_ref())?
        else {
            return Ok(());
        };
        self.fan_out(&payload, &conn.peer());
        self.emit_upstream(&payload, conn);
        Ok(())
    }

    /// Upstream-only forwarding; never fans out downstream.
    fn handle_escalate(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) -> Result<()> {
        info!(peer = %conn.peer(), "received escalate message");
        let permitted = conn.state().can_escalate;
        let observer = self.callbacks.on_escalate.clone();
        let Some(payload) =
            self.prepare_fan_out(conn, message, permitted, "escalate", observer.as_ref())?
        else {
            return Ok(());
        };
        self.emit_upstream(&payload, conn);
        Ok(())
    }

    // ------------------------------------------------------------------
    // INTERCOM
    // ------------------------------------------------------------------

    /// Try to open an intercom envelope addressed to this node.
    ///
    /// Returns `false` when the envelope targets another node's public key
    /// or cannot be decrypted, so the outer dispatcher can keep routing it.
    fn handle_intercom(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) -> Result<bool> {
        if let Some(target_key) = &message.target_public_key {
            if *target_key != self.identity.public_key {
                return Ok(false);
            }
        }

        let recovered = match &message.payload {
            HivePayload::Hive(inner) => (**inner).clone(),
            HivePayload::Json(Value::Object(map)) if map.contains_key("ciphertext") => {
                // the signature field is carried but not verified yet: there
                // is no trusted-pubkey list to verify against
                let Some(ciphertext) = map.get("ciphertext").and_then(Value::as_str) else {
                    return Ok(false);
                };
                match self.open_intercom_ciphertext(ciphertext) {
                    Ok(recovered) => recovered,
                    Err(e) => {
                        if message.target_public_key.is_some() {
                            error!(error = %e, "failed to decrypt intercom message");
                        } else {
                            debug!("failed to decrypt intercom message, not for us");
                        }
                        return Ok(false);
                    }
                }
            }
            _ => return Ok(false),
        };

        match recovered.msg_type {
            HiveMessageType::Bus => {
                self.handle_bus(conn, &recovered)?;
                Ok(true)
            }
            HiveMessageType::Propagate => {
                self.handle_propagate(conn, &recovered)?;
                Ok(true)
            }
            HiveMessageType::Broadcast => {
                self.handle_broadcast(conn, &recovered)?;
                Ok(true)
            }
            HiveMessageType::Escalate => {
                self.handle_escalate(conn, &recovered)?;
                Ok(true)
            }
            HiveMessageType::Binary => {
                self.handle_binary(conn, &recovered);
                Ok(true)
            }
            HiveMessageType::SharedBus => {
                self.handle_shared_bus(conn, &recovered);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn open_intercom_ciphertext(&self, ciphertext_b64: &str) -> Result<HiveMessage> {
        let raw = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| hive_wire::WireError::Encoding(e.to_string()))?;
        let blob = EciesBlob::from_bytes(&raw)?;
        let plaintext = ecies::decrypt(&self.node_secret, &blob)?;
        let text = String::from_utf8(plaintext)
            .map_err(|e| hive_wire::WireError::Deserialization(e.to_string()))?;
        Ok(HiveMessage::deserialize(&text)?)
    }

    // ------------------------------------------------------------------
    // BINARY
    // ------------------------------------------------------------------

    fn handle_binary(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) {
        let Some(data) = message.payload.as_bytes() else {
            warn!(peer = %conn.peer(), "binary envelope without byte payload");
            return;
        };
        let metadata = &message.metadata;
        let sample_rate = metadata
            .get("sample_rate")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_SAMPLE_RATE);
        let sample_width = metadata
            .get("sample_width")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_SAMPLE_WIDTH);
        let lang = metadata.get("lang").and_then(Value::as_str);

        match message.bin_type.unwrap_or(BinaryPayloadType::Undefined) {
            BinaryPayloadType::RawAudio => {
                self.binary.microphone(data, sample_rate, sample_width, conn);
            }
            BinaryPayloadType::SttAudioTranscribe => {
                self.binary
                    .stt_transcribe(data, sample_rate, sample_width, lang, conn);
            }
            BinaryPayloadType::SttAudioHandle => {
                self.binary
                    .stt_handle(data, sample_rate, sample_width, lang, conn);
            }
            BinaryPayloadType::TtsAudio => {
                let utterance = metadata.get("utterance").and_then(Value::as_str);
                let file_name = metadata.get("file_name").and_then(Value::as_str);
                self.binary
                    .receive_tts(data, utterance, lang, file_name, conn);
            }
            BinaryPayloadType::File => {
                let file_name = metadata.get("file_name").and_then(Value::as_str);
                self.binary.receive_file(data, file_name, conn);
            }
            BinaryPayloadType::NumpyImage => {
                let camera_id = metadata.get("camera_id").and_then(Value::as_str);
                self.binary.image(data, camera_id, conn);
            }
            BinaryPayloadType::Undefined => {
                warn!(bytes = data.len(), "ignoring untyped binary data");
            }
        }
    }

    /// Reserved and foreign envelope types: extension hook, default drop.
    fn handle_unknown(&self, conn: &Arc<ClientConnection>, message: &HiveMessage) {
        debug!(peer = %conn.peer(), msg_type = ?message.msg_type, "unhandled message type");
        if let Some(callback) = &self.callbacks.on_unknown {
            callback(message);
        }
    }
}

fn payload_to_bus(payload: &HivePayload) -> Option<BusMessage> {
    match payload {
        HivePayload::Bus(msg) => Some(msg.clone()),
        HivePayload::Json(value) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
