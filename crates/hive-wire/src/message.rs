//! The HiveMessage envelope.
//!
//! A typed container that may wrap an agent-bus message, another envelope,
//! raw JSON, or binary bytes. The envelope is self-contained: routing
//! metadata (hop history, source and target peers, site/public-key targets)
//! travels with the message and is updated at each node it crosses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hive_types::bus::BusMessage;

use crate::{Result, WireError};

/// Envelope message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiveMessageType {
    /// Key agreement and parameter negotiation.
    Handshake,
    /// First message on a connection, in the clear.
    Hello,
    /// Point-to-point agent-bus injection.
    Bus,
    /// Passive sharing of a client's own bus traffic.
    SharedBus,
    /// Downstream fan-out to all connected peers.
    Broadcast,
    /// Full-mesh flood: all peers plus upstream.
    Propagate,
    /// Upstream-only forwarding.
    Escalate,
    /// Opaque envelope with target-public-key routing.
    Intercom,
    /// Type-tagged raw bytes.
    Binary,
    // Reserved types, carried for forward compatibility.
    /// Reserved.
    Ping,
    /// Reserved.
    Query,
    /// Reserved.
    Cascade,
    /// Reserved.
    Rendezvous,
    /// Reserved.
    ThirdParty,
}

impl HiveMessageType {
    /// Numeric code used in binary frames.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Handshake => 0,
            Self::Hello => 1,
            Self::Bus => 2,
            Self::SharedBus => 3,
            Self::Broadcast => 4,
            Self::Propagate => 5,
            Self::Escalate => 6,
            Self::Intercom => 7,
            Self::Binary => 8,
            Self::Ping => 9,
            Self::Query => 10,
            Self::Cascade => 11,
            Self::Rendezvous => 12,
            Self::ThirdParty => 13,
        }
    }

    /// Convert a binary-frame code back to a message type.
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Handshake),
            1 => Some(Self::Hello),
            2 => Some(Self::Bus),
            3 => Some(Self::SharedBus),
            4 => Some(Self::Broadcast),
            5 => Some(Self::Propagate),
            6 => Some(Self::Escalate),
            7 => Some(Self::Intercom),
            8 => Some(Self::Binary),
            9 => Some(Self::Ping),
            10 => Some(Self::Query),
            11 => Some(Self::Cascade),
            12 => Some(Self::Rendezvous),
            13 => Some(Self::ThirdParty),
            _ => None,
        }
    }
}

/// Binary payload type tags for BINARY envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryPayloadType {
    /// Untyped bytes.
    Undefined,
    /// Raw microphone audio.
    RawAudio,
    /// A camera frame.
    NumpyImage,
    /// An arbitrary file.
    File,
    /// Audio to transcribe; transcription is returned to the sender.
    SttAudioTranscribe,
    /// Audio to transcribe and handle as an utterance.
    SttAudioHandle,
    /// Synthesized speech audio.
    TtsAudio,
}

impl BinaryPayloadType {
    /// Numeric code used in binary frames.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::RawAudio => 1,
            Self::NumpyImage => 2,
            Self::File => 3,
            Self::SttAudioTranscribe => 4,
            Self::SttAudioHandle => 5,
            Self::TtsAudio => 6,
        }
    }

    /// Convert a binary-frame code back to a payload type.
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::RawAudio,
            2 => Self::NumpyImage,
            3 => Self::File,
            4 => Self::SttAudioTranscribe,
            5 => Self::SttAudioHandle,
            6 => Self::TtsAudio,
            _ => Self::Undefined,
        }
    }
}

/// One hop in an envelope's route history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteHop {
    /// Peer id of the node the envelope left.
    pub source: String,
    /// The targets it was addressed to at that hop.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// The payload of a [`HiveMessage`].
///
/// JSON deserialization only ever produces the first three variants;
/// `Binary` is constructed by the binary frame decoder and serializes as a
/// base64 string should it ever cross a text frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HivePayload {
    /// A nested envelope (fan-out primitives, intercom).
    Hive(Box<HiveMessage>),
    /// An agent-bus message.
    Bus(BusMessage),
    /// Structured JSON (HELLO and HANDSHAKE payloads, extensions).
    Json(Value),
    /// Raw bytes (BINARY envelopes).
    Binary(#[serde(with = "b64_bytes")] Vec<u8>),
}

impl Default for HivePayload {
    fn default() -> Self {
        HivePayload::Json(Value::Null)
    }
}

impl HivePayload {
    /// The inner agent-bus message, if this payload is one.
    pub fn as_bus(&self) -> Option<&BusMessage> {
        match self {
            HivePayload::Bus(msg) => Some(msg),
            _ => None,
        }
    }

    /// The nested envelope, if this payload is one.
    pub fn as_hive(&self) -> Option<&HiveMessage> {
        match self {
            HivePayload::Hive(msg) => Some(msg),
            _ => None,
        }
    }

    /// The raw bytes, if this payload is binary.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HivePayload::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// The application message type carried by this payload, if any.
    pub fn bus_type(&self) -> Option<&str> {
        match self {
            HivePayload::Bus(msg) => Some(&msg.msg_type),
            HivePayload::Json(Value::Object(map)) => map.get("type").and_then(Value::as_str),
            _ => None,
        }
    }
}

mod b64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// A HiveMind envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HiveMessage {
    /// The envelope type.
    pub msg_type: HiveMessageType,
    /// The payload; may itself be an envelope.
    #[serde(default)]
    pub payload: HivePayload,
    /// Binary payload tag, set for BINARY envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_type: Option<BinaryPayloadType>,
    /// Free-form key/value metadata (sample_rate, lang, file_name, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    /// Ordered hop history, used for loop prevention and diagnostics.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<RouteHop>,
    /// Peer id of the sender at the current hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_peer: Option<String>,
    /// Peers this envelope is addressed to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_peers: Vec<String>,
    /// Restrict delivery to nodes with this site id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_site_id: Option<String>,
    /// Restrict decryption to the node holding this public key (intercom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_public_key: Option<String>,
}

impl HiveMessage {
    /// Create an envelope with the given type and payload.
    pub fn new(msg_type: HiveMessageType, payload: HivePayload) -> Self {
        Self {
            msg_type,
            payload,
            bin_type: None,
            metadata: serde_json::Map::new(),
            route: Vec::new(),
            source_peer: None,
            target_peers: Vec::new(),
            target_site_id: None,
            target_public_key: None,
        }
    }

    /// Create a BUS envelope wrapping an agent-bus message.
    pub fn bus(message: BusMessage) -> Self {
        Self::new(HiveMessageType::Bus, HivePayload::Bus(message))
    }

    /// Create an envelope with a structured JSON payload.
    pub fn json(msg_type: HiveMessageType, payload: Value) -> Self {
        Self::new(msg_type, HivePayload::Json(payload))
    }

    /// Create a BINARY envelope.
    pub fn binary(bin_type: BinaryPayloadType, data: Vec<u8>) -> Self {
        let mut msg = Self::new(HiveMessageType::Binary, HivePayload::Binary(data));
        msg.bin_type = Some(bin_type);
        msg
    }

    /// Serialize to the JSON text-frame form.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| WireError::Serialization(e.to_string()))
    }

    /// Deserialize from the JSON text-frame form.
    pub fn deserialize(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| WireError::Deserialization(e.to_string()))
    }

    /// Record the sender of the current hop.
    pub fn update_source_peer(&mut self, peer: &str) {
        self.source_peer = Some(peer.to_string());
    }

    /// Replace the hop history, used when unpacking a fan-out payload so the
    /// inner envelope inherits the hops accumulated by its carrier.
    pub fn replace_route(&mut self, route: Vec<RouteHop>) {
        self.route = route;
    }

    /// Drop a peer from the target list, so a fan-out does not bounce the
    /// envelope back to its originator.
    pub fn remove_target_peer(&mut self, peer: &str) {
        self.target_peers.retain(|p| p != peer);
    }

    /// Append the current hop to the route unless the last recorded hop
    /// already names the same source.
    pub fn update_hop_data(&mut self) {
        let source = match &self.source_peer {
            Some(peer) if !peer.is_empty() => peer.clone(),
            _ => return,
        };
        let repeated = self
            .route
            .last()
            .map(|hop| hop.source == source)
            .unwrap_or(false);
        if !repeated {
            self.route.push(RouteHop {
                source,
                targets: self.target_peers.clone(),
            });
        }
    }

    /// Whether the route already contains `peer` as a source. A receiver may
    /// discard such a message instead of re-fanning it out.
    pub fn route_contains(&self, peer: &str) -> bool {
        self.route.iter().any(|hop| hop.source == peer)
    }
}
