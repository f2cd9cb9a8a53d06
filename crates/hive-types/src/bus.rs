//! Agent-bus message model.
//!
//! The broker relays JSON messages of the shape
//! `{"type": ..., "data": {...}, "context": {...}}` between clients and the
//! collocated agent bus. Routing metadata (source, destination, peer,
//! session) lives in the context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::Session;

/// A message on the agent bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Application message type, e.g. `recognizer_loop:utterance`.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
    /// Routing metadata.
    #[serde(default)]
    pub context: MessageContext,
}

/// Routing metadata attached to a [`BusMessage`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    /// The session this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    /// Who produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Where the message should be delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    /// The broker peer id of the originating connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Passthrough of foreign context fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A destination: a single target or a list of targets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    /// A single target.
    One(String),
    /// Multiple targets.
    Many(Vec<String>),
}

impl Destination {
    /// Whether `target` is named by this destination.
    pub fn contains(&self, target: &str) -> bool {
        match self {
            Destination::One(d) => d == target,
            Destination::Many(ds) => ds.iter().any(|d| d == target),
        }
    }

    /// All named targets.
    pub fn targets(&self) -> Vec<String> {
        match self {
            Destination::One(d) => vec![d.clone()],
            Destination::Many(ds) => ds.clone(),
        }
    }
}

impl BusMessage {
    /// Create a message with empty data and context.
    pub fn new(msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data: Value::Object(serde_json::Map::new()),
            context: MessageContext::default(),
        }
    }

    /// Create a message with the given data payload.
    pub fn with_data(msg_type: &str, data: Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data,
            context: MessageContext::default(),
        }
    }

    /// The session carried in the context, or a default one.
    pub fn session(&self) -> Session {
        self.context.session.clone().unwrap_or_default()
    }

    /// Serialize to the JSON string used on the bus.
    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from the JSON string used on the bus.
    pub fn deserialize(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_field_rename() {
        let msg = BusMessage::new("recognizer_loop:utterance");
        let json = msg.serialize().expect("serialize");
        assert!(json.contains("\"type\":\"recognizer_loop:utterance\""));
    }

    #[test]
    fn test_destination_forms() {
        let one: Destination = serde_json::from_str("\"skills\"").expect("deserialize");
        assert!(one.contains("skills"));

        let many: Destination = serde_json::from_str("[\"audio\",\"skills\"]").expect("deserialize");
        assert!(many.contains("audio"));
        assert!(!many.contains("tts"));
        assert_eq!(many.targets().len(), 2);
    }

    #[test]
    fn test_roundtrip_with_session() {
        let mut msg = BusMessage::with_data(
            "speak",
            serde_json::json!({"utterance": "hello there"}),
        );
        msg.context.session = Some(Session::new("s1"));
        msg.context.peer = Some("term::1::cli::s1".into());

        let raw = msg.serialize().expect("serialize");
        let back = BusMessage::deserialize(&raw).expect("deserialize");
        assert_eq!(back, msg);
        assert_eq!(back.session().session_id, "s1");
    }

    #[test]
    fn test_missing_context_defaults() {
        let back = BusMessage::deserialize(r#"{"type":"ping"}"#).expect("deserialize");
        assert_eq!(back.msg_type, "ping");
        assert!(back.context.session.is_none());
        assert!(back.session().is_default());
    }
}
