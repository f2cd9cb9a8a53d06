//! The persisted client record.

use serde::{Deserialize, Serialize};

use crate::{DbError, Result};

/// The application message type every client is allowed to send.
pub const UTTERANCE_TYPE: &str = "recognizer_loop:utterance";

/// Sentinel api key marking a tombstoned record.
pub const REVOKED_KEY: &str = "revoked";

/// A client known to the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Monotonic id, unique across live records and tombstones, never
    /// reused. Live clients have ids ≥ 1.
    pub client_id: i64,
    /// Opaque access key presented at connect time.
    pub api_key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Epoch seconds of last activity, -1 if never seen.
    #[serde(default = "default_last_seen")]
    pub last_seen: i64,
    /// Hex-encoded 16-octet pre-shared key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<String>,
    /// Source of the password-derived key agreement, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Inbound application message types this client may inject.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Application message types never sent to this client.
    #[serde(default)]
    pub message_blacklist: Vec<String>,
    /// Skills that must not match for this client.
    #[serde(default)]
    pub skill_blacklist: Vec<String>,
    /// Intents (`skill_id:intent_name`) that must not match.
    #[serde(default)]
    pub intent_blacklist: Vec<String>,
    #[serde(default = "default_true")]
    pub can_broadcast: bool,
    #[serde(default = "default_true")]
    pub can_escalate: bool,
    #[serde(default = "default_true")]
    pub can_propagate: bool,
}

fn default_last_seen() -> i64 {
    -1
}

fn default_allowed_types() -> Vec<String> {
    vec![UTTERANCE_TYPE.to_string()]
}

fn default_true() -> bool {
    true
}

impl ClientRecord {
    /// Create a record with defaults: no denylists, all capability bits set,
    /// the utterance type allowed.
    pub fn new(client_id: i64, api_key: &str, name: &str) -> Self {
        Self {
            client_id,
            api_key: api_key.to_string(),
            name: name.to_string(),
            description: String::new(),
            is_admin: false,
            last_seen: default_last_seen(),
            crypto_key: None,
            password: None,
            allowed_types: default_allowed_types(),
            message_blacklist: Vec::new(),
            skill_blacklist: Vec::new(),
            intent_blacklist: Vec::new(),
            can_broadcast: true,
            can_escalate: true,
            can_propagate: true,
        }
    }

    /// The tombstone that replaces a revoked record; only the id survives.
    pub fn tombstone(client_id: i64) -> Self {
        Self::new(client_id, REVOKED_KEY, "")
    }

    /// Whether this record is a tombstone.
    pub fn is_revoked(&self) -> bool {
        self.api_key == REVOKED_KEY
    }

    /// Guarantee the utterance type is always allowed.
    pub fn ensure_utterance_allowed(&mut self) {
        if !self.allowed_types.iter().any(|t| t == UTTERANCE_TYPE) {
            self.allowed_types.push(UTTERANCE_TYPE.to_string());
        }
    }

    /// Decode and validate the pre-shared key.
    ///
    /// Material that is not exactly 16 octets is rejected, not truncated.
    pub fn crypto_key_bytes(&self) -> Result<Option<[u8; 16]>> {
        let Some(encoded) = &self.crypto_key else {
            return Ok(None);
        };
        let raw = hex::decode(encoded)
            .map_err(|e| DbError::InvalidRecord(format!("crypto_key is not hex: {e}")))?;
        let bytes: [u8; 16] = raw.as_slice().try_into().map_err(|_| {
            DbError::InvalidRecord(format!(
                "crypto_key must be 16 octets, got {}",
                raw.len()
            ))
        })?;
        Ok(Some(bytes))
    }

    /// Validate invariants before a write.
    pub fn validate(&self) -> Result<()> {
        self.crypto_key_bytes()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = ClientRecord::new(1, "key-1", "kitchen");
        assert_eq!(record.last_seen, -1);
        assert!(record.can_broadcast && record.can_escalate && record.can_propagate);
        assert_eq!(record.allowed_types, vec![UTTERANCE_TYPE]);
        assert!(!record.is_revoked());
    }

    #[test]
    fn test_tombstone() {
        let tomb = ClientRecord::tombstone(7);
        assert_eq!(tomb.client_id, 7);
        assert!(tomb.is_revoked());
    }

    #[test]
    fn test_ensure_utterance_allowed() {
        let mut record = ClientRecord::new(1, "k", "n");
        record.allowed_types = vec!["speak".into()];
        record.ensure_utterance_allowed();
        assert_eq!(record.allowed_types, vec!["speak", UTTERANCE_TYPE]);

        // idempotent
        record.ensure_utterance_allowed();
        assert_eq!(record.allowed_types.len(), 2);
    }

    #[test]
    fn test_crypto_key_validation() {
        let mut record = ClientRecord::new(1, "k", "n");
        assert_eq!(record.crypto_key_bytes().expect("none"), None);

        record.crypto_key = Some(hex::encode([0xAB; 16]));
        assert_eq!(record.crypto_key_bytes().expect("some"), Some([0xAB; 16]));

        // 32 octets: rejected, not truncated
        record.crypto_key = Some(hex::encode([0xAB; 32]));
        assert!(record.crypto_key_bytes().is_err());

        record.crypto_key = Some("zz".into());
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let record: ClientRecord =
            serde_json::from_str(r#"{"client_id":3,"api_key":"abc"}"#).expect("deserialize");
        assert_eq!(record.client_id, 3);
        assert_eq!(record.allowed_types, vec![UTTERANCE_TYPE]);
        assert!(record.can_propagate);
        assert_eq!(record.last_seen, -1);
    }
}
