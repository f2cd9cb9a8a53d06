//! Per-connection session state.
//!
//! A session travels inside agent-bus message contexts. Unknown fields are
//! preserved so foreign session data survives a round trip through the
//! broker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The placeholder session id used until a client negotiates one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Site id used when the client never announced a location.
pub const UNKNOWN_SITE_ID: &str = "unknown";

/// A client session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier; `"default"` until negotiated.
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// Free-form location tag.
    #[serde(default = "default_site_id")]
    pub site_id: String,
    /// Skills that must not match for this session.
    #[serde(default)]
    pub blacklisted_skills: Vec<String>,
    /// Intents (`skill_id:intent_name`) that must not match.
    #[serde(default)]
    pub blacklisted_intents: Vec<String>,
    /// Passthrough of foreign session fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

fn default_site_id() -> String {
    UNKNOWN_SITE_ID.to_string()
}

impl Default for Session {
    fn default() -> Self {
        Self {
            session_id: default_session_id(),
            site_id: default_site_id(),
            blacklisted_skills: Vec::new(),
            blacklisted_intents: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Session {
    /// Create a session with the given id.
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            ..Self::default()
        }
    }

    /// Generate a session with a fresh random v4 uuid.
    pub fn random() -> Self {
        Self::new(&uuid::Uuid::new_v4().to_string())
    }

    /// Whether this session still carries the placeholder id.
    pub fn is_default(&self) -> bool {
        self.session_id == DEFAULT_SESSION_ID
    }

    /// Union-merge denylists into this session, preserving order and
    /// skipping duplicates.
    pub fn merge_blacklists(&mut self, skills: &[String], intents: &[String]) {
        for s in skills {
            if !self.blacklisted_skills.contains(s) {
                self.blacklisted_skills.push(s.clone());
            }
        }
        for i in intents {
            if !self.blacklisted_intents.contains(i) {
                self.blacklisted_intents.push(i.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session() {
        let sess = Session::default();
        assert!(sess.is_default());
        assert_eq!(sess.site_id, UNKNOWN_SITE_ID);
    }

    #[test]
    fn test_random_session_is_not_default() {
        let sess = Session::random();
        assert!(!sess.is_default());
        assert_ne!(Session::random().session_id, sess.session_id);
    }

    #[test]
    fn test_merge_blacklists_no_duplicates() {
        let mut sess = Session::new("s1");
        sess.blacklisted_skills = vec!["skill-a".into()];
        sess.merge_blacklists(
            &["skill-a".into(), "skill-b".into()],
            &["skill-a:intent".into()],
        );
        assert_eq!(sess.blacklisted_skills, vec!["skill-a", "skill-b"]);
        assert_eq!(sess.blacklisted_intents, vec!["skill-a:intent"]);
    }

    #[test]
    fn test_foreign_fields_survive_roundtrip() {
        let json = r#"{"session_id":"s1","site_id":"kitchen","lang":"en-us","pipeline":["a","b"]}"#;
        let sess: Session = serde_json::from_str(json).expect("deserialize");
        assert_eq!(sess.session_id, "s1");
        assert_eq!(sess.extra.get("lang"), Some(&Value::String("en-us".into())));

        let back = serde_json::to_value(&sess).expect("serialize");
        assert_eq!(back.get("lang"), Some(&Value::String("en-us".into())));
        assert_eq!(back.get("site_id"), Some(&Value::String("kitchen".into())));
    }
}
