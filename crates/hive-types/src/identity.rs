//! Node identity.
//!
//! Each broker node owns a name, a site id and an X25519 keypair. The key
//! material is held hex-encoded here so the identity can be persisted as
//! plain JSON; `hive-crypto` owns the typed key representations.

use serde::{Deserialize, Serialize};

/// Persisted identity of a broker node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Human-readable node name.
    pub name: String,
    /// Free-form location tag for site-scoped delivery.
    #[serde(default = "default_site_id")]
    pub site_id: String,
    /// Hex-encoded X25519 public key, announced in HELLO.
    pub public_key: String,
    /// Hex-encoded X25519 secret key.
    pub secret_key: String,
}

fn default_site_id() -> String {
    crate::session::UNKNOWN_SITE_ID.to_string()
}

impl NodeIdentity {
    /// The peer id this node uses for itself in routed envelopes.
    pub fn peer(&self) -> String {
        format!("master:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id() {
        let identity = NodeIdentity {
            name: "office".into(),
            site_id: "hq".into(),
            public_key: "aa".into(),
            secret_key: "bb".into(),
        };
        assert_eq!(identity.peer(), "master:office");
    }

    #[test]
    fn test_site_id_default() {
        let identity: NodeIdentity = serde_json::from_str(
            r#"{"name":"n","public_key":"aa","secret_key":"bb"}"#,
        )
        .expect("deserialize");
        assert_eq!(identity.site_id, "unknown");
    }
}
