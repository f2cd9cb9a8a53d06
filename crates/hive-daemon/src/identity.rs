//! Node identity persistence.
//!
//! The identity (name, site id, X25519 keypair) lives in
//! `$HIVEMIND_DATA_DIR/identity.json` and is generated on first run.

use std::path::Path;

use tracing::info;

use hive_crypto::x25519::NodeSecret;
use hive_types::identity::NodeIdentity;

/// Load the identity from `dir`, generating and persisting a fresh one when
/// none exists.
pub fn load_or_create(dir: &Path) -> anyhow::Result<NodeIdentity> {
    let path = dir.join("identity.json");
    if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        let identity: NodeIdentity = serde_json::from_str(&raw)?;
        // fail early on corrupt key material
        NodeSecret::from_hex(&identity.secret_key)?;
        return Ok(identity);
    }

    let secret = NodeSecret::generate();
    let identity = NodeIdentity {
        name: node_name(),
        site_id: "unknown".to_string(),
        public_key: secret.public().to_hex(),
        secret_key: secret.to_hex(),
    };

    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&identity)?)?;
    info!(name = %identity.name, "generated new node identity");
    Ok(identity)
}

fn node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "hivemind".to_string())
}
