//! Server configuration.
//!
//! Loaded from `$HIVEMIND_DATA_DIR/server.toml` (or the platform data dir),
//! falling back to defaults when the file does not exist. Every field has a
//! serde default so partial files stay valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use hive_crypto::cipher::Cipher;
use hive_listener::ListenerConfig;
use hive_wire::encoding::Encoding;

/// Complete broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Advertise binary framing support during the handshake.
    #[serde(default)]
    pub binarize: bool,
    /// Reject unencrypted traffic after the handshake window.
    #[serde(default = "default_true")]
    pub require_crypto: bool,
    /// Derive a key per session when no pre-shared key exists.
    #[serde(default = "default_true")]
    pub handshake_enabled: bool,
    /// Accepted encodings, in preference order.
    #[serde(default = "default_encodings")]
    pub allowed_encodings: Vec<String>,
    /// Accepted ciphers, in preference order.
    #[serde(default = "default_ciphers")]
    pub allowed_ciphers: Vec<String>,
    /// Client record store selection.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Agent bus bridge selection.
    #[serde(default)]
    pub agent_protocol: AgentProtocolConfig,
    /// Transport selection and binding.
    #[serde(default)]
    pub network_protocol: NetworkProtocolConfig,
}

/// Store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Module name resolved through the store registry.
    #[serde(default = "default_db_module")]
    pub module: String,
    /// Module-specific options.
    #[serde(default = "default_options")]
    pub config: serde_json::Value,
}

/// Agent bridge selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProtocolConfig {
    /// Module name; empty runs the built-in broadcast bus only.
    #[serde(default)]
    pub module: String,
    /// Module-specific options.
    #[serde(default = "default_options")]
    pub config: serde_json::Value,
}

/// Transport selection and binding, handed to the external transport
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProtocolConfig {
    /// Module name; empty runs headless (embedding drives the listener).
    #[serde(default)]
    pub module: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub cert_dir: String,
    #[serde(default = "default_cert_name")]
    pub cert_name: String,
}

fn default_true() -> bool {
    true
}

// TOML has no null, so module options default to an empty table
fn default_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_encodings() -> Vec<String> {
    Encoding::DEFAULT_PREFERENCE
        .iter()
        .map(|e| e.as_str().to_string())
        .collect()
}

fn default_ciphers() -> Vec<String> {
    Cipher::DEFAULT_PREFERENCE
        .iter()
        .map(|c| c.as_str().to_string())
        .collect()
}

fn default_db_module() -> String {
    "hivemind-json-db".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5678
}

fn default_cert_name() -> String {
    "hivemind".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binarize: false,
            require_crypto: true,
            handshake_enabled: true,
            allowed_encodings: default_encodings(),
            allowed_ciphers: default_ciphers(),
            database: DatabaseConfig::default(),
            agent_protocol: AgentProtocolConfig::default(),
            network_protocol: NetworkProtocolConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            module: default_db_module(),
            config: default_options(),
        }
    }
}

impl Default for AgentProtocolConfig {
    fn default() -> Self {
        Self {
            module: String::new(),
            config: default_options(),
        }
    }
}

impl Default for NetworkProtocolConfig {
    fn default() -> Self {
        Self {
            module: String::new(),
            host: default_host(),
            port: default_port(),
            ssl: false,
            cert_dir: String::new(),
            cert_name: default_cert_name(),
        }
    }
}

impl ServerConfig {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: ServerConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the configured encoding names, rejecting unknown ones.
    pub fn encodings(&self) -> anyhow::Result<Vec<Encoding>> {
        self.allowed_encodings
            .iter()
            .map(|name| {
                Encoding::from_str_opt(name)
                    .ok_or_else(|| anyhow::anyhow!("unknown encoding {name:?} in config"))
            })
            .collect()
    }

    /// Resolve the configured cipher names, rejecting unknown ones.
    pub fn ciphers(&self) -> anyhow::Result<Vec<Cipher>> {
        self.allowed_ciphers
            .iter()
            .map(|name| {
                Cipher::from_str_opt(name)
                    .ok_or_else(|| anyhow::anyhow!("unknown cipher {name:?} in config"))
            })
            .collect()
    }

    /// Translate into the listener's configuration.
    pub fn listener_config(&self) -> anyhow::Result<ListenerConfig> {
        Ok(ListenerConfig {
            require_crypto: self.require_crypto,
            handshake_enabled: self.handshake_enabled,
            binarize: self.binarize,
            allowed_encodings: self.encodings()?,
            allowed_ciphers: self.ciphers()?,
        })
    }

    /// The data directory, honoring the `HIVEMIND_DATA_DIR` override.
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("HIVEMIND_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".hivemind"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/hivemind"))
    }

    fn config_path() -> PathBuf {
        Self::data_dir().join("server.toml")
    }

    /// The store config with a default path under the data dir filled in.
    pub fn database_options(&self) -> serde_json::Value {
        let unset = match &self.database.config {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if unset {
            let default_path = match self.database.module.as_str() {
                "hivemind-sqlite-db" => Self::data_dir().join("clients.db"),
                _ => Self::data_dir().join("clients.json"),
            };
            serde_json::json!({"path": default_path.to_string_lossy()})
        } else {
            self.database.config.clone()
        }
    }
}
