//! Named-constructor registry for pluggable backends.
//!
//! Configuration selects backends by module name (`database.module`,
//! `network_protocol.module`, ...). A compile-time registration table maps
//! those names to constructors; there is no dynamic loading.

use std::collections::HashMap;
use std::path::PathBuf;

use hive_db::{ClientStore, JsonClientStore, SqliteClientStore};

/// A constructor taking the module-specific config section.
pub type Constructor<T> = Box<dyn Fn(&serde_json::Value) -> Result<T, String> + Send + Sync>;

/// A table of named constructors.
pub struct Registry<T> {
    constructors: HashMap<String, Constructor<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor under a module name.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&serde_json::Value) -> Result<T, String> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
    }

    /// Build the backend selected by `name`.
    pub fn create(&self, name: &str, config: &serde_json::Value) -> Result<T, String> {
        match self.constructors.get(name) {
            Some(constructor) => constructor(config),
            None => Err(format!(
                "unknown module {name:?}, registered: {:?}",
                self.names()
            )),
        }
    }

    /// The registered module names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The client-store registry with the built-in backends.
///
/// - `hivemind-json-db`: `{"path": "..."}`; no path means memory-only.
/// - `hivemind-sqlite-db`: `{"path": "..."}`; no path means in-memory.
pub fn store_registry() -> Registry<Box<dyn ClientStore>> {
    let mut registry: Registry<Box<dyn ClientStore>> = Registry::new();

    registry.register("hivemind-json-db", |config| {
        match config.get("path").and_then(|v| v.as_str()) {
            Some(path) => JsonClientStore::open(&PathBuf::from(path))
                .map(|s| Box::new(s) as Box<dyn ClientStore>)
                .map_err(|e| e.to_string()),
            None => Ok(Box::new(JsonClientStore::ephemeral())),
        }
    });

    registry.register("hivemind-sqlite-db", |config| {
        match config.get("path").and_then(|v| v.as_str()) {
            Some(path) => SqliteClientStore::open(&PathBuf::from(path))
                .map(|s| Box::new(s) as Box<dyn ClientStore>)
                .map_err(|e| e.to_string()),
            None => SqliteClientStore::open_memory()
                .map(|s| Box::new(s) as Box<dyn ClientStore>)
                .map_err(|e| e.to_string()),
        }
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_db::ClientRecord;

    #[test]
    fn test_store_registry_builds_backends() {
        let registry = store_registry();
        assert_eq!(
            registry.names(),
            vec!["hivemind-json-db", "hivemind-sqlite-db"]
        );

        let mut store = registry
            .create("hivemind-json-db", &serde_json::json!({}))
            .expect("json backend");
        store
            .add(ClientRecord::new(0, "key-a", "a"))
            .expect("usable store");

        let store = registry
            .create("hivemind-sqlite-db", &serde_json::json!({}))
            .expect("sqlite backend");
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn test_unknown_module_lists_candidates() {
        let registry = store_registry();
        let err = registry
            .create("hivemind-redis-db", &serde_json::json!({}))
            .err()
            .expect("unknown module");
        assert!(err.contains("hivemind-json-db"));
    }
}
