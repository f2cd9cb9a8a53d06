//! JSON-file client store, the default backend.
//!
//! Records live in a single JSON array on disk. `sync()` re-reads the file,
//! which is small enough to keep the per-message re-sync cheap.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AddOutcome, ClientRecord, ClientStore, DbError, Result};

/// Client store backed by a JSON file.
///
/// A store created with [`JsonClientStore::ephemeral`] keeps everything in
/// memory; useful for tests and throwaway brokers.
pub struct JsonClientStore {
    path: Option<PathBuf>,
    records: Vec<ClientRecord>,
}

impl JsonClientStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            records: Vec::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Create a memory-only store.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            records: Vec::new(),
        }
    }

    fn reload(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            self.records = Vec::new();
            return Ok(());
        }
        let raw = std::fs::read_to_string(path)?;
        self.records = serde_json::from_str(&raw)
            .map_err(|e| DbError::Serialization(format!("bad client db: {e}")))?;
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.records
            .iter()
            .map(|r| r.client_id)
            .max()
            .unwrap_or(0)
            .max(0)
            + 1
    }
}

impl ClientStore for JsonClientStore {
    fn add(&mut self, mut record: ClientRecord) -> Result<AddOutcome> {
        record.ensure_utterance_allowed();
        record.validate()?;
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.api_key == record.api_key)
        {
            record.client_id = existing.client_id;
            *existing = record.clone();
            debug!(api_key = %record.api_key, "updated existing client record");
            return Ok(AddOutcome::Updated(record));
        }
        record.client_id = self.next_id();
        self.records.push(record.clone());
        debug!(client_id = record.client_id, "created client record");
        Ok(AddOutcome::Created(record))
    }

    fn get_by_key(&self, api_key: &str) -> Result<Option<ClientRecord>> {
        Ok(self
            .records
            .iter()
            .find(|r| r.api_key == api_key)
            .cloned())
    }

    fn get_by_name(&self, name: &str) -> Result<Vec<ClientRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect())
    }

    fn delete(&mut self, api_key: &str) -> Result<bool> {
        if api_key == crate::REVOKED_KEY {
            return Ok(false);
        }
        match self.records.iter_mut().find(|r| r.api_key == api_key) {
            Some(record) => {
                *record = ClientRecord::tombstone(record.client_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update(&mut self, record: &ClientRecord) -> Result<()> {
        record.validate()?;
        match self
            .records
            .iter_mut()
            .find(|r| r.client_id == record.client_id)
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(DbError::InvalidRecord(format!(
                "no record with id {}",
                record.client_id
            ))),
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.reload()
    }

    fn commit(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.records)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<ClientRecord>> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_allocates_monotonic_ids() {
        let mut store = JsonClientStore::ephemeral();
        let a = store
            .add(ClientRecord::new(0, "key-a", "a"))
            .expect("add");
        let b = store
            .add(ClientRecord::new(0, "key-b", "b"))
            .expect("add");
        assert_eq!(a.record().client_id, 1);
        assert_eq!(b.record().client_id, 2);
        assert!(matches!(a, AddOutcome::Created(_)));
    }

    #[test]
    fn test_add_same_key_updates_in_place() {
        let mut store = JsonClientStore::ephemeral();
        store
            .add(ClientRecord::new(0, "key-a", "old name"))
            .expect("add");
        let outcome = store
            .add(ClientRecord::new(0, "key-a", "new name"))
            .expect("add");
        assert!(matches!(outcome, AddOutcome::Updated(_)));
        assert_eq!(outcome.record().client_id, 1);
        assert_eq!(store.list().expect("list").len(), 1);
        assert_eq!(
            store.get_by_key("key-a").expect("get").expect("some").name,
            "new name"
        );
    }

    #[test]
    fn test_delete_tombstones_and_ids_stay_monotonic() {
        let mut store = JsonClientStore::ephemeral();
        store.add(ClientRecord::new(0, "key-a", "a")).expect("add");
        store.add(ClientRecord::new(0, "key-b", "b")).expect("add");

        assert!(store.delete("key-a").expect("delete"));
        assert!(!store.delete("key-a").expect("delete again"));

        // tombstone kept its id, so the next id continues past it
        let c = store.add(ClientRecord::new(0, "key-c", "c")).expect("add");
        assert_eq!(c.record().client_id, 3);

        let all = store.list().expect("list");
        assert_eq!(all.len(), 3);
        assert!(all[0].is_revoked());
    }

    #[test]
    fn test_get_by_name() {
        let mut store = JsonClientStore::ephemeral();
        store.add(ClientRecord::new(0, "key-a", "dup")).expect("add");
        store.add(ClientRecord::new(0, "key-b", "dup")).expect("add");
        assert_eq!(store.get_by_name("dup").expect("get").len(), 2);
        assert!(store.get_by_name("nobody").expect("get").is_empty());
    }

    #[test]
    fn test_update_timestamp_default_impl() {
        let mut store = JsonClientStore::ephemeral();
        store.add(ClientRecord::new(0, "key-a", "a")).expect("add");
        assert!(store.update_timestamp("key-a", 12345).expect("update"));
        assert_eq!(
            store.get_by_key("key-a").expect("get").expect("some").last_seen,
            12345
        );
        assert!(!store.update_timestamp("missing", 1).expect("update"));
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clients.json");

        let mut store = JsonClientStore::open(&path).expect("open");
        store.add(ClientRecord::new(0, "key-a", "a")).expect("add");
        store.commit().expect("commit");

        let store = JsonClientStore::open(&path).expect("reopen");
        let record = store.get_by_key("key-a").expect("get").expect("some");
        assert_eq!(record.name, "a");
    }

    #[test]
    fn test_sync_picks_up_external_edit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clients.json");

        let mut store = JsonClientStore::open(&path).expect("open");
        store.add(ClientRecord::new(0, "key-a", "a")).expect("add");
        store.commit().expect("commit");

        // out-of-band admin edit
        let mut other = JsonClientStore::open(&path).expect("open");
        other
            .change_name("key-a", "renamed")
            .expect("change name");
        other.commit().expect("commit");

        store.sync().expect("sync");
        assert_eq!(
            store.get_by_key("key-a").expect("get").expect("some").name,
            "renamed"
        );
    }

    #[test]
    fn test_rejects_bad_crypto_key() {
        let mut store = JsonClientStore::ephemeral();
        let mut record = ClientRecord::new(0, "key-a", "a");
        record.crypto_key = Some("deadbeef".into()); // only 4 octets
        assert!(store.add(record).is_err());
    }
}
