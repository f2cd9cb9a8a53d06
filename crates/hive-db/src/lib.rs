//! # hive-db
//!
//! Persistent client record store for the HiveMind listener.
//!
//! Records are keyed on `api_key` with a secondary lookup on `name`.
//! Revocation never removes a record: it is replaced by a tombstone that
//! keeps the `client_id`, so ids stay monotonic and are never reused.
//!
//! The backing store is pluggable behind [`ClientStore`]; this crate ships a
//! JSON-file backend (the default) and a SQLite backend.

pub mod client;
pub mod json_store;
pub mod sqlite_store;

pub use client::{ClientRecord, REVOKED_KEY, UTTERANCE_TYPE};
pub use json_store::JsonClientStore;
pub use sqlite_store::SqliteClientStore;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Outcome of [`ClientStore::add`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// A new record was created with a freshly allocated id.
    Created(ClientRecord),
    /// A record with the same api key already existed and was updated.
    Updated(ClientRecord),
}

impl AddOutcome {
    /// The stored record, whichever way it got there.
    pub fn record(&self) -> &ClientRecord {
        match self {
            AddOutcome::Created(r) | AddOutcome::Updated(r) => r,
        }
    }
}

/// A persistent map of access key to client record.
///
/// Iteration order is insertion order and includes tombstones. Writes are
/// committed on [`ClientStore::commit`]; [`ClientStore::sync`] reloads
/// out-of-band admin edits and must stay cheap since the listener calls it
/// on every authorized bus message.
pub trait ClientStore: Send {
    /// Insert or merge a record. A record with the same `api_key` is
    /// updated in place keeping its id; otherwise a new id (current max + 1,
    /// tombstones included) is allocated.
    fn add(&mut self, record: ClientRecord) -> Result<AddOutcome>;

    /// Look up a record by access key.
    fn get_by_key(&self, api_key: &str) -> Result<Option<ClientRecord>>;

    /// Look up records by name.
    fn get_by_name(&self, name: &str) -> Result<Vec<ClientRecord>>;

    /// Revoke a record, replacing it with a tombstone. Returns whether a
    /// live record was found.
    fn delete(&mut self, api_key: &str) -> Result<bool>;

    /// Write back all fields of an existing record (matched by id).
    fn update(&mut self, record: &ClientRecord) -> Result<()>;

    /// Reload from the backing store to pick up out-of-band edits.
    fn sync(&mut self) -> Result<()>;

    /// Flush pending writes to the backing store.
    fn commit(&mut self) -> Result<()>;

    /// All records, live and tombstoned, in insertion order.
    fn list(&self) -> Result<Vec<ClientRecord>>;

    // Admin operations, expressed over the primitives above.

    /// Refresh a client's last-seen timestamp.
    fn update_timestamp(&mut self, api_key: &str, timestamp: i64) -> Result<bool> {
        match self.get_by_key(api_key)? {
            Some(mut record) => {
                record.last_seen = timestamp;
                self.update(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rotate a client's access key.
    fn change_key(&mut self, old_key: &str, new_key: &str) -> Result<bool> {
        match self.get_by_key(old_key)? {
            Some(mut record) => {
                record.api_key = new_key.to_string();
                self.update(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace a client's pre-shared crypto key (hex, 16 octets).
    fn change_crypto_key(&mut self, api_key: &str, crypto_key: Option<String>) -> Result<bool> {
        match self.get_by_key(api_key)? {
            Some(mut record) => {
                record.crypto_key = crypto_key;
                record.validate()?;
                self.update(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace a client's password.
    fn change_password(&mut self, api_key: &str, password: Option<String>) -> Result<bool> {
        match self.get_by_key(api_key)? {
            Some(mut record) => {
                record.password = password;
                self.update(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rename a client.
    fn change_name(&mut self, api_key: &str, name: &str) -> Result<bool> {
        match self.get_by_key(api_key)? {
            Some(mut record) => {
                record.name = name.to_string();
                self.update(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace a client's denylists.
    fn change_blacklists(
        &mut self,
        api_key: &str,
        messages: Vec<String>,
        skills: Vec<String>,
        intents: Vec<String>,
    ) -> Result<bool> {
        match self.get_by_key(api_key)? {
            Some(mut record) => {
                record.message_blacklist = messages;
                record.skill_blacklist = skills;
                record.intent_blacklist = intents;
                self.update(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
