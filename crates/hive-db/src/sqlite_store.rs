//! SQLite client store.
//!
//! One table, WAL mode, list columns JSON-encoded. Reads go straight to the
//! database, so `sync()` has nothing to do and out-of-band admin edits are
//! visible immediately.

use std::path::Path;

use rusqlite::Connection;

use crate::{AddOutcome, ClientRecord, ClientStore, DbError, Result, REVOKED_KEY};

/// Client store backed by SQLite.
pub struct SqliteClientStore {
    conn: Connection,
}

impl SqliteClientStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        configure(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRecord> {
        let decode_list = |idx: usize| -> rusqlite::Result<Vec<String>> {
            let raw: String = row.get(idx)?;
            Ok(serde_json::from_str(&raw).unwrap_or_default())
        };
        Ok(ClientRecord {
            client_id: row.get(0)?,
            api_key: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            is_admin: row.get(4)?,
            last_seen: row.get(5)?,
            crypto_key: row.get(6)?,
            password: row.get(7)?,
            allowed_types: decode_list(8)?,
            message_blacklist: decode_list(9)?,
            skill_blacklist: decode_list(10)?,
            intent_blacklist: decode_list(11)?,
            can_broadcast: row.get(12)?,
            can_escalate: row.get(13)?,
            can_propagate: row.get(14)?,
        })
    }

    fn write_record(&self, record: &ClientRecord) -> Result<()> {
        let encode = |list: &Vec<String>| -> Result<String> {
            serde_json::to_string(list).map_err(|e| DbError::Serialization(e.to_string()))
        };
        self.conn.execute(
            "INSERT INTO clients (client_id, api_key, name, description, is_admin, last_seen,
                                  crypto_key, password, allowed_types, message_blacklist,
                                  skill_blacklist, intent_blacklist, can_broadcast,
                                  can_escalate, can_propagate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(client_id) DO UPDATE SET
                 api_key = excluded.api_key,
                 name = excluded.name,
                 description = excluded.description,
                 is_admin = excluded.is_admin,
                 last_seen = excluded.last_seen,
                 crypto_key = excluded.crypto_key,
                 password = excluded.password,
                 allowed_types = excluded.allowed_types,
                 message_blacklist = excluded.message_blacklist,
                 skill_blacklist = excluded.skill_blacklist,
                 intent_blacklist = excluded.intent_blacklist,
                 can_broadcast = excluded.can_broadcast,
                 can_escalate = excluded.can_escalate,
                 can_propagate = excluded.can_propagate",
            rusqlite::params![
                record.client_id,
                record.api_key,
                record.name,
                record.description,
                record.is_admin,
                record.last_seen,
                record.crypto_key,
                record.password,
                encode(&record.allowed_types)?,
                encode(&record.message_blacklist)?,
                encode(&record.skill_blacklist)?,
                encode(&record.intent_blacklist)?,
                record.can_broadcast,
                record.can_escalate,
                record.can_propagate,
            ],
        )?;
        Ok(())
    }

    fn select(&self, where_clause: &str, param: &str) -> Result<Vec<ClientRecord>> {
        let sql = format!(
            "SELECT client_id, api_key, name, description, is_admin, last_seen, crypto_key,
                    password, allowed_types, message_blacklist, skill_blacklist,
                    intent_blacklist, can_broadcast, can_escalate, can_propagate
             FROM clients {where_clause} ORDER BY client_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if where_clause.is_empty() {
            stmt.query_map([], Self::row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            stmt.query_map([param], Self::row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients (
            client_id INTEGER PRIMARY KEY,
            api_key TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            is_admin INTEGER NOT NULL DEFAULT 0,
            last_seen INTEGER NOT NULL DEFAULT -1,
            crypto_key TEXT,
            password TEXT,
            allowed_types TEXT NOT NULL DEFAULT '[]',
            message_blacklist TEXT NOT NULL DEFAULT '[]',
            skill_blacklist TEXT NOT NULL DEFAULT '[]',
            intent_blacklist TEXT NOT NULL DEFAULT '[]',
            can_broadcast INTEGER NOT NULL DEFAULT 1,
            can_escalate INTEGER NOT NULL DEFAULT 1,
            can_propagate INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    Ok(())
}

impl ClientStore for SqliteClientStore {
    fn add(&mut self, mut record: ClientRecord) -> Result<AddOutcome> {
        record.ensure_utterance_allowed();
        record.validate()?;
        if let Some(existing) = self.get_by_key(&record.api_key)? {
            record.client_id = existing.client_id;
            self.write_record(&record)?;
            return Ok(AddOutcome::Updated(record));
        }
        let max_id: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(client_id), 0) FROM clients", [], |row| {
                row.get(0)
            })?;
        record.client_id = max_id.max(0) + 1;
        self.write_record(&record)?;
        Ok(AddOutcome::Created(record))
    }

    fn get_by_key(&self, api_key: &str) -> Result<Option<ClientRecord>> {
        Ok(self
            .select("WHERE api_key = ?1", api_key)?
            .into_iter()
            .next())
    }

    fn get_by_name(&self, name: &str) -> Result<Vec<ClientRecord>> {
        self.select("WHERE name = ?1", name)
    }

    fn delete(&mut self, api_key: &str) -> Result<bool> {
        if api_key == REVOKED_KEY {
            return Ok(false);
        }
        match self.get_by_key(api_key)? {
            Some(record) => {
                self.write_record(&ClientRecord::tombstone(record.client_id))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update(&mut self, record: &ClientRecord) -> Result<()> {
        record.validate()?;
        self.write_record(record)
    }

    fn sync(&mut self) -> Result<()> {
        // reads go straight to the database
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        // autocommit connection
        Ok(())
    }

    fn list(&self) -> Result<Vec<ClientRecord>> {
        self.select("", "")
    }
}
