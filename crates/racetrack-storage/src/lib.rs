//! DuckDB-backed persistence for racetrack trainer state.
//!
//! Values live in a `kv` table keyed by name; every write is also appended
//! to `history` so earlier trainer snapshots can be inspected after a run.

use duckdb::{Connection, params};
use racetrack_core::{StoreError, TrainerStore};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("stored value for `{key}` is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// One entry of the write log.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub revision: i64,
    pub key: String,
    pub value: Value,
}

/// Key/value store on a DuckDB database file.
pub struct DuckDbStore {
    conn: Connection,
    revision: i64,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Open or create a DuckDB database at the provided path.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Store backed by a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let mut store = Self { conn, revision: 0 };
        store.initialize_schema()?;
        store.revision = store
            .conn
            .query_row("select coalesce(max(revision), 0) from history", [], |row| {
                row.get::<_, i64>(0)
            })?;
        debug!(revision = store.revision, "opened trainer store");
        Ok(store)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute(
            "create table if not exists kv (
                key text primary key,
                value text not null,
                updated_at timestamp
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists history (
                revision bigint primary key,
                key text not null,
                value text not null,
                written_at timestamp
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert or replace `key`, appending the value to the write log.
    pub fn put(&mut self, key: &str, value: &Value) -> Result<(), StorageError> {
        let text = value.to_string();
        let revision = self.revision + 1;
        let tx = self.conn.transaction()?;
        tx.execute(
            "insert or replace into kv (key, value, updated_at) values (?, ?, current_timestamp)",
            params![key, text],
        )?;
        tx.execute(
            "insert into history (revision, key, value, written_at) values (?, ?, ?, current_timestamp)",
            params![revision, key, text],
        )?;
        tx.commit()?;
        self.revision = revision;
        Ok(())
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let mut stmt = self.conn.prepare("select value from kv where key = ?")?;
        let mut rows = stmt.query(params![key])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let text: String = row.get(0)?;
        decode(key, &text).map(Some)
    }

    /// Most recent writes to `key`, newest first, up to `limit`.
    pub fn history(&self, key: &str, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "select revision, value
             from history
             where key = ?
             order by revision desc
             limit ?",
        )?;
        let mut rows = stmt.query(params![key, limit as i64])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(1)?;
            entries.push(HistoryEntry {
                revision: row.get(0)?,
                key: key.to_string(),
                value: decode(key, &text)?,
            });
        }
        Ok(entries)
    }

    /// Revision of the newest write.
    #[must_use]
    pub const fn revision(&self) -> i64 {
        self.revision
    }

    /// Drop log entries older than the newest `keep` per key.
    pub fn prune_history(&mut self, keep: usize) -> Result<usize, StorageError> {
        let removed = self.conn.execute(
            "delete from history
             where revision in (
                 select revision from (
                     select revision,
                            row_number() over (partition by key order by revision desc) as newest
                     from history
                 ) as ordered
                 where newest > ?
             )",
            params![keep as i64],
        )?;
        Ok(removed)
    }

    /// Refresh table statistics and checkpoint the write-ahead log into the file.
    pub fn optimize(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("ANALYZE; CHECKPOINT;")?;
        Ok(())
    }

    /// Trim the write log to the newest `keep` entries per key, then optimize.
    pub fn compact(&mut self, keep: usize) -> Result<usize, StorageError> {
        let removed = self.prune_history(keep)?;
        self.optimize()?;
        info!(removed, keep, revision = self.revision, "compacted trainer store");
        Ok(removed)
    }
}

fn decode(key: &str, text: &str) -> Result<Value, StorageError> {
    serde_json::from_str(text).map_err(|source| StorageError::Corrupt {
        key: key.to_string(),
        source,
    })
}

impl TrainerStore for DuckDbStore {
    fn write(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
        Ok(self.put(key, value)?)
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get(key)?)
    }
}
