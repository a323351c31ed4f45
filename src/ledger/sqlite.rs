//! SQLite world state
//!
//! Durable [`Ledger`] backend:
//! - One `world_state` table keyed by the raw key bytes
//! - BLOB keys compare with memcmp, which matches Rust string ordering
//! - Write sets applied inside a single SQLite transaction

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Ledger, WriteOp, WriteSet};
use crate::error::ChaincodeError;

// =============================================================================
// Storage Schema
// =============================================================================

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS world_state (
    key BLOB PRIMARY KEY,
    value BLOB NOT NULL
) WITHOUT ROWID;
"#;

// =============================================================================
// Storage Implementation
// =============================================================================

/// World state persisted in a SQLite file.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl SqliteLedger {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %path.display(), "World state opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.display().to_string(),
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: ":memory:".to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM world_state", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM world_state WHERE key = ?1",
                params![key.as_bytes()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO world_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.as_bytes(), value],
        )?;
        Ok(())
    }

    fn delete_raw(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM world_state WHERE key = ?1", params![key.as_bytes()])?;
        Ok(())
    }

    fn range_raw(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock();
        let rows: Vec<(Vec<u8>, Vec<u8>)> = if end.is_empty() {
            let mut stmt =
                conn.prepare("SELECT key, value FROM world_state WHERE key >= ?1 ORDER BY key")?;
            let rows = stmt
                .query_map(params![start.as_bytes()], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM world_state WHERE key >= ?1 AND key < ?2 ORDER BY key",
            )?;
            let rows = stmt
                .query_map(params![start.as_bytes(), end.as_bytes()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(key, value)| {
                let key = String::from_utf8(key).context("Non UTF-8 key in world state")?;
                Ok((key, value))
            })
            .collect()
    }

    fn apply_raw(&self, write_set: &WriteSet) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in &write_set.ops {
            match op {
                WriteOp::Put { key, value } => {
                    tx.execute(
                        "INSERT INTO world_state (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key.as_bytes(), value],
                    )?;
                }
                WriteOp::Delete { key } => {
                    tx.execute("DELETE FROM world_state WHERE key = ?1", params![key.as_bytes()])?;
                }
            }
        }
        tx.commit()?;
        debug!(ops = write_set.len(), "Write set applied");
        Ok(())
    }
}

impl Ledger for SqliteLedger {
    fn get(&self, key: &str) -> crate::error::Result<Option<Vec<u8>>> {
        Ok(self.get_raw(key)?)
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> crate::error::Result<()> {
        Ok(self.put_raw(key, &value)?)
    }

    fn delete(&mut self, key: &str) -> crate::error::Result<()> {
        Ok(self.delete_raw(key)?)
    }

    fn range_scan(&self, start: &str, end: &str) -> crate::error::Result<Vec<(String, Vec<u8>)>> {
        if !end.is_empty() && start >= end {
            return Ok(Vec::new());
        }
        Ok(self.range_raw(start, end)?)
    }

    fn apply(&mut self, write_set: &WriteSet) -> crate::error::Result<()> {
        self.apply_raw(write_set).map_err(ChaincodeError::from)
    }
}
