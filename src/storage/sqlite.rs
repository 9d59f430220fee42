//! SQLite durable store.
//!
//! Implements `DurableStore` using rusqlite (bundled). Every logical table
//! shares one physical `entries` table keyed by `(tbl, key)`; the autoincrement
//! `seq` column preserves insertion order across restarts.

use std::collections::HashSet;

use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;

use super::traits::{DurableStore, StorageResult};

// ============================================================================
// SqliteStore
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
    /// Tables registered via `open_or_create`; `None` until the schema exists.
    tables: Mutex<Option<HashSet<String>>>,
}

impl SqliteStore {
    /// Open a file-backed SQLite database.
    pub fn open(path: &str) -> StorageResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables: Mutex::new(None),
        })
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables: Mutex::new(None),
        })
    }

    fn check_table(&self, table: &str) -> StorageResult<()> {
        let guard = self.tables.lock();
        let tables = guard.as_ref().ok_or(StorageError::NotInitialized)?;
        if tables.contains(table) {
            Ok(())
        } else {
            Err(StorageError::TableNotRegistered(table.to_string()))
        }
    }

    fn parse_value(table: &str, key: &str, text: &str) -> StorageResult<Value> {
        serde_json::from_str(text).map_err(|source| StorageError::Corruption {
            table: table.to_string(),
            key: key.to_string(),
            source,
        })
    }

    fn execute_put(
        conn: &rusqlite::Connection,
        table: &str,
        key: &str,
        text: &str,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO entries (tbl, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT(tbl, key) DO UPDATE SET value = excluded.value",
            params![table, key, text],
        )?;
        Ok(())
    }
}

impl DurableStore for SqliteStore {
    fn open_or_create(&self, tables: &[&str]) -> StorageResult<()> {
        {
            let conn = self.conn.lock();
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;
                 CREATE TABLE IF NOT EXISTS entries (
                    seq   INTEGER PRIMARY KEY AUTOINCREMENT,
                    tbl   TEXT NOT NULL,
                    key   TEXT NOT NULL,
                    value TEXT NOT NULL,
                    UNIQUE (tbl, key)
                 );
                 CREATE INDEX IF NOT EXISTS idx_entries_tbl ON entries(tbl, seq);",
            )?;
        }

        let mut guard = self.tables.lock();
        let registered = guard.get_or_insert_with(HashSet::new);
        for name in tables {
            registered.insert((*name).to_string());
        }
        Ok(())
    }

    fn put(&self, table: &str, key: &str, value: &Value) -> StorageResult<()> {
        self.check_table(table)?;
        let text = serde_json::to_string(value)?;
        let conn = self.conn.lock();
        Self::execute_put(&conn, table, key, &text)?;
        Ok(())
    }

    fn clear(&self, table: &str) -> StorageResult<()> {
        self.check_table(table)?;
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entries WHERE tbl = ?1", params![table])?;
        Ok(())
    }

    fn get_all(&self, table: &str) -> StorageResult<Vec<Value>> {
        self.check_table(table)?;
        let rows: Vec<(String, String)> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT key, value FROM entries WHERE tbl = ?1 ORDER BY seq")?;
            let iter = stmt.query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let rows = iter.collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.iter()
            .map(|(key, text)| Self::parse_value(table, key, text))
            .collect()
    }

    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Value>> {
        self.check_table(table)?;
        let text: Option<String> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT value FROM entries WHERE tbl = ?1 AND key = ?2")?;
            let text = stmt
                .query_row(params![table, key], |row| row.get(0))
                .optional()?;
            text
        };
        text.map(|t| Self::parse_value(table, key, &t)).transpose()
    }

    fn delete(&self, table: &str, key: &str) -> StorageResult<bool> {
        self.check_table(table)?;
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM entries WHERE tbl = ?1 AND key = ?2",
            params![table, key],
        )?;
        Ok(n > 0)
    }

    fn replace_all(&self, table: &str, entries: &[(String, Value)]) -> StorageResult<()> {
        self.check_table(table)?;
        let texts = entries
            .iter()
            .map(|(k, v)| serde_json::to_string(v).map(|t| (k.as_str(), t)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE tbl = ?1", params![table])?;
        for (key, text) in &texts {
            Self::execute_put(&tx, table, key, text)?;
        }
        tx.commit()?;
        Ok(())
    }
}
