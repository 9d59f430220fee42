//! MemoryStore: a `DurableStore` that keeps every table in process memory.
//!
//! Nothing survives a restart; used for tests and for sessions that opt out
//! of local persistence.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;

use super::traits::{DurableStore, StorageResult};

/// Entries of one table, kept in insertion order.
type Table = Vec<(String, Value)>;

#[derive(Default)]
pub struct MemoryStore {
    /// `None` until `open_or_create()` runs.
    tables: Mutex<Option<HashMap<String, Table>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> T,
    ) -> StorageResult<T> {
        let mut guard = self.tables.lock();
        let tables = guard.as_mut().ok_or(StorageError::NotInitialized)?;
        let entries = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotRegistered(table.to_string()))?;
        Ok(f(entries))
    }
}

impl DurableStore for MemoryStore {
    fn open_or_create(&self, tables: &[&str]) -> StorageResult<()> {
        let mut guard = self.tables.lock();
        let map = guard.get_or_insert_with(HashMap::new);
        for name in tables {
            map.entry((*name).to_string()).or_default();
        }
        Ok(())
    }

    fn put(&self, table: &str, key: &str, value: &Value) -> StorageResult<()> {
        self.with_table(table, |entries| {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => *existing = value.clone(),
                None => entries.push((key.to_string(), value.clone())),
            }
        })
    }

    fn clear(&self, table: &str) -> StorageResult<()> {
        self.with_table(table, |entries| entries.clear())
    }

    fn get_all(&self, table: &str) -> StorageResult<Vec<Value>> {
        self.with_table(table, |entries| {
            entries.iter().map(|(_, v)| v.clone()).collect()
        })
    }

    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Value>> {
        self.with_table(table, |entries| {
            entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    fn delete(&self, table: &str, key: &str) -> StorageResult<bool> {
        self.with_table(table, |entries| {
            let before = entries.len();
            entries.retain(|(k, _)| k != key);
            entries.len() != before
        })
    }

    fn replace_all(&self, table: &str, entries: &[(String, Value)]) -> StorageResult<()> {
        self.with_table(table, |existing| {
            *existing = entries.to_vec();
        })
    }
}
