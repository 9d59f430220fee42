//! Durable local key/value storage.
//!
//! `DurableStore` is the narrow raw I/O trait implemented by concrete backends
//! (in-memory, SQLite). One logical table per collection name plus a few
//! singleton tables; values are JSON. No business logic lives here.

use serde_json::Value;

use crate::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Low-level durable store: keyed JSON values grouped in named tables.
///
/// Implementors must be `Send + Sync` so they can be shared with the
/// debounced persistence task.
pub trait DurableStore: Send + Sync {
    /// Open the store and make sure every table in `tables` exists.
    /// Calling it again with more names registers the extra tables.
    fn open_or_create(&self, tables: &[&str]) -> StorageResult<()>;

    /// Insert or replace the value stored under `key`. Replacing keeps the
    /// key's original position.
    fn put(&self, table: &str, key: &str, value: &Value) -> StorageResult<()>;

    /// Remove every entry of a table.
    fn clear(&self, table: &str) -> StorageResult<()>;

    /// All values of a table in insertion order.
    fn get_all(&self, table: &str) -> StorageResult<Vec<Value>>;

    /// Fetch a single value. `None` if the key is absent.
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Remove one key. Returns whether it existed.
    fn delete(&self, table: &str, key: &str) -> StorageResult<bool>;

    /// Replace the whole table with `entries` (in order).
    ///
    /// The default clears and re-puts; backends with transactions should
    /// override it so readers never observe a half-written table.
    fn replace_all(&self, table: &str, entries: &[(String, Value)]) -> StorageResult<()> {
        self.clear(table)?;
        for (key, value) in entries {
            self.put(table, key, value)?;
        }
        Ok(())
    }
}
