//! BackupVault: numbered point-in-time copies of durable collections.
//!
//! Snapshots are taken from the durable store, not the in-memory cache, so a
//! backup reflects what would survive a restart. Each snapshot is one row of
//! the durable `backup` table keyed by its id.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::{Result, StorageError, SyncError};
use crate::storage::{DurableStore, StorageResult};
use crate::sync::RemoteSyncEngine;
use crate::types::{Collection, Record};

pub const BACKUP_TABLE: &str = "backup";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub id: u64,
    /// ISO-8601 creation time.
    pub created_at: String,
    /// Epoch ms of the last write of this snapshot.
    pub updated: i64,
    #[serde(flatten)]
    pub collections: BTreeMap<Collection, Vec<Record>>,
}

impl BackupSnapshot {
    pub fn records(&self, collection: Collection) -> &[Record] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

pub struct BackupVault {
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    collections: Vec<Collection>,
    snapshots: Mutex<Vec<BackupSnapshot>>,
}

impl BackupVault {
    /// Registers the backup table (and the captured collections) with the
    /// durable store and loads the snapshots already stored there.
    pub fn new(
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        collections: Vec<Collection>,
    ) -> StorageResult<Self> {
        let mut tables: Vec<&str> = collections.iter().map(|c| c.as_str()).collect();
        tables.push(BACKUP_TABLE);
        durable.open_or_create(&tables)?;
        let vault = Self {
            durable,
            clock,
            collections,
            snapshots: Mutex::new(Vec::new()),
        };
        vault.load();
        Ok(vault)
    }

    /// Vault over the engine's durable store, capturing `backup_collections`.
    pub fn for_engine(engine: &RemoteSyncEngine) -> StorageResult<Self> {
        let cache = engine.cache();
        Self::new(
            Arc::clone(cache.durable()),
            Arc::clone(cache.clock()),
            engine.options().backup_collections.clone(),
        )
    }

    /// Read every stored snapshot. Unreadable rows are skipped; a failed
    /// read leaves the vault empty. Returns the number loaded.
    pub fn load(&self) -> usize {
        let rows = match self.durable.get_all(BACKUP_TABLE) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read backups");
                return 0;
            }
        };

        let mut snapshots: Vec<BackupSnapshot> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<BackupSnapshot>(row) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable backup");
                    None
                }
            })
            .collect();
        snapshots.sort_by_key(|s| s.id);

        let count = snapshots.len();
        *self.snapshots.lock() = snapshots;
        count
    }

    /// Capture the durable contents of the configured collections.
    pub fn add(&self) -> StorageResult<BackupSnapshot> {
        let mut collections = BTreeMap::new();
        for &collection in &self.collections {
            let records = self
                .durable
                .get_all(collection.as_str())?
                .into_iter()
                .filter_map(|value| Record::from_value(collection.as_str(), value).ok())
                .collect();
            collections.insert(collection, records);
        }

        // Ids come from the stored rows too so another vault's snapshots
        // are never overwritten.
        let stored_max = self
            .durable
            .get_all(BACKUP_TABLE)?
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_u64))
            .max();
        let mut snapshots = self.snapshots.lock();
        let id = snapshots
            .iter()
            .map(|s| s.id)
            .chain(stored_max)
            .max()
            .unwrap_or(0)
            + 1;
        let snapshot = BackupSnapshot {
            id,
            created_at: self.clock.now_iso(),
            updated: self.clock.now_ms(),
            collections,
        };

        let value = serde_json::to_value(&snapshot).map_err(StorageError::from)?;
        self.durable.put(BACKUP_TABLE, &id.to_string(), &value)?;
        snapshots.push(snapshot.clone());

        tracing::info!(id, records = snapshot.record_count(), "backup created");
        Ok(snapshot)
    }

    /// Delete a snapshot. Returns whether it existed.
    pub fn remove(&self, id: u64) -> StorageResult<bool> {
        let mut snapshots = self.snapshots.lock();
        let stored = self.durable.delete(BACKUP_TABLE, &id.to_string())?;
        let before = snapshots.len();
        snapshots.retain(|s| s.id != id);
        Ok(stored || snapshots.len() != before)
    }

    pub fn list(&self) -> Vec<BackupSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn get(&self, id: u64) -> Option<BackupSnapshot> {
        self.snapshots.lock().iter().find(|s| s.id == id).cloned()
    }

    /// Overwrite the durable tables with a snapshot's collections. The next
    /// `CacheStore::load_persisted` picks them up. Returns records written.
    pub fn restore_to_durable(&self, id: u64) -> Result<usize> {
        let snapshot = self.get(id).ok_or_else(|| SyncError::NotFound {
            collection: BACKUP_TABLE.to_string(),
            id: id.to_string(),
        })?;

        let mut written = 0;
        for (collection, records) in &snapshot.collections {
            let entries: Vec<(String, Value)> = records
                .iter()
                .filter_map(|r| r.id.clone().map(|id| (id, r.to_value())))
                .collect();
            written += entries.len();
            self.durable.replace_all(collection.as_str(), &entries)?;
        }
        tracing::info!(id, records = written, "backup restored to durable store");
        Ok(written)
    }
}
