//! CacheStore: in-memory collections with TTL/mtime bookkeeping and
//! debounced persistence to a `DurableStore`.
//!
//! All state sits behind one `parking_lot::Mutex`; every public method takes
//! the lock once, so multi-step mutations (like moving a record between
//! collections) are atomic with respect to other callers. No guard is ever
//! held across an `.await`.
//!
//! Persistence is best effort: durable I/O errors are logged and swallowed.
//! A crash between a remote write and the next debounce tick can lose the
//! local copy; it is fetched again from the remote on the next load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::clock::Clock;
use crate::error::StorageError;
use crate::storage::DurableStore;
use crate::types::{Collection, Record};

use super::debounce::Debouncer;

// ============================================================================
// Durable layout
// ============================================================================

/// Singleton table holding the TTL map under the key of the same name.
pub const TTL_TABLE: &str = "ttl";
/// Singleton table holding the mtime map under the key of the same name.
pub const MTIME_TABLE: &str = "mtime";

// ============================================================================
// Types
// ============================================================================

/// Result of `CacheStore::load_persisted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Durable contents replaced the in-memory cache.
    Loaded { records: usize },
    /// Durable contents failed the sanity check; cache left as it was.
    Rejected,
    /// Reading the durable store failed; cache left as it was.
    Failed,
}

#[derive(Debug, Clone, Default)]
struct CacheState {
    records: HashMap<Collection, Vec<Record>>,
    ttl: HashMap<Collection, i64>,
    mtime: HashMap<Collection, i64>,
}

impl CacheState {
    fn touch(&mut self, table: Collection, now: i64) {
        self.mtime.insert(table, now);
    }

    /// TTL check; records `now` as mtime when a TTL'd table has none yet.
    fn is_expired(&mut self, table: Collection, now: i64) -> bool {
        let Some(&ttl) = self.ttl.get(&table) else {
            return false;
        };
        match self.mtime.get(&table) {
            Some(&mtime) => now - mtime > ttl,
            None => {
                self.mtime.insert(table, now);
                false
            }
        }
    }

    fn invalidate(&mut self, table: Collection) {
        self.records.remove(&table);
        self.mtime.remove(&table);
    }

    /// Users and settings must both be present for a snapshot to be trusted.
    fn is_sane(&self) -> bool {
        let non_empty = |c: Collection| self.records.get(&c).is_some_and(|r| !r.is_empty());
        non_empty(Collection::Users) && non_empty(Collection::Settings)
    }

    fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

fn position(records: &[Record], id: &str) -> Option<usize> {
    records.iter().position(|r| r.id_str() == Some(id))
}

// ============================================================================
// CacheStore
// ============================================================================

struct CacheShared {
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    /// Collections loaded from / saved to the durable store.
    collections: Vec<Collection>,
    state: Mutex<CacheState>,
    debouncer: Debouncer,
}

/// In-memory collection cache. Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct CacheStore {
    shared: Arc<CacheShared>,
}

impl CacheStore {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        collections: Vec<Collection>,
    ) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                durable,
                clock,
                collections,
                state: Mutex::new(CacheState::default()),
                debouncer: Debouncer::new(),
            }),
        }
    }

    /// Durable table names this cache reads and writes.
    pub fn durable_tables(&self) -> Vec<&'static str> {
        let mut tables: Vec<&'static str> =
            self.shared.collections.iter().map(|c| c.as_str()).collect();
        tables.push(TTL_TABLE);
        tables.push(MTIME_TABLE);
        tables
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.shared.durable
    }

    fn now(&self) -> i64 {
        self.shared.clock.now_ms()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load every known collection plus the TTL and mtime maps.
    ///
    /// The in-memory state is replaced only when the loaded snapshot has
    /// non-empty `users` and `settings`, so an empty or damaged store cannot
    /// blank a live session.
    pub fn load_persisted(&self) -> LoadOutcome {
        let loaded = match self.shared.read_durable() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read durable cache; continuing with memory");
                return LoadOutcome::Failed;
            }
        };

        if !loaded.is_sane() {
            tracing::debug!("durable cache missing users or settings; not loaded");
            return LoadOutcome::Rejected;
        }

        let records = loaded.record_count();
        *self.shared.state.lock() = loaded;
        tracing::info!(records, "loaded durable cache");
        LoadOutcome::Loaded { records }
    }

    /// Write every collection and the TTL/mtime maps. Errors are logged.
    pub fn save_persisted(&self) {
        self.shared.save_persisted();
    }

    /// Schedule a debounced `save_persisted`.
    ///
    /// The first call after construction writes immediately; later calls
    /// reset the single pending timer.
    pub fn sync(&self, debounce: Duration) {
        let shared = Arc::clone(&self.shared);
        self.shared
            .debouncer
            .schedule(debounce, move || shared.save_persisted());
    }

    /// Shutdown hook: drop the pending timer and write now.
    pub fn flush(&self) {
        self.shared.debouncer.cancel();
        self.shared.save_persisted();
    }

    // -----------------------------------------------------------------------
    // TTL / mtime
    // -----------------------------------------------------------------------

    pub fn set_ttl(&self, table: Collection, ttl_ms: i64) {
        self.shared.state.lock().ttl.insert(table, ttl_ms);
    }

    pub fn clear_ttl(&self, table: Collection) {
        self.shared.state.lock().ttl.remove(&table);
    }

    pub fn update_mtime(&self, table: Collection) {
        let now = self.now();
        self.shared.state.lock().touch(table, now);
    }

    pub fn get_mtime(&self, table: Collection) -> Option<i64> {
        self.shared.state.lock().mtime.get(&table).copied()
    }

    /// A collection without TTL never expires. With a TTL but no mtime yet,
    /// mtime is set to now and the collection counts as fresh.
    pub fn is_expired(&self, table: Collection) -> bool {
        let now = self.now();
        self.shared.state.lock().is_expired(table, now)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Cached records of `table`.
    ///
    /// `None` when the collection expired (it is dropped first) or holds no
    /// records. The returned vector is a snapshot; re-read after mutations.
    pub fn get_cached(&self, table: Collection) -> Option<Vec<Record>> {
        let now = self.now();
        let mut state = self.shared.state.lock();
        if state.is_expired(table, now) {
            tracing::debug!(collection = %table, "cache expired; invalidating");
            state.invalidate(table);
            return None;
        }
        match state.records.get(&table) {
            Some(records) if !records.is_empty() => Some(records.clone()),
            _ => None,
        }
    }

    pub fn find_cached(&self, table: Collection, id: &str) -> Option<Record> {
        let state = self.shared.state.lock();
        state
            .records
            .get(&table)
            .and_then(|records| records.iter().find(|r| r.id_str() == Some(id)))
            .cloned()
    }

    pub fn contains(&self, table: Collection, id: &str) -> bool {
        let state = self.shared.state.lock();
        state
            .records
            .get(&table)
            .is_some_and(|records| position(records, id).is_some())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Replace a whole collection.
    pub fn update_cache(&self, table: Collection, records: Vec<Record>) {
        let now = self.now();
        let mut state = self.shared.state.lock();
        state.records.insert(table, records);
        state.touch(table, now);
    }

    /// Merge `partial` onto the record with `id`, or append it (with `id`
    /// set) when there is none.
    ///
    /// A record written to its origin collection is live, so a copy of it in
    /// the deleted bucket is dropped under the same lock.
    pub fn update_cached_entry(&self, id: &str, table: Collection, partial: &Record) {
        let now = self.now();
        let mut state = self.shared.state.lock();
        if table != Collection::Deleted {
            let evicted = state.records.get_mut(&Collection::Deleted).is_some_and(|bucket| {
                let before = bucket.len();
                bucket.retain(|r| !(r.id_str() == Some(id) && r.origin() == Some(table)));
                bucket.len() != before
            });
            if evicted {
                state.touch(Collection::Deleted, now);
            }
        }
        let records = state.records.entry(table).or_default();
        match position(records, id) {
            Some(i) => records[i].merge(partial),
            None => {
                let mut record = partial.clone();
                record.id = Some(id.to_string());
                records.push(record);
            }
        }
        state.touch(table, now);
    }

    pub fn remove_cached_entry(&self, id: &str, table: Collection) -> Option<Record> {
        let now = self.now();
        let mut state = self.shared.state.lock();
        let removed = state
            .records
            .get_mut(&table)
            .and_then(|records| position(records, id).map(|i| records.remove(i)));
        state.touch(table, now);
        removed
    }

    /// Remove several ids at once; returns the removed records.
    pub fn remove_cached_entries(&self, ids: &[String], table: Collection) -> Vec<Record> {
        let now = self.now();
        let mut state = self.shared.state.lock();
        let mut removed = Vec::new();
        if let Some(records) = state.records.get_mut(&table) {
            records.retain(|r| {
                let hit = r.id.as_ref().is_some_and(|id| ids.contains(id));
                if hit {
                    removed.push(r.clone());
                }
                !hit
            });
        }
        state.touch(table, now);
        removed
    }

    pub fn append_cached_entry(&self, table: Collection, record: Record) {
        let now = self.now();
        let mut state = self.shared.state.lock();
        state.records.entry(table).or_default().push(record);
        state.touch(table, now);
    }

    /// Drop a collection and its mtime.
    pub fn invalidate(&self, table: Collection) {
        self.shared.state.lock().invalidate(table);
    }

    /// Move `record` (keyed by `id`) from `from` into `to` in one step.
    ///
    /// Any copy under `id` in `from` is removed and `record` replaces or joins
    /// `to`. Returns whether `from` held the id.
    pub fn relocate(&self, id: &str, from: Collection, to: Collection, record: Record) -> bool {
        let now = self.now();
        let mut state = self.shared.state.lock();
        let existed = match state.records.get_mut(&from) {
            Some(records) => {
                let before = records.len();
                records.retain(|r| r.id_str() != Some(id));
                records.len() != before
            }
            None => false,
        };
        let target = state.records.entry(to).or_default();
        match position(target, id) {
            Some(i) => target[i] = record,
            None => target.push(record),
        }
        state.touch(from, now);
        state.touch(to, now);
        existed
    }
}

// ============================================================================
// Durable I/O
// ============================================================================

impl CacheShared {
    fn read_durable(&self) -> Result<CacheState, StorageError> {
        let mut state = CacheState::default();

        for &table in &self.collections {
            let values = self.durable.get_all(table.as_str())?;
            let mut records = Vec::with_capacity(values.len());
            for value in values {
                match Record::from_value(table.as_str(), value) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        tracing::warn!(collection = %table, error = %e, "skipping malformed cached record");
                    }
                }
            }
            state.records.insert(table, records);
        }

        state.ttl = self.read_time_map(TTL_TABLE)?;
        state.mtime = self.read_time_map(MTIME_TABLE)?;
        Ok(state)
    }

    fn read_time_map(&self, table: &str) -> Result<HashMap<Collection, i64>, StorageError> {
        let Some(value) = self.durable.get(table, table)? else {
            return Ok(HashMap::new());
        };
        let raw: HashMap<String, i64> = match serde_json::from_value(value) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(table, error = %e, "discarding malformed time map");
                return Ok(HashMap::new());
            }
        };
        Ok(raw
            .into_iter()
            .filter_map(|(name, ms)| name.parse().ok().map(|c| (c, ms)))
            .collect())
    }

    fn save_persisted(&self) {
        let snapshot = self.state.lock().clone();

        for &table in &self.collections {
            let entries: Vec<(String, Value)> = snapshot
                .records
                .get(&table)
                .map(|records| {
                    records
                        .iter()
                        .filter_map(|r| r.id.clone().map(|id| (id, r.to_value())))
                        .collect()
                })
                .unwrap_or_default();
            if let Err(e) = self.durable.replace_all(table.as_str(), &entries) {
                tracing::warn!(collection = %table, error = %e, "failed to persist collection");
            }
        }

        for (name, map) in [(TTL_TABLE, &snapshot.ttl), (MTIME_TABLE, &snapshot.mtime)] {
            let blob: serde_json::Map<String, Value> = map
                .iter()
                .map(|(c, ms)| (c.as_str().to_string(), Value::from(*ms)))
                .collect();
            if let Err(e) = self.durable.put(name, name, &Value::Object(blob)) {
                tracing::warn!(table = name, error = %e, "failed to persist time map");
            }
        }
    }
}
