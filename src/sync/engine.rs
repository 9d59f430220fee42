//! RemoteSyncEngine: remote-backed operations over the `CacheStore`.
//!
//! Reads fetch incrementally and merge into the cache. Writes go to the
//! remote first, are recorded by the `AuditLedger`, then land in the cache
//! whether or not the remote accepted them; the `Mutation` result says which.
//! Soft-deleted records live only in the local `deleted` bucket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::audit::{AuditAction, AuditEvent, AuditLedger};
use crate::cache::CacheStore;
use crate::config::{EngineOptions, SyncOptions};
use crate::error::{Result, SyncError};
use crate::remote::{BatchOp, Filter, RemoteDoc, RemoteService};
use crate::types::{Actor, Collection, Record, DOC_UPDATED};

use super::types::{BulkDeleteReport, Mutation, UpdateOptions};

type SyncResult<T> = std::result::Result<T, SyncError>;

/// A record ready for the remote: full cached form plus wire payload.
struct Prepared {
    id: String,
    record: Record,
    payload: Value,
}

// ============================================================================
// RemoteSyncEngine
// ============================================================================

pub struct RemoteSyncEngine {
    remote: Arc<dyn RemoteService>,
    cache: CacheStore,
    ledger: AuditLedger,
    options: Arc<SyncOptions>,
    /// Time of the last remote query per collection.
    last_fetch: Mutex<HashMap<Collection, i64>>,
}

impl RemoteSyncEngine {
    /// Validate options, open the durable tables, load the persisted cache
    /// and apply configured TTLs.
    pub fn open(options: EngineOptions) -> Result<Self> {
        options.sync.validate()?;
        let clock = options.clock();
        let sync = Arc::new(options.sync);

        let cache = CacheStore::new(Arc::clone(&options.durable), clock, sync.collections.clone());
        if let Err(e) = options.durable.open_or_create(&cache.durable_tables()) {
            tracing::warn!(error = %e, "failed to open durable tables");
        }
        cache.load_persisted();
        for (&collection, &ttl) in &sync.ttl_ms {
            cache.set_ttl(collection, ttl);
        }

        let ledger = AuditLedger::new(Arc::clone(&options.remote), cache.clone(), Arc::clone(&sync));

        Ok(Self {
            remote: options.remote,
            cache,
            ledger,
            options: sync,
            last_fetch: Mutex::new(HashMap::new()),
        })
    }

    /// Cancel the pending persist and write the cache now.
    pub fn shutdown(&self) {
        self.cache.flush();
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn set_actor(&self, actor: Option<Actor>) {
        self.ledger.set_actor(actor);
    }

    fn now(&self) -> i64 {
        self.cache.clock().now_ms()
    }

    fn schedule_persist(&self) {
        self.cache
            .sync(Duration::from_millis(self.options.persist_debounce_ms));
    }

    fn remote_only(table: Collection) -> SyncResult<()> {
        if table == Collection::Deleted {
            Err(SyncError::LocalOnly(table.to_string()))
        } else {
            Ok(())
        }
    }

    /// Writes to a record that sits in the deleted bucket are refused so it
    /// never shows up in its origin collection and the bucket at once.
    fn ensure_live(&self, table: Collection, record: &Record) -> SyncResult<()> {
        let Some(id) = record.id_str() else {
            return Ok(());
        };
        let soft_deleted = self
            .cache
            .find_cached(Collection::Deleted, id)
            .is_some_and(|r| r.origin() == Some(table));
        if soft_deleted {
            Err(SyncError::SoftDeleted {
                collection: table.to_string(),
                id: id.to_string(),
            })
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// All records of `table`.
    ///
    /// Within the fetch window of a previous query a live cache is returned
    /// as is. Otherwise records changed since the cache mtime are fetched
    /// (everything when there is no cache or `force` is set) and merged by
    /// id, remote winning. Remotely deleted records move to the deleted
    /// bucket. The bucket itself is never fetched.
    pub async fn get_all(&self, table: Collection, force: bool) -> SyncResult<Vec<Record>> {
        if table == Collection::Deleted {
            return Ok(self.cache.get_cached(table).unwrap_or_default());
        }

        let now = self.now();
        let cached = self.cache.get_cached(table);
        if let (Some(records), false) = (&cached, force) {
            let last = self.last_fetch.lock().get(&table).copied();
            if last.is_some_and(|last| now - last < self.options.fetch_window_ms) {
                tracing::debug!(collection = %table, "within fetch window; serving cache");
                return Ok(records.clone());
            }
        }

        let filter = match (&cached, force) {
            (Some(_), false) => self
                .cache
                .get_mtime(table)
                .map(|mtime| Filter::greater_than(DOC_UPDATED, mtime)),
            _ => None,
        };

        let docs = self
            .remote
            .query(table, filter.as_ref())
            .await
            .map_err(|e| {
                tracing::warn!(collection = %table, error = %e, "remote query failed");
                SyncError::remote(table.as_str(), e)
            })?;
        self.last_fetch.lock().insert(table, now);

        let fetched = docs.len();
        for doc in docs {
            self.merge_remote(table, doc);
        }
        self.cache.update_mtime(table);
        if fetched > 0 {
            self.schedule_persist();
        }
        tracing::debug!(collection = %table, fetched, "merged remote records");

        Ok(self.cache.get_cached(table).unwrap_or_default())
    }

    /// Fetch one record and merge it into the cache. `None` when the remote
    /// has no such document or it is soft-deleted.
    pub async fn get(&self, id: &str, table: Collection) -> SyncResult<Option<Record>> {
        if table == Collection::Deleted {
            return Ok(self.cache.find_cached(table, id));
        }

        let doc = self.remote.get_doc(table, id).await.map_err(|e| {
            tracing::warn!(collection = %table, id, error = %e, "remote get failed");
            SyncError::remote(table.as_str(), e)
        })?;
        let Some(doc) = doc else {
            return Ok(None);
        };

        let live = self.merge_remote(table, doc);
        self.schedule_persist();
        Ok(live.then(|| self.cache.find_cached(table, id)).flatten())
    }

    /// Merge one remote document. Returns false if it went to the deleted
    /// bucket or could not be parsed.
    fn merge_remote(&self, table: Collection, doc: RemoteDoc) -> bool {
        let mut record = match Record::from_remote(table.as_str(), &doc.id, doc.data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(collection = %table, id = %doc.id, error = %e, "skipping malformed remote record");
                return false;
            }
        };

        if record.is_deleted() {
            if record.doc_type.is_none() {
                record.doc_type = Some(table.as_str().to_string());
            }
            self.cache.relocate(&doc.id, table, Collection::Deleted, record);
            false
        } else {
            self.cache.update_cached_entry(&doc.id, table, &record);
            true
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Assign an id, stamp `docUpdated` and build the remote payload. An
    /// already-uploaded asset URL is kept in the cache but not re-sent.
    fn prepare(&self, table: Collection, mut record: Record) -> Prepared {
        let id = match record.id.clone() {
            Some(id) => id,
            None => {
                let id = self.remote.new_doc_id(table);
                record.id = Some(id.clone());
                id
            }
        };
        record.doc_updated = Some(self.now());

        let mut payload = record.to_value();
        let asset = self.options.asset_field.as_str();
        let uploaded = record
            .field(asset)
            .and_then(Value::as_str)
            .is_some_and(|url| url.starts_with(&self.options.asset_url_prefix));
        if uploaded {
            if let Some(map) = payload.as_object_mut() {
                map.remove(asset);
            }
        }

        Prepared {
            id,
            record,
            payload,
        }
    }

    fn merged_view(previous: Option<&Record>, partial: &Record) -> Record {
        match previous {
            Some(previous) => {
                let mut merged = previous.clone();
                merged.merge(partial);
                merged
            }
            None => partial.clone(),
        }
    }

    pub async fn update(&self, record: Record, table: Collection) -> SyncResult<Mutation> {
        self.update_with(record, table, UpdateOptions::default())
            .await
    }

    /// Merge-write one record.
    ///
    /// The audit entry is computed against the cached state from before the
    /// write; only after logging is the cache merged.
    pub async fn update_with(
        &self,
        record: Record,
        table: Collection,
        options: UpdateOptions,
    ) -> SyncResult<Mutation> {
        Self::remote_only(table)?;
        self.ensure_live(table, &record)?;
        let prepared = self.prepare(table, record);
        let previous = self.cache.find_cached(table, &prepared.id);

        let error = self
            .remote
            .set_doc(table, &prepared.id, &prepared.payload, true)
            .await
            .err()
            .map(|e| {
                tracing::warn!(collection = %table, id = %prepared.id, error = %e, "remote update failed");
                SyncError::remote(table.as_str(), e)
            });

        let merged = Self::merged_view(previous.as_ref(), &prepared.record);
        self.ledger
            .log(
                AuditEvent::new(AuditAction::Update, table)
                    .id(prepared.id.clone())
                    .record(merged.clone())
                    .previous(previous)
                    .error(error.as_ref().map(ToString::to_string))
                    .direction(options.direction),
            )
            .await;

        self.cache
            .update_cached_entry(&prepared.id, table, &prepared.record);
        self.schedule_persist();

        let record = self
            .cache
            .find_cached(table, &prepared.id)
            .unwrap_or(merged);
        Ok(Mutation::new(record, error))
    }

    /// Merge-write several records in one atomic remote batch.
    pub async fn update_all(
        &self,
        records: Vec<Record>,
        table: Collection,
    ) -> SyncResult<Vec<Mutation>> {
        Self::remote_only(table)?;
        for record in &records {
            self.ensure_live(table, record)?;
        }
        let prepared: Vec<Prepared> = records
            .into_iter()
            .map(|record| self.prepare(table, record))
            .collect();

        let ops = prepared
            .iter()
            .map(|p| BatchOp::Set {
                collection: table,
                id: p.id.clone(),
                data: p.payload.clone(),
                merge: true,
            })
            .collect();
        let failure = self.remote.batch_commit(ops).await.err();
        if let Some(e) = &failure {
            tracing::warn!(collection = %table, count = prepared.len(), error = %e, "remote batch update failed");
        }

        let mut mutations = Vec::with_capacity(prepared.len());
        for p in prepared {
            let previous = self.cache.find_cached(table, &p.id);
            let merged = Self::merged_view(previous.as_ref(), &p.record);
            let error = failure
                .clone()
                .map(|e| SyncError::remote(table.as_str(), e));
            self.ledger
                .log(
                    AuditEvent::new(AuditAction::UpdateAll, table)
                        .id(p.id.clone())
                        .record(merged.clone())
                        .previous(previous)
                        .error(error.as_ref().map(ToString::to_string)),
                )
                .await;

            self.cache.update_cached_entry(&p.id, table, &p.record);
            let record = self.cache.find_cached(table, &p.id).unwrap_or(merged);
            mutations.push(Mutation::new(record, error));
        }
        self.schedule_persist();

        Ok(mutations)
    }

    /// Create a record remotely and append it to the cache.
    ///
    /// Without a remote id there is nothing to key the record by, so a
    /// failed create leaves the cache untouched and returns the error.
    pub async fn add(&self, mut record: Record, table: Collection) -> SyncResult<Mutation> {
        Self::remote_only(table)?;
        record.doc_updated = Some(self.now());
        let mut payload = record.to_value();
        if let Some(map) = payload.as_object_mut() {
            map.remove("id");
        }

        match self.remote.add_doc(table, &payload).await {
            Ok(id) => {
                record.id = Some(id.clone());
                self.cache.append_cached_entry(table, record.clone());
                self.schedule_persist();
                self.ledger
                    .log(
                        AuditEvent::new(AuditAction::Add, table)
                            .id(id)
                            .record(record.clone()),
                    )
                    .await;
                Ok(Mutation::new(record, None))
            }
            Err(e) => {
                tracing::warn!(collection = %table, error = %e, "remote create failed");
                let error = SyncError::remote(table.as_str(), e);
                self.ledger
                    .log(
                        AuditEvent::new(AuditAction::Add, table)
                            .record(record)
                            .error(Some(error.to_string())),
                    )
                    .await;
                Err(error)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Soft delete lifecycle
    // -----------------------------------------------------------------------

    /// Soft delete: flag the record remotely and move it into the deleted
    /// bucket. `None` when the record is not cached.
    pub async fn remove(&self, id: &str, table: Collection) -> Option<Mutation> {
        if table == Collection::Deleted {
            tracing::debug!(id, "remove on the deleted bucket ignored");
            return None;
        }
        let Some(previous) = self.cache.find_cached(table, id) else {
            tracing::debug!(collection = %table, id, "remove of uncached record ignored");
            return None;
        };

        let mut record = previous.clone();
        record.deleted = Some(true);
        record.doc_updated = Some(self.now());
        record.doc_type = Some(table.as_str().to_string());
        record.strip_nulls();

        let error = self
            .remote
            .set_doc(table, id, &record.to_value(), true)
            .await
            .err()
            .map(|e| {
                tracing::warn!(collection = %table, id, error = %e, "remote soft delete failed");
                SyncError::remote(table.as_str(), e)
            });

        self.cache
            .relocate(id, table, Collection::Deleted, record.clone());
        self.schedule_persist();

        self.ledger
            .log(
                AuditEvent::new(AuditAction::Remove, table)
                    .id(id)
                    .record(record.clone())
                    .previous(Some(previous))
                    .error(error.as_ref().map(ToString::to_string)),
            )
            .await;

        Some(Mutation::new(record, error))
    }

    /// Move a soft-deleted record back to its origin collection. `None` when
    /// the id is not in the deleted bucket or has no usable origin.
    pub async fn restore(&self, id: &str) -> Option<Mutation> {
        let previous = self.cache.find_cached(Collection::Deleted, id)?;
        let Some(origin) = previous.origin().filter(|c| *c != Collection::Deleted) else {
            tracing::warn!(id, doc_type = ?previous.doc_type, "deleted record has no origin; not restored");
            return None;
        };

        let mut record = previous.clone();
        record.deleted = Some(false);
        record.doc_updated = Some(self.now());

        let error = self
            .remote
            .set_doc(origin, id, &record.to_value(), true)
            .await
            .err()
            .map(|e| {
                tracing::warn!(collection = %origin, id, error = %e, "remote restore failed");
                SyncError::remote(origin.as_str(), e)
            });

        self.cache
            .relocate(id, Collection::Deleted, origin, record.clone());
        self.schedule_persist();

        self.ledger
            .log(
                AuditEvent::new(AuditAction::Restore, origin)
                    .id(id)
                    .record(record.clone())
                    .previous(Some(previous))
                    .error(error.as_ref().map(ToString::to_string)),
            )
            .await;

        Some(Mutation::new(record, error))
    }

    /// Hard delete a record from the deleted bucket. Returns the bucket as
    /// it stands afterwards.
    pub async fn remove_permanent(&self, id: &str) -> Vec<Record> {
        let target = self
            .cache
            .find_cached(Collection::Deleted, id)
            .and_then(|r| {
                r.origin()
                    .filter(|c| *c != Collection::Deleted)
                    .map(|origin| (origin, r))
            });

        match target {
            Some((origin, record)) => {
                let error = self.remote.delete_doc(origin, id).await.err().map(|e| {
                    tracing::warn!(collection = %origin, id, error = %e, "remote hard delete failed");
                    SyncError::remote(origin.as_str(), e)
                });
                self.cache.remove_cached_entry(id, Collection::Deleted);
                self.schedule_persist();
                self.ledger
                    .log(
                        AuditEvent::new(AuditAction::RemovePermanent, origin)
                            .id(id)
                            .previous(Some(record))
                            .error(error.as_ref().map(ToString::to_string)),
                    )
                    .await;
            }
            None => {
                tracing::debug!(id, "no typed deleted record to remove permanently");
            }
        }

        self.cache
            .get_cached(Collection::Deleted)
            .unwrap_or_default()
    }

    /// Hard delete many deleted-bucket records in batches of
    /// `bulk_delete_chunk`. A rejected batch leaves its records in place.
    pub async fn remove_permanent_many(&self, ids: &[String]) -> BulkDeleteReport {
        let mut report = BulkDeleteReport {
            requested: ids.len(),
            ..BulkDeleteReport::default()
        };

        let mut targets: Vec<(Collection, String)> = Vec::with_capacity(ids.len());
        for id in ids {
            match self
                .cache
                .find_cached(Collection::Deleted, id)
                .and_then(|r| r.origin())
                .filter(|c| *c != Collection::Deleted)
            {
                Some(origin) => targets.push((origin, id.clone())),
                None => report.skipped.push(id.clone()),
            }
        }

        let chunk = self.options.bulk_delete_chunk.max(1);
        for batch in targets.chunks(chunk) {
            let ops = batch
                .iter()
                .map(|(collection, id)| BatchOp::Delete {
                    collection: *collection,
                    id: id.clone(),
                })
                .collect();
            let batch_ids: Vec<String> = batch.iter().map(|(_, id)| id.clone()).collect();

            match self.remote.batch_commit(ops).await {
                Ok(()) => {
                    let removed = self
                        .cache
                        .remove_cached_entries(&batch_ids, Collection::Deleted);
                    for record in removed {
                        if let Some(origin) = record.origin() {
                            self.ledger
                                .log(
                                    AuditEvent::new(AuditAction::RemovePermanent, origin)
                                        .id(record.id.clone().unwrap_or_default())
                                        .previous(Some(record)),
                                )
                                .await;
                        }
                    }
                    report.batches.push(batch_ids.len());
                    report.deleted.extend(batch_ids);
                }
                Err(e) => {
                    tracing::warn!(count = batch_ids.len(), error = %e, "bulk delete batch failed");
                    report
                        .failed
                        .push((batch_ids, SyncError::remote(Collection::Deleted.as_str(), e)));
                }
            }
        }

        if !report.deleted.is_empty() {
            self.schedule_persist();
        }
        tracing::info!(
            requested = report.requested,
            deleted = report.deleted.len(),
            batches = report.batches.len(),
            "bulk permanent delete finished"
        );
        report
    }

    /// Write a previously captured deleted record back: soft-deleted in its
    /// origin collection remotely, into the deleted bucket locally. `None`
    /// when the record has no id or origin.
    pub async fn reinstate_deleted(&self, mut record: Record) -> Option<Mutation> {
        let id = record.id.clone()?;
        let Some(origin) = record.origin().filter(|c| *c != Collection::Deleted) else {
            tracing::warn!(id = %id, "snapshot record without origin skipped");
            return None;
        };

        record.deleted = Some(true);
        record.doc_updated = Some(self.now());
        record.strip_nulls();

        let error = self
            .remote
            .set_doc(origin, &id, &record.to_value(), true)
            .await
            .err()
            .map(|e| {
                tracing::warn!(collection = %origin, id = %id, error = %e, "remote reinstate failed");
                SyncError::remote(origin.as_str(), e)
            });

        self.cache
            .relocate(&id, origin, Collection::Deleted, record.clone());
        self.schedule_persist();

        self.ledger
            .log(
                AuditEvent::new(AuditAction::Restore, origin)
                    .id(id)
                    .record(record.clone())
                    .error(error.as_ref().map(ToString::to_string)),
            )
            .await;

        Some(Mutation::new(record, error))
    }
}
