//! RecycleBin: bulk permanent deletion from the deleted bucket, guarded by
//! a single "last safety snapshot" slot in the durable `local` table.
//!
//! The snapshot is written before any remote delete and left in place after
//! a successful run. It is cleared by an explicit restore or discard, or
//! discarded when it is corrupt or older than `safety_snapshot_max_age_ms`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::storage::StorageResult;
use crate::sync::{BulkDeleteReport, RemoteSyncEngine};
use crate::types::{Collection, Record};

pub const LOCAL_TABLE: &str = "local";
pub const SNAPSHOT_KEY: &str = "recycleBinSnapshot";
pub const SNAPSHOT_TIME_KEY: &str = "recycleBinSnapshotTime";

/// Records staged before a bulk delete.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetySnapshot {
    pub records: Vec<Record>,
    /// ISO-8601 staging time.
    pub taken_at: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RestoreReport {
    /// Reinstated and confirmed by the remote.
    pub restored: Vec<String>,
    /// Reinstated locally; the remote write failed.
    pub unconfirmed: Vec<String>,
    /// Still in the live deleted bucket.
    pub already_present: Vec<String>,
    /// No id or no `docType`.
    pub skipped: usize,
}

pub struct RecycleBin {
    engine: Arc<RemoteSyncEngine>,
}

impl RecycleBin {
    pub fn new(engine: Arc<RemoteSyncEngine>) -> StorageResult<Self> {
        engine.cache().durable().open_or_create(&[LOCAL_TABLE])?;
        Ok(Self { engine })
    }

    /// Stage the selected deleted records and hard delete them in chunks.
    /// Ids of failed batches stay selected; the rest are cleared. Nothing is
    /// deleted if staging fails.
    pub async fn delete_selected(
        &self,
        selection: &mut Vec<String>,
    ) -> StorageResult<BulkDeleteReport> {
        let cache = self.engine.cache();
        let records: Vec<Record> = selection
            .iter()
            .filter_map(|id| cache.find_cached(Collection::Deleted, id))
            .collect();

        self.stage(&records)?;
        tracing::info!(records = records.len(), "safety snapshot staged");

        let report = self.engine.remove_permanent_many(selection).await;
        let failed: HashSet<&str> = report
            .failed
            .iter()
            .flat_map(|(ids, _)| ids.iter().map(String::as_str))
            .collect();
        selection.retain(|id| failed.contains(id.as_str()));
        Ok(report)
    }

    fn stage(&self, records: &[Record]) -> StorageResult<()> {
        let durable = self.engine.cache().durable();
        let text = serde_json::to_string(records)?;
        let now = self.engine.cache().clock().now_iso();
        durable.put(LOCAL_TABLE, SNAPSHOT_KEY, &Value::String(text))?;
        durable.put(LOCAL_TABLE, SNAPSHOT_TIME_KEY, &Value::String(now))?;
        Ok(())
    }

    /// The staged snapshot, if one exists and is readable and fresh.
    /// Corrupt or stale snapshots are discarded.
    pub fn snapshot(&self) -> Option<SafetySnapshot> {
        let durable = self.engine.cache().durable();
        let read = durable
            .get(LOCAL_TABLE, SNAPSHOT_KEY)
            .and_then(|text| Ok((text, durable.get(LOCAL_TABLE, SNAPSHOT_TIME_KEY)?)));
        let (text, time) = match read {
            Ok((Some(text), time)) => (text, time),
            Ok((None, _)) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read safety snapshot");
                return None;
            }
        };

        let records = text
            .as_str()
            .and_then(|s| serde_json::from_str::<Vec<Record>>(s).ok());
        let taken = time
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());

        let (Some(records), Some(taken)) = (records, taken) else {
            tracing::warn!("safety snapshot unreadable; discarding");
            self.discard_snapshot();
            return None;
        };

        let age = self.engine.cache().clock().now_ms() - taken.timestamp_millis();
        if age > self.engine.options().safety_snapshot_max_age_ms {
            tracing::info!(age_ms = age, "safety snapshot expired; discarding");
            self.discard_snapshot();
            return None;
        }

        Some(SafetySnapshot {
            records,
            taken_at: taken.to_rfc3339(),
        })
    }

    /// Reinstate snapshot records that are no longer in the deleted bucket,
    /// then clear the snapshot.
    pub async fn restore_snapshot(&self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let Some(snapshot) = self.snapshot() else {
            return report;
        };

        let live: HashSet<String> = self
            .engine
            .cache()
            .get_cached(Collection::Deleted)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r.id)
            .collect();

        for record in snapshot.records {
            let Some(id) = record.id.clone() else {
                report.skipped += 1;
                continue;
            };
            if live.contains(&id) {
                report.already_present.push(id);
                continue;
            }
            if record.origin().is_none() {
                tracing::warn!(id = %id, "snapshot record has no docType; skipped");
                report.skipped += 1;
                continue;
            }
            match self.engine.reinstate_deleted(record).await {
                Some(m) if m.is_confirmed() => report.restored.push(id),
                Some(_) => report.unconfirmed.push(id),
                None => report.skipped += 1,
            }
        }

        self.discard_snapshot();
        tracing::info!(
            restored = report.restored.len(),
            already_present = report.already_present.len(),
            "safety snapshot restored"
        );
        report
    }

    /// Drop both snapshot keys.
    pub fn discard_snapshot(&self) {
        let durable = self.engine.cache().durable();
        for key in [SNAPSHOT_KEY, SNAPSHOT_TIME_KEY] {
            if let Err(e) = durable.delete(LOCAL_TABLE, key) {
                tracing::warn!(key, error = %e, "failed to discard safety snapshot");
            }
        }
    }
}
