//! MemoryRemote: in-process `RemoteService`.
//!
//! Backs tests and offline demos. Documents are kept per collection in
//! insertion order; the service can be switched offline or told to reject
//! writes to individual collections.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{RemoteError, RemoteErrorKind};
use crate::types::Collection;

use super::traits::{generate_uuid, BatchOp, Filter, RemoteDoc, RemoteResult, RemoteService};

type Docs = Vec<(String, Value)>;

#[derive(Default)]
pub struct MemoryRemote {
    docs: Mutex<HashMap<Collection, Docs>>,
    offline: AtomicBool,
    rejected: Mutex<HashSet<Collection>>,
    max_batch: Option<usize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject batches with more than `limit` ops.
    pub fn with_max_batch(mut self, limit: usize) -> Self {
        self.max_batch = Some(limit);
        self
    }

    /// While offline every call fails with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make writes touching `collection` fail with `Rejected`.
    pub fn reject_writes(&self, collection: Collection, reject: bool) {
        let mut rejected = self.rejected.lock();
        if reject {
            rejected.insert(collection);
        } else {
            rejected.remove(&collection);
        }
    }

    /// Seed or overwrite a document without going through the service API.
    pub fn insert(&self, collection: Collection, id: impl Into<String>, data: Value) {
        let id = id.into();
        let mut docs = self.docs.lock();
        upsert(docs.entry(collection).or_default(), &id, data, false);
    }

    pub fn doc(&self, collection: Collection, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .get(&collection)
            .and_then(|docs| docs.iter().find(|(k, _)| k == id))
            .map(|(_, v)| v.clone())
    }

    pub fn docs(&self, collection: Collection) -> Vec<RemoteDoc> {
        self.docs
            .lock()
            .get(&collection)
            .map(|docs| docs.iter().map(to_doc).collect())
            .unwrap_or_default()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::new("remote service unavailable"))
        } else {
            Ok(())
        }
    }

    fn check_writable(&self, collection: Collection) -> RemoteResult<()> {
        self.check_online()?;
        if self.rejected.lock().contains(&collection) {
            return Err(RemoteError::with_kind(
                format!("writes to {collection} rejected"),
                RemoteErrorKind::Rejected,
            ));
        }
        Ok(())
    }
}

fn to_doc((id, data): &(String, Value)) -> RemoteDoc {
    RemoteDoc {
        id: id.clone(),
        data: data.clone(),
    }
}

fn upsert(docs: &mut Docs, id: &str, data: Value, merge: bool) {
    match docs.iter_mut().find(|(k, _)| k == id) {
        Some((_, existing)) => match (existing, data) {
            (Value::Object(target), Value::Object(patch)) if merge => target.extend(patch),
            (existing, data) => *existing = data,
        },
        None => docs.push((id.to_string(), data)),
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    async fn query(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
    ) -> RemoteResult<Vec<RemoteDoc>> {
        self.check_online()?;
        let docs = self.docs.lock();
        Ok(docs
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| filter.map_or(true, |f| f.matches(data)))
                    .map(to_doc)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_doc(&self, collection: Collection, id: &str) -> RemoteResult<Option<RemoteDoc>> {
        self.check_online()?;
        Ok(self.doc(collection, id).map(|data| RemoteDoc {
            id: id.to_string(),
            data,
        }))
    }

    async fn set_doc(
        &self,
        collection: Collection,
        id: &str,
        data: &Value,
        merge: bool,
    ) -> RemoteResult<()> {
        self.check_writable(collection)?;
        let mut docs = self.docs.lock();
        upsert(docs.entry(collection).or_default(), id, data.clone(), merge);
        Ok(())
    }

    async fn add_doc(&self, collection: Collection, data: &Value) -> RemoteResult<String> {
        self.check_writable(collection)?;
        let id = generate_uuid();
        let mut docs = self.docs.lock();
        docs.entry(collection)
            .or_default()
            .push((id.clone(), data.clone()));
        Ok(id)
    }

    async fn delete_doc(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        self.check_writable(collection)?;
        if let Some(docs) = self.docs.lock().get_mut(&collection) {
            docs.retain(|(k, _)| k != id);
        }
        Ok(())
    }

    async fn batch_commit(&self, ops: Vec<BatchOp>) -> RemoteResult<()> {
        self.check_online()?;
        if let Some(limit) = self.max_batch {
            if ops.len() > limit {
                return Err(RemoteError::with_kind(
                    format!("batch of {} exceeds limit {limit}", ops.len()),
                    RemoteErrorKind::Capacity,
                ));
            }
        }
        for op in &ops {
            self.check_writable(op.collection())?;
        }

        let mut docs = self.docs.lock();
        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    data,
                    merge,
                } => upsert(docs.entry(collection).or_default(), &id, data, merge),
                BatchOp::Delete { collection, id } => {
                    if let Some(docs) = docs.get_mut(&collection) {
                        docs.retain(|(k, _)| *k != id);
                    }
                }
            }
        }
        Ok(())
    }
}
