//! Remote document service boundary.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::types::Collection;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Generate a fresh document id.
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Wire types
// ============================================================================

/// A document as returned by the remote service. `data` is unvalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDoc {
    pub id: String,
    pub data: Value,
}

/// Query predicate. Only the incremental-fetch comparison is needed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    GreaterThan { field: String, value: Value },
}

impl Filter {
    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::GreaterThan {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate against a document body. Numbers compare numerically,
    /// strings lexically; anything else never matches.
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::GreaterThan { field, value } => data
                .get(field)
                .and_then(|actual| compare(actual, value))
                .is_some_and(|ord| ord == Ordering::Greater),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// One write inside an atomic `batch_commit`.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        collection: Collection,
        id: String,
        data: Value,
        merge: bool,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

impl BatchOp {
    pub fn collection(&self) -> Collection {
        match self {
            BatchOp::Set { collection, .. } | BatchOp::Delete { collection, .. } => *collection,
        }
    }
}

// ============================================================================
// RemoteService
// ============================================================================

/// User-provided remote document store.
///
/// Implementations handle the wire protocol; the engine only relies on the
/// operations below. Timeouts and retries are the implementation's concern.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Allocate an id for a document that has none yet.
    fn new_doc_id(&self, collection: Collection) -> String {
        let _ = collection;
        generate_uuid()
    }

    async fn query(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
    ) -> RemoteResult<Vec<RemoteDoc>>;

    async fn get_doc(&self, collection: Collection, id: &str) -> RemoteResult<Option<RemoteDoc>>;

    /// Write a document. With `merge`, fields not in `data` are kept.
    async fn set_doc(
        &self,
        collection: Collection,
        id: &str,
        data: &Value,
        merge: bool,
    ) -> RemoteResult<()>;

    /// Create a document with a service-assigned id.
    async fn add_doc(&self, collection: Collection, data: &Value) -> RemoteResult<String>;

    async fn delete_doc(&self, collection: Collection, id: &str) -> RemoteResult<()>;

    /// Apply every op or none.
    async fn batch_commit(&self, ops: Vec<BatchOp>) -> RemoteResult<()>;
}
