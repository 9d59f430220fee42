use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Failures of the durable local store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Durable store not opened. Call open_or_create() first.")]
    NotInitialized,

    #[error("Table \"{0}\" was not registered in open_or_create().")]
    TableNotRegistered(String),

    #[error("Storage corruption in {table}/{key}")]
    Corruption {
        table: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Classification of remote document service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Network or temporary failure; the call may succeed later.
    Transient,
    /// The service rejected the request (validation, permissions, ...).
    Rejected,
    /// Batch exceeded the service's size limit.
    Capacity,
}

/// Error reported by a `RemoteService` implementation.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: RemoteErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

/// Raised where raw JSON is validated into typed records.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Unknown collection \"{0}\"")]
    UnknownCollection(String),

    #[error("Invalid document {collection}/{id}: expected a JSON object")]
    NotAnObject { collection: String, id: String },

    #[error("Failed to decode {collection} document: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote error on {collection}: {source}")]
    Remote {
        collection: String,
        #[source]
        source: RemoteError,
    },

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Collection \"{0}\" is local-only and cannot be written remotely")]
    LocalOnly(String),

    #[error("Record {collection}/{id} is in the deleted bucket; restore it first")]
    SoftDeleted { collection: String, id: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn remote(collection: impl Into<String>, source: RemoteError) -> Self {
        SyncError::Remote {
            collection: collection.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for \"{field}\": {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// ShopSyncError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ShopSyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias. The default error type is `ShopSyncError`.
pub type Result<T, E = ShopSyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
