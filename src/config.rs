//! Engine configuration.
//!
//! `SyncOptions` holds the tunables (plain data, loadable from JSON);
//! `EngineOptions` bundles them with the runtime collaborators.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::remote::RemoteService;
use crate::storage::DurableStore;
use crate::types::Collection;

/// Default remote asset host. Values of `asset_field` starting with this
/// prefix were uploaded earlier and are not re-sent on every edit.
pub const DEFAULT_ASSET_URL_PREFIX: &str = "https://firebasestorage.googleapis.com/";

/// Tunables for the cache, sync engine, audit ledger and recycle bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Collections loaded from and saved to the durable store.
    pub collections: Vec<Collection>,
    /// `get_all` returns the cache untouched within this window (ms).
    pub fetch_window_ms: i64,
    /// Delay before a scheduled durable write (ms).
    pub persist_debounce_ms: u64,
    /// Per-collection TTLs applied on open (ms).
    pub ttl_ms: BTreeMap<Collection, i64>,
    pub logging_enabled: bool,
    /// Only mutations of these collections reach the audit log.
    pub logged_collections: Vec<Collection>,
    /// Consecutive failed log writes before logging is switched off.
    pub log_failure_threshold: usize,
    /// Field holding the stock count on `items` and `parts`.
    pub stock_field: String,
    /// Gross ÷ divisor = net when a record has no explicit net price.
    pub vat_divisor: f64,
    pub default_payment_method: String,
    pub asset_field: String,
    pub asset_url_prefix: String,
    /// Records per remote batch in bulk permanent delete.
    pub bulk_delete_chunk: usize,
    /// Collections captured by `BackupVault::add`.
    pub backup_collections: Vec<Collection>,
    /// Recycle-bin safety snapshots older than this are discarded (ms).
    pub safety_snapshot_max_age_ms: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            collections: Collection::ALL.to_vec(),
            fetch_window_ms: 5_000,
            persist_debounce_ms: 1_000,
            ttl_ms: BTreeMap::new(),
            logging_enabled: true,
            logged_collections: vec![
                Collection::Shops,
                Collection::Items,
                Collection::Parts,
                Collection::Services,
                Collection::Completions,
                Collection::Users,
                Collection::Settings,
            ],
            log_failure_threshold: 5,
            stock_field: "quantity".to_string(),
            vat_divisor: 1.27,
            default_payment_method: "cash".to_string(),
            asset_field: "image".to_string(),
            asset_url_prefix: DEFAULT_ASSET_URL_PREFIX.to_string(),
            bulk_delete_chunk: 100,
            backup_collections: vec![
                Collection::Shops,
                Collection::Items,
                Collection::Parts,
                Collection::Services,
                Collection::Completions,
                Collection::Users,
                Collection::Settings,
            ],
            safety_snapshot_max_age_ms: 7 * 24 * 60 * 60 * 1_000,
        }
    }
}

impl SyncOptions {
    /// Parse and validate options from JSON. Missing keys take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: SyncOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk_delete_chunk == 0 {
            return Err(ConfigError::Invalid {
                field: "bulk_delete_chunk",
                reason: "must be a positive number".to_string(),
            });
        }
        if self.vat_divisor.is_nan() || self.vat_divisor <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "vat_divisor",
                reason: format!("must be positive, got {}", self.vat_divisor),
            });
        }
        if self.log_failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "log_failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fetch_window_ms < 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_window_ms",
                reason: "must not be negative".to_string(),
            });
        }
        if self.stock_field.is_empty() {
            return Err(ConfigError::Invalid {
                field: "stock_field",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `collection` is loaded and saved by the cache.
    pub fn is_persisted(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }
}

/// Collaborators and options for `RemoteSyncEngine::open`.
pub struct EngineOptions {
    pub remote: Arc<dyn RemoteService>,
    pub durable: Arc<dyn DurableStore>,
    /// `None` = `SystemClock`.
    pub clock: Option<Arc<dyn Clock>>,
    pub sync: SyncOptions,
}

impl EngineOptions {
    pub fn new(remote: Arc<dyn RemoteService>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            remote,
            durable,
            clock: None,
            sync: SyncOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_sync(mut self, sync: SyncOptions) -> Self {
        self.sync = sync;
        self
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock
            .clone()
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>)
    }
}
