pub mod error;
pub mod types;

pub mod audit;
pub mod backup;
pub mod cache;
pub mod clock;
pub mod config;
pub mod remote;
pub mod storage;
pub mod sync;

pub use audit::{AuditAction, AuditLedger, LogEntry, Transaction, TransactionKind};
pub use backup::{BackupSnapshot, BackupVault, RecycleBin};
pub use cache::{CacheStore, LoadOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineOptions, SyncOptions};
pub use error::{Result, ShopSyncError};
pub use remote::{MemoryRemote, RemoteService};
pub use storage::{DurableStore, MemoryStore};
pub use sync::{Mutation, MutationOutcome, RemoteSyncEngine, UpdateOptions};
pub use types::{Actor, Collection, Document, Record, StockItem};
