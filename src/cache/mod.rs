mod debounce;
pub mod store;

pub use store::{CacheStore, LoadOutcome, MTIME_TABLE, TTL_TABLE};
