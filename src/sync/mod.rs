pub mod engine;
pub mod types;

pub use engine::RemoteSyncEngine;
pub use types::{BulkDeleteReport, Mutation, MutationOutcome, UpdateOptions};
