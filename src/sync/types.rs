//! Result and option types of `RemoteSyncEngine` operations.

use crate::audit::TransactionKind;
use crate::error::SyncError;
use crate::types::Record;

// ============================================================================
// Mutations
// ============================================================================

/// Whether the remote store acknowledged a mutation.
///
/// The cache is updated optimistically in both cases; `AppliedLocally`
/// marks the window where local state is ahead of the remote.
#[derive(Debug)]
pub enum MutationOutcome {
    ConfirmedRemotely,
    AppliedLocally { error: SyncError },
}

#[derive(Debug)]
pub struct Mutation {
    /// The record as it now sits in the cache.
    pub record: Record,
    pub outcome: MutationOutcome,
}

impl Mutation {
    pub(crate) fn new(record: Record, error: Option<SyncError>) -> Self {
        let outcome = match error {
            None => MutationOutcome::ConfirmedRemotely,
            Some(error) => MutationOutcome::AppliedLocally { error },
        };
        Self { record, outcome }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, MutationOutcome::ConfirmedRemotely)
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.outcome {
            MutationOutcome::ConfirmedRemotely => None,
            MutationOutcome::AppliedLocally { error } => Some(error),
        }
    }
}

/// Options for `RemoteSyncEngine::update_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Direction of a derived stock transaction, overriding the sign of the
    /// quantity change.
    pub direction: Option<TransactionKind>,
}

// ============================================================================
// Bulk delete
// ============================================================================

/// Outcome of `RemoteSyncEngine::remove_permanent_many`.
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub requested: usize,
    /// Size of each committed batch, in commit order.
    pub batches: Vec<usize>,
    pub deleted: Vec<String>,
    /// Ids not in the deleted bucket or lacking an origin collection.
    pub skipped: Vec<String>,
    /// Ids of batches the remote rejected, with the error.
    pub failed: Vec<(Vec<String>, SyncError)>,
}

impl BulkDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}
