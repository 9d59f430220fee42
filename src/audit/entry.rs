//! Audit log and ledger documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Actor, Collection, Document};

use super::device::DeviceInfo;
use super::diff::Changes;

// ============================================================================
// LogEntry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditAction {
    Add,
    Update,
    UpdateAll,
    Remove,
    Restore,
    RemovePermanent,
}

impl AuditAction {
    /// Actions that change a record that already exists.
    pub fn mutates_existing(&self) -> bool {
        !matches!(self, AuditAction::Add)
    }
}

/// One audit record per mutation attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `"<collection>/<id>"`.
    pub entity: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Actor>,
    /// ISO-8601.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(default, skip_serializing_if = "Changes::is_empty")]
    pub changes: Changes,
    /// Attempted body of a failed creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub device: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_updated: Option<i64>,
}

impl Document for LogEntry {
    const COLLECTION: Collection = Collection::Logs;
}

// ============================================================================
// Transaction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Sell,
    Buy,
    Revert,
}

/// Ledger entry derived from a stock change. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub cost: f64,
    pub item_type: Collection,
    pub item_id: String,
    /// Units moved, always positive.
    pub quantity: f64,
    pub net_amount: f64,
    pub gross_amount: f64,
    pub payment_method: String,
    pub document_type: String,
    pub transaction_type: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<String>,
    #[serde(rename = "docUpdated")]
    pub doc_updated: i64,
}

impl Document for Transaction {
    const COLLECTION: Collection = Collection::Transactions;
}
