//! AuditLedger: audit log writes and derived stock transactions.
//!
//! Logging never fails the caller. Write errors are counted; after
//! `log_failure_threshold` consecutive failures logging switches off for the
//! rest of the session and no further remote log writes are attempted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheStore;
use crate::config::SyncOptions;
use crate::remote::RemoteService;
use crate::types::{number_of, Actor, Collection, Record, StockItem};

use super::device::DeviceInfo;
use super::diff::{diff, Changes};
use super::entry::{AuditAction, LogEntry, Transaction, TransactionKind};

// ============================================================================
// Event / outcome
// ============================================================================

/// A mutation attempt to be recorded.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub collection: Collection,
    pub id: Option<String>,
    /// State after the mutation (or the attempted payload).
    pub record: Option<Record>,
    /// Cached state before the mutation.
    pub previous: Option<Record>,
    pub error: Option<String>,
    /// Forces the direction of a derived transaction.
    pub direction: Option<TransactionKind>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, collection: Collection) -> Self {
        Self {
            action,
            collection,
            id: None,
            record: None,
            previous: None,
            error: None,
            direction: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    pub fn previous(mut self, previous: Option<Record>) -> Self {
        self.previous = previous;
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn direction(mut self, direction: Option<TransactionKind>) -> Self {
        self.direction = direction;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    /// Logging is off (configured or tripped).
    Disabled,
    /// Collection is not in the allow-list.
    Skipped,
    Written { id: String },
    Failed,
}

// ============================================================================
// AuditLedger
// ============================================================================

pub struct AuditLedger {
    remote: Arc<dyn RemoteService>,
    cache: CacheStore,
    options: Arc<SyncOptions>,
    actor: Mutex<Option<Actor>>,
    failures: AtomicUsize,
    enabled: AtomicBool,
}

impl AuditLedger {
    pub fn new(remote: Arc<dyn RemoteService>, cache: CacheStore, options: Arc<SyncOptions>) -> Self {
        let enabled = options.logging_enabled;
        Self {
            remote,
            cache,
            options,
            actor: Mutex::new(None),
            failures: AtomicUsize::new(0),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_actor(&self, actor: Option<Actor>) {
        *self.actor.lock() = actor;
    }

    pub fn actor(&self) -> Option<Actor> {
        self.actor.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Record a mutation attempt. Stock changes on `items`/`parts` updates
    /// also produce a ledger transaction.
    pub async fn log(&self, event: AuditEvent) -> LogOutcome {
        if !self.is_enabled() {
            return LogOutcome::Disabled;
        }
        if !self.options.logged_collections.contains(&event.collection) {
            tracing::debug!(collection = %event.collection, "collection not audited");
            return LogOutcome::Skipped;
        }

        let actor = self.actor();
        let changes = self.changes_for(&event);
        let entry = self.build_entry(&event, &changes, actor.as_ref());

        let outcome = self.write_entry(&entry).await;

        if event.action == AuditAction::Update {
            if let (Some(previous), Some(current)) = (&event.previous, &event.record) {
                let derived = derive_transaction(
                    event.collection,
                    previous,
                    current,
                    &changes,
                    event.direction,
                    &self.options,
                    actor.as_ref(),
                    self.cache.clock().now_ms(),
                );
                if let Some(transaction) = derived {
                    self.write_transaction(transaction).await;
                }
            }
        }

        outcome
    }

    fn changes_for(&self, event: &AuditEvent) -> Changes {
        match (&event.previous, &event.record) {
            (Some(previous), Some(current)) if event.action.mutates_existing() => {
                diff(previous, current)
            }
            (None, Some(current)) if event.action == AuditAction::Add && event.error.is_none() => {
                diff(&Record::new(), current)
            }
            _ => Changes::new(),
        }
    }

    fn build_entry(&self, event: &AuditEvent, changes: &Changes, actor: Option<&Actor>) -> LogEntry {
        let clock = self.cache.clock();
        let item_id = event
            .id
            .clone()
            .or_else(|| event.record.as_ref().and_then(|r| r.id.clone()));
        let item_name = event
            .record
            .as_ref()
            .or(event.previous.as_ref())
            .and_then(|r| r.name().map(str::to_string));
        let payload = match (&event.error, event.action) {
            (Some(_), AuditAction::Add) => event.record.as_ref().map(Record::to_value),
            _ => None,
        };

        LogEntry {
            id: None,
            entity: format!(
                "{}/{}",
                event.collection,
                item_id.as_deref().unwrap_or_default()
            ),
            action: event.action,
            user: actor.cloned(),
            timestamp: clock.now_iso(),
            item_id,
            item_name,
            changes: changes.clone(),
            payload,
            device: DeviceInfo::from_user_agent(actor.and_then(|a| a.user_agent.as_deref())),
            error: event.error.clone(),
            doc_updated: Some(clock.now_ms()),
        }
    }

    async fn write_entry(&self, entry: &LogEntry) -> LogOutcome {
        let value = match serde_json::to_value(entry) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode audit entry");
                return LogOutcome::Failed;
            }
        };

        match self.remote.add_doc(Collection::Logs, &value).await {
            Ok(id) => {
                self.failures.store(0, Ordering::SeqCst);
                LogOutcome::Written { id }
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(entity = %entry.entity, failures, error = %e, "audit log write failed");
                if failures >= self.options.log_failure_threshold {
                    self.enabled.store(false, Ordering::SeqCst);
                    tracing::warn!(failures, "audit logging disabled for this session");
                }
                LogOutcome::Failed
            }
        }
    }

    async fn write_transaction(&self, transaction: Transaction) {
        let mut record = match Record::encode(&transaction) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode transaction");
                return;
            }
        };
        match self
            .remote
            .add_doc(Collection::Transactions, &record.to_value())
            .await
        {
            Ok(id) => {
                tracing::debug!(id = %id, item = %transaction.item_id, "transaction recorded");
                record.id = Some(id);
                self.cache.append_cached_entry(Collection::Transactions, record);
            }
            Err(e) => {
                tracing::warn!(item = %transaction.item_id, error = %e, "transaction write failed");
            }
        }
    }
}

// ============================================================================
// Transaction derivation
// ============================================================================

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Build the ledger entry for a stock change, if there is one.
///
/// Stock went down → `sell`, up → `buy`, unless `direction` is given.
/// Sales are priced from `price`/`net_price` (net falls back to
/// gross ÷ `vat_divisor`); purchases from `cost`, falling back to `price`.
#[allow(clippy::too_many_arguments)]
pub fn derive_transaction(
    collection: Collection,
    previous: &Record,
    current: &Record,
    changes: &Changes,
    direction: Option<TransactionKind>,
    options: &SyncOptions,
    actor: Option<&Actor>,
    now_ms: i64,
) -> Option<Transaction> {
    let field = options.stock_field.as_str();
    if !collection.is_stock_bearing() || !changes.contains_key(field) {
        return None;
    }

    let old = previous.field(field).and_then(number_of).unwrap_or(0.0);
    let new = current.field(field).and_then(number_of).unwrap_or(0.0);
    let delta = old - new;
    if delta == 0.0 {
        return None;
    }

    let kind = direction.unwrap_or(if delta > 0.0 {
        TransactionKind::Sell
    } else {
        TransactionKind::Buy
    });
    let quantity = delta.abs();
    let item: StockItem = current.decode().unwrap_or_default();

    let (gross, net) = match kind {
        TransactionKind::Sell | TransactionKind::Revert => {
            let gross = item.price.unwrap_or(0.0) * quantity;
            let net = item
                .net_price
                .map(|n| n * quantity)
                .unwrap_or(gross / options.vat_divisor);
            (gross, net)
        }
        TransactionKind::Buy => {
            let gross = item.cost.or(item.price).unwrap_or(0.0) * quantity;
            (gross, gross / options.vat_divisor)
        }
    };

    let document_type = current
        .field("documentType")
        .and_then(|v| v.as_str())
        .unwrap_or("receipt")
        .to_string();

    Some(Transaction {
        id: None,
        name: item.name.unwrap_or_default(),
        cost: round2(item.cost.unwrap_or(0.0) * quantity),
        item_type: collection,
        item_id: current.id.clone().unwrap_or_default(),
        quantity,
        net_amount: round2(net),
        gross_amount: round2(gross),
        payment_method: item
            .payment_method
            .unwrap_or_else(|| options.default_payment_method.clone()),
        document_type,
        transaction_type: kind,
        user: actor.map(|a| a.name.clone()),
        shop_id: item.shop_id.or_else(|| actor.and_then(|a| a.shop_id.clone())),
        doc_updated: now_ms,
    })
}
