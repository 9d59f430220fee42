pub mod device;
pub mod diff;
pub mod entry;
pub mod ledger;

pub use device::{classify, DeviceInfo, DeviceKind};
pub use diff::{diff, diff_objects, Changes, FieldChange};
pub use entry::{AuditAction, LogEntry, Transaction, TransactionKind};
pub use ledger::{derive_transaction, AuditEvent, AuditLedger, LogOutcome};
