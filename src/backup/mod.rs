pub mod recycle;
pub mod vault;

pub use recycle::{RecycleBin, RestoreReport, SafetySnapshot, LOCAL_TABLE};
pub use vault::{BackupSnapshot, BackupVault, BACKUP_TABLE};
