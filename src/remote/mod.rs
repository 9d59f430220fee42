pub mod memory;
pub mod traits;

pub use memory::MemoryRemote;
pub use traits::{generate_uuid, BatchOp, Filter, RemoteDoc, RemoteResult, RemoteService};
