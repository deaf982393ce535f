//! Persistence: the authoritative record rows, sync bookkeeping, and
//! the audit trail.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::MemoryRecordStore;
pub use sql::SqlStore;
pub use traits::{AuditEntry, RecordStore, StoreError, SyncStateStore};
