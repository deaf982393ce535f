//! Storage abstractions for the record store and sync bookkeeping.
//!
//! Two traits, one backing table: [`RecordStore`] reads and writes the
//! business rows, [`SyncStateStore`] owns the sync columns and the
//! audit trail. Production uses [`SqlStore`] for both; tests use
//! [`MemoryRecordStore`].
//!
//! [`SqlStore`]: super::sql::SqlStore
//! [`MemoryRecordStore`]: super::memory::MemoryRecordStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entity::{EntityPatch, SyncStatus, SyncedEntity};

/// Storage layer failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt row for entity {entity_id}: {detail}")]
    Corruption { entity_id: String, detail: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// One row of the dead-letter / manual-intervention audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub entity_id: String,
    pub occurred_at: DateTime<Utc>,
    /// "dead_letter" or "manual_retrigger".
    pub kind: String,
    pub detail: String,
}

impl AuditEntry {
    pub const KIND_DEAD_LETTER: &'static str = "dead_letter";
    pub const KIND_MANUAL_RETRIGGER: &'static str = "manual_retrigger";

    #[must_use]
    pub fn dead_letter(entity_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(entity_id, Self::KIND_DEAD_LETTER, detail)
    }

    #[must_use]
    pub fn manual_retrigger(entity_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(entity_id, Self::KIND_MANUAL_RETRIGGER, detail)
    }

    fn new(entity_id: impl Into<String>, kind: &str, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            occurred_at: Utc::now(),
            kind: kind.to_string(),
            detail: detail.into(),
        }
    }
}

/// Read/write access to the locally authoritative entity rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, entity_id: &str) -> Result<Option<SyncedEntity>, StoreError>;

    /// Insert or fully replace a row.
    async fn put(&self, entity: &SyncedEntity) -> Result<(), StoreError>;

    /// Apply a pulled patch to the business fields, stamping
    /// `updated_at` with the remote edit time. Callers hold the
    /// per-entity single-flight lock, so read-modify-write is safe.
    async fn apply_patch(
        &self,
        entity_id: &str,
        patch: &EntityPatch,
        edited_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_by_remote_id(
        &self,
        remote_document_id: &str,
    ) -> Result<Option<SyncedEntity>, StoreError>;

    /// Page through entities that have a linked remote document,
    /// ordered by id. Drives the reconciliation scan.
    async fn list_linked(&self, offset: u64, limit: usize)
        -> Result<Vec<SyncedEntity>, StoreError>;

    /// Row counts per sync status. Statuses with no rows are omitted.
    async fn count_by_status(&self) -> Result<Vec<(SyncStatus, u64)>, StoreError>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Exclusive writer of the sync bookkeeping columns. Every write is a
/// single atomic row update; there is no status write that can leave a
/// row half-transitioned.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn mark_pending(&self, entity_id: &str) -> Result<(), StoreError>;

    /// Record a successful sync. `remote_document_id` is only written
    /// when the column is still NULL; once linked, an entity keeps its
    /// document for life. `payload_hash` records the payload that was
    /// actually sent to the remote; pass `None` when the sync made no
    /// remote write, which leaves the stored hash untouched.
    async fn mark_synced(
        &self,
        entity_id: &str,
        remote_document_id: Option<&str>,
        at: DateTime<Utc>,
        payload_hash: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&self, entity_id: &str, error: &str) -> Result<(), StoreError>;

    async fn mark_dead(&self, entity_id: &str, error: &str) -> Result<(), StoreError>;

    async fn get_status(&self, entity_id: &str) -> Result<SyncStatus, StoreError>;

    /// Append to the dead-letter / manual-action audit trail.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Most recent audit entries, newest first; ties on `occurred_at`
    /// order by id, descending.
    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_constructors() {
        let entry = AuditEntry::dead_letter("P1", "retries exhausted: timeout");
        assert_eq!(entry.kind, AuditEntry::KIND_DEAD_LETTER);
        assert_eq!(entry.entity_id, "P1");
        assert!(!entry.id.is_empty());

        let other = AuditEntry::manual_retrigger("P1", "operator retry");
        assert_eq!(other.kind, AuditEntry::KIND_MANUAL_RETRIGGER);
        assert_ne!(entry.id, other.id);
    }

    #[test]
    fn test_store_error_from_sqlx() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound));
    }
}
