//! In-memory implementation of the store traits, used by tests and
//! local development. Semantics match [`SqlStore`] exactly, including
//! the set-once behavior of `remote_document_id`.
//!
//! [`SqlStore`]: super::sql::SqlStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::entity::{EntityPatch, SyncStatus, SyncedEntity};
use crate::store::traits::{AuditEntry, RecordStore, StoreError, SyncStateStore};

/// DashMap-backed store.
#[derive(Default)]
pub struct MemoryRecordStore {
    entities: DashMap<String, SyncedEntity>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn with_entity<T>(
        &self,
        entity_id: &str,
        f: impl FnOnce(&mut SyncedEntity) -> T,
    ) -> Result<T, StoreError> {
        let Some(mut entry) = self.entities.get_mut(entity_id) else {
            return Err(StoreError::NotFound);
        };
        Ok(f(entry.value_mut()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, entity_id: &str) -> Result<Option<SyncedEntity>, StoreError> {
        Ok(self.entities.get(entity_id).map(|e| e.clone()))
    }

    async fn put(&self, entity: &SyncedEntity) -> Result<(), StoreError> {
        self.entities.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn apply_patch(
        &self,
        entity_id: &str,
        patch: &EntityPatch,
        edited_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_entity(entity_id, |entity| entity.apply(patch, edited_at))
    }

    async fn find_by_remote_id(
        &self,
        remote_document_id: &str,
    ) -> Result<Option<SyncedEntity>, StoreError> {
        Ok(self
            .entities
            .iter()
            .find(|e| e.remote_document_id.as_deref() == Some(remote_document_id))
            .map(|e| e.clone()))
    }

    async fn list_linked(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SyncedEntity>, StoreError> {
        let mut linked: Vec<SyncedEntity> = self
            .entities
            .iter()
            .filter(|e| e.remote_document_id.is_some())
            .map(|e| e.clone())
            .collect();
        linked.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(linked.into_iter().skip(offset as usize).take(limit).collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(SyncStatus, u64)>, StoreError> {
        let mut counts = std::collections::HashMap::new();
        for entry in self.entities.iter() {
            *counts.entry(entry.sync_status).or_insert(0u64) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for MemoryRecordStore {
    async fn mark_pending(&self, entity_id: &str) -> Result<(), StoreError> {
        self.with_entity(entity_id, |entity| {
            entity.sync_status = SyncStatus::Pending;
        })
    }

    async fn mark_synced(
        &self,
        entity_id: &str,
        remote_document_id: Option<&str>,
        at: DateTime<Utc>,
        payload_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_entity(entity_id, |entity| {
            entity.sync_status = SyncStatus::Synced;
            entity.last_synced_at = Some(at);
            entity.last_sync_error = None;
            if let Some(hash) = payload_hash {
                entity.last_synced_hash = Some(hash.to_string());
            }
            if entity.remote_document_id.is_none() {
                entity.remote_document_id = remote_document_id.map(str::to_string);
            }
        })
    }

    async fn mark_failed(&self, entity_id: &str, error: &str) -> Result<(), StoreError> {
        self.with_entity(entity_id, |entity| {
            entity.sync_status = SyncStatus::Failed;
            entity.last_sync_error = Some(error.to_string());
        })
    }

    async fn mark_dead(&self, entity_id: &str, error: &str) -> Result<(), StoreError> {
        self.with_entity(entity_id, |entity| {
            entity.sync_status = SyncStatus::Dead;
            entity.last_sync_error = Some(error.to_string());
        })
    }

    async fn get_status(&self, entity_id: &str) -> Result<SyncStatus, StoreError> {
        self.entities
            .get(entity_id)
            .map(|e| e.sync_status)
            .ok_or(StoreError::NotFound)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.audit.lock().push(entry.clone());
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self.audit.lock().clone();
        // newest first; id breaks occurred_at ties, same as SqlStore
        entries.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then_with(|| b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }
}
