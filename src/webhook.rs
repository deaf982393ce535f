// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inbound webhook verification and dispatch.
//!
//! Every inbound event passes three gates in order: the authenticity
//! token (rejected loudly so the provider can alert), payload parsing,
//! and event-id deduplication. Only then does an actionable event turn
//! into a pull task for the linked entity. Events for dead-lettered
//! entities are acknowledged without producing work; those entities
//! re-enter the pipeline only through a manual re-trigger.
//!
//! Dedup is best-effort within a bounded window. If the local entity
//! lookup fails the event id is released again so the provider's
//! redelivery gets a second chance instead of vanishing into the cache.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dedup::DedupCache;
use crate::entity::SyncStatus;
use crate::event::ChangeEvent;
use crate::store::traits::RecordStore;
use crate::task::{Direction, SyncTask, TaskReason};

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The authenticity token did not match the configured secret.
    /// Maps to a 401-equivalent at the transport layer.
    #[error("webhook authenticity token mismatch")]
    Unauthorized,

    /// The body could not be understood. Maps to a 400-equivalent;
    /// redelivering the same bytes cannot succeed.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// A local lookup failed mid-dispatch. Maps to a 500-equivalent so
    /// the provider redelivers later.
    #[error("webhook dispatch failed: {0}")]
    DispatchFailed(String),
}

/// Receipt returned to the provider on any accepted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub duplicate: bool,
    pub tasks_enqueued: usize,
}

/// What one delivery produced. The tasks still need enqueueing; the
/// dispatcher itself never touches the queue.
#[derive(Debug)]
pub struct WebhookOutcome {
    pub duplicate: bool,
    pub tasks: Vec<SyncTask>,
}

impl WebhookOutcome {
    #[must_use]
    pub fn ack(&self) -> WebhookAck {
        WebhookAck { duplicate: self.duplicate, tasks_enqueued: self.tasks.len() }
    }

    fn fresh(tasks: Vec<SyncTask>) -> Self {
        Self { duplicate: false, tasks }
    }

    fn replay() -> Self {
        Self { duplicate: true, tasks: Vec::new() }
    }
}

/// Constant-time token comparison. Hashing both sides first makes the
/// comparison independent of token length as well as content.
#[must_use]
pub fn verify_token(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Turns verified provider events into sync tasks.
pub struct WebhookDispatcher {
    secret: String,
    dedup: DedupCache,
    records: Arc<dyn RecordStore>,
}

impl WebhookDispatcher {
    pub fn new(secret: impl Into<String>, dedup: DedupCache, records: Arc<dyn RecordStore>) -> Self {
        Self { secret: secret.into(), dedup, records }
    }

    /// Validate, deduplicate, and translate one delivery.
    #[tracing::instrument(skip(self, token, payload), fields(provider = provider))]
    pub async fn dispatch(
        &self,
        provider: &str,
        token: &str,
        payload: &Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        if !verify_token(token, &self.secret) {
            warn!("rejected webhook with bad authenticity token");
            crate::metrics::record_webhook("unauthorized");
            return Err(WebhookError::Unauthorized);
        }

        let event = ChangeEvent::parse(payload).map_err(|e| {
            crate::metrics::record_webhook("malformed");
            WebhookError::MalformedPayload(e.to_string())
        })?;
        if event.event_type.is_actionable() && event.remote_document_id.is_empty() {
            crate::metrics::record_webhook("malformed");
            return Err(WebhookError::MalformedPayload(format!(
                "{} event without a document id",
                event.event_type
            )));
        }

        if !self.dedup.insert(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate delivery acknowledged without effect");
            crate::metrics::record_webhook("duplicate");
            return Ok(WebhookOutcome::replay());
        }

        if !event.event_type.is_actionable() {
            info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "acknowledging event type this engine does not handle"
            );
            crate::metrics::record_webhook("ignored");
            return Ok(WebhookOutcome::fresh(Vec::new()));
        }

        match self.records.find_by_remote_id(&event.remote_document_id).await {
            Ok(Some(entity)) if entity.sync_status == SyncStatus::Dead => {
                info!(
                    event_id = %event.event_id,
                    entity_id = %entity.id,
                    "entity is dead-lettered; event acknowledged, no task enqueued"
                );
                crate::metrics::record_webhook("suppressed");
                Ok(WebhookOutcome::fresh(Vec::new()))
            }
            Ok(Some(entity)) => {
                debug!(
                    event_id = %event.event_id,
                    entity_id = %entity.id,
                    "webhook mapped to pull task"
                );
                crate::metrics::record_webhook("accepted");
                Ok(WebhookOutcome::fresh(vec![SyncTask::new(
                    &entity.id,
                    Direction::Pull,
                    TaskReason::Webhook,
                )]))
            }
            Ok(None) => {
                info!(
                    event_id = %event.event_id,
                    document_id = %event.remote_document_id,
                    "event concerns a document no local entity is linked to"
                );
                crate::metrics::record_webhook("unlinked");
                Ok(WebhookOutcome::fresh(Vec::new()))
            }
            Err(e) => {
                // release the id so the provider's redelivery is not
                // swallowed as a duplicate
                self.dedup.remove(&event.event_id);
                crate::metrics::record_webhook("error");
                Err(WebhookError::DispatchFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SyncedEntity;
    use crate::store::memory::MemoryRecordStore;
    use crate::store::traits::StoreError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const SECRET: &str = "s3cr3t";

    fn dispatcher(records: Arc<dyn RecordStore>) -> WebhookDispatcher {
        WebhookDispatcher::new(SECRET, DedupCache::new(64, Duration::from_secs(60)), records)
    }

    async fn linked_store(entity_id: &str, doc_id: &str) -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        let mut entity = SyncedEntity::new(entity_id, "Harbor View");
        entity.remote_document_id = Some(doc_id.to_string());
        store.put(&entity).await.unwrap();
        store
    }

    fn property_changed(event_id: &str, doc_id: &str) -> Value {
        json!({
            "event_id": event_id,
            "type": "page.property_changed",
            "page_id": doc_id,
        })
    }

    #[test]
    fn test_verify_token() {
        assert!(verify_token("abc", "abc"));
        assert!(!verify_token("abc", "abd"));
        assert!(!verify_token("abc", "abcd"));
        assert!(!verify_token("", "abc"));
        assert!(verify_token("", ""));
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let err = d
            .dispatch("notion", "wrong", &property_changed("evt-1", "doc-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Unauthorized));
    }

    #[tokio::test]
    async fn test_linked_event_produces_pull_task() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let outcome = d
            .dispatch("notion", SECRET, &property_changed("evt-1", "doc-1"))
            .await
            .unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].entity_id, "P1");
        assert_eq!(outcome.tasks[0].direction, Direction::Pull);
        assert_eq!(outcome.tasks[0].reason, TaskReason::Webhook);
        assert_eq!(outcome.ack(), WebhookAck { duplicate: false, tasks_enqueued: 1 });
    }

    #[tokio::test]
    async fn test_replayed_event_is_acknowledged_without_tasks() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let payload = property_changed("evt-1", "doc-1");
        let first = d.dispatch("notion", SECRET, &payload).await.unwrap();
        assert_eq!(first.tasks.len(), 1);

        for _ in 0..3 {
            let replay = d.dispatch("notion", SECRET, &payload).await.unwrap();
            assert!(replay.duplicate);
            assert!(replay.tasks.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_acknowledged() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let payload = json!({"event_id": "evt-9", "type": "workspace.ping"});
        let outcome = d.dispatch("notion", SECRET, &payload).await.unwrap();
        assert!(!outcome.duplicate);
        assert!(outcome.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_unlinked_document_is_acknowledged_without_tasks() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let outcome = d
            .dispatch("notion", SECRET, &property_changed("evt-1", "doc-other"))
            .await
            .unwrap();
        assert!(outcome.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_dead_entity_event_is_acknowledged_without_tasks() {
        let store = linked_store("P1", "doc-1").await;
        let mut entity = store.get("P1").await.unwrap().unwrap();
        entity.sync_status = SyncStatus::Dead;
        entity.last_sync_error = Some("remote document is archived".into());
        store.put(&entity).await.unwrap();

        let d = dispatcher(store.clone());
        let outcome = d
            .dispatch("notion", SECRET, &property_changed("evt-1", "doc-1"))
            .await
            .unwrap();
        assert!(!outcome.duplicate);
        assert!(outcome.tasks.is_empty(), "dead entities wait for a manual re-trigger");
        let after = store.get("P1").await.unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Dead);
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_malformed() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let err = d
            .dispatch("notion", SECRET, &json!({"type": "page.updated"}))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_actionable_event_without_document_id_is_malformed() {
        let d = dispatcher(linked_store("P1", "doc-1").await);
        let payload = json!({"event_id": "evt-1", "type": "page.updated"});
        let err = d.dispatch("notion", SECRET, &payload).await.unwrap_err();
        assert!(matches!(err, WebhookError::MalformedPayload(_)));
    }

    /// Record store whose lookups fail until the flag is cleared.
    struct FlakyStore {
        inner: MemoryRecordStore,
        fail_find: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn get(&self, entity_id: &str) -> Result<Option<SyncedEntity>, StoreError> {
            self.inner.get(entity_id).await
        }

        async fn put(&self, entity: &SyncedEntity) -> Result<(), StoreError> {
            self.inner.put(entity).await
        }

        async fn apply_patch(
            &self,
            entity_id: &str,
            patch: &crate::entity::EntityPatch,
            edited_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.apply_patch(entity_id, patch, edited_at).await
        }

        async fn find_by_remote_id(
            &self,
            remote_document_id: &str,
        ) -> Result<Option<SyncedEntity>, StoreError> {
            if self.fail_find.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Backend("connection refused".into()));
            }
            self.inner.find_by_remote_id(remote_document_id).await
        }

        async fn list_linked(
            &self,
            offset: u64,
            limit: usize,
        ) -> Result<Vec<SyncedEntity>, StoreError> {
            self.inner.list_linked(offset, limit).await
        }

        async fn count_by_status(
            &self,
        ) -> Result<Vec<(crate::entity::SyncStatus, u64)>, StoreError> {
            self.inner.count_by_status().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_releases_the_event_id() {
        let store = Arc::new(FlakyStore {
            inner: MemoryRecordStore::new(),
            fail_find: AtomicBool::new(true),
        });
        let mut entity = SyncedEntity::new("P1", "A");
        entity.remote_document_id = Some("doc-1".into());
        store.inner.put(&entity).await.unwrap();

        let d = dispatcher(store);
        let payload = property_changed("evt-1", "doc-1");
        let err = d.dispatch("notion", SECRET, &payload).await.unwrap_err();
        assert!(matches!(err, WebhookError::DispatchFailed(_)));

        // redelivery after the store recovers must not be treated as a
        // duplicate
        let outcome = d.dispatch("notion", SECRET, &payload).await.unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(outcome.tasks.len(), 1);
    }
}
