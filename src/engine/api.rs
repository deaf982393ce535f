// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine operations: webhook intake, manual triggers, on-demand
//! scans, and health reporting.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{EngineState, HealthReport, SyncEngine, TriggerAck};
use crate::entity::SyncStatus;
use crate::metrics;
use crate::reconcile::{DiscrepancyReport, ScanScope};
use crate::store::traits::{AuditEntry, RecordStore, StoreError, SyncStateStore};
use crate::task::{Direction, SyncTask, TaskReason};
use crate::webhook::{WebhookAck, WebhookError};

/// Audit rows included in a health report.
const RECENT_AUDIT_LIMIT: usize = 20;

impl SyncEngine {
    /// Ingest one webhook delivery from the remote provider.
    ///
    /// The returned acknowledgement (or error) maps directly onto the
    /// transport response: `Ok` is a 200, [`WebhookError::Unauthorized`]
    /// a 401, [`WebhookError::MalformedPayload`] a 400, and
    /// [`WebhookError::DispatchFailed`] a 500 so the provider redelivers.
    pub async fn receive_webhook(
        &self,
        provider: &str,
        token: &str,
        payload: &Value,
    ) -> Result<WebhookAck, WebhookError> {
        // Reject before the dedup cache sees the event id: a task pushed
        // onto a closed queue is dropped, and the redelivery must not be
        // mistaken for a replay.
        if matches!(
            self.state(),
            EngineState::ShuttingDown | EngineState::Stopped
        ) {
            return Err(WebhookError::DispatchFailed(
                "engine is shutting down".into(),
            ));
        }
        let outcome = self.dispatcher.dispatch(provider, token, payload).await?;
        let ack = outcome.ack();
        for task in outcome.tasks {
            if let Err(e) = self.state_store.mark_pending(&task.entity_id).await {
                warn!(entity_id = %task.entity_id, error = %e, "could not mark entity pending");
            }
            self.queue.push(task).await;
        }
        Ok(ack)
    }

    /// Manually enqueue a push for one entity.
    ///
    /// This is the only way a DEAD entity re-enters the pipeline; doing
    /// so is recorded in the audit trail. The work itself runs on the
    /// worker pool, so the returned status is PENDING, not the result.
    #[tracing::instrument(skip(self), fields(entity_id = entity_id))]
    pub async fn trigger_sync(&self, entity_id: &str) -> Result<TriggerAck, StoreError> {
        // A trigger accepted after the queue closes would be dropped
        // silently, stranding the entity in PENDING. Idle is fine: tasks
        // queued before start() are picked up when the workers come up.
        if matches!(
            self.state(),
            EngineState::ShuttingDown | EngineState::Stopped
        ) {
            return Err(StoreError::Backend("engine is shutting down".into()));
        }
        let entity = self
            .records
            .get(entity_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if entity.sync_status == SyncStatus::Dead {
            info!(entity_id, "manual re-trigger of dead-lettered entity");
            let entry = AuditEntry::manual_retrigger(
                entity_id,
                format!(
                    "operator re-trigger; previous error: {}",
                    entity.last_sync_error.as_deref().unwrap_or("unknown")
                ),
            );
            if let Err(e) = self.state_store.append_audit(&entry).await {
                warn!(entity_id, error = %e, "could not append re-trigger audit entry");
            }
        }

        self.state_store.mark_pending(entity_id).await?;
        self.queue
            .push(SyncTask::new(
                entity_id,
                Direction::Push,
                TaskReason::ManualTrigger,
            ))
            .await;
        self.refresh_gauges().await;

        Ok(TriggerAck {
            entity_id: entity_id.to_string(),
            sync_status: SyncStatus::Pending,
        })
    }

    /// Run one reconciliation scan now and remember its report.
    pub async fn run_scan(&self, scope: ScanScope) -> DiscrepancyReport {
        let report = self.scanner.scan(scope).await;
        *self.latest_report.write() = Some(report.clone());
        report
    }

    /// Collect a health report.
    ///
    /// Never fails: a store outage shows up as `store_reachable: false`
    /// with zeroed counts rather than an error, so the health endpoint
    /// stays useful exactly when things are broken.
    pub async fn health(&self) -> HealthReport {
        let (counts, ping) = tokio::join!(self.records.count_by_status(), self.records.ping());
        let store_reachable = ping.is_ok();

        let mut status_counts: BTreeMap<SyncStatus, u64> =
            SyncStatus::ALL.iter().map(|status| (*status, 0)).collect();
        match counts {
            Ok(rows) => {
                for (status, count) in rows {
                    status_counts.insert(status, count);
                }
                for (status, count) in &status_counts {
                    metrics::set_status_count(status.as_str(), *count);
                }
            }
            Err(e) => warn!(error = %e, "status counts unavailable"),
        }

        let recent_audit = match self.state_store.recent_audit(RECENT_AUDIT_LIMIT).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "audit trail unavailable");
                Vec::new()
            }
        };

        let stats = self.queue.stats().await;
        let state = self.state();
        HealthReport {
            state,
            healthy: state == EngineState::Running && store_reachable,
            store_reachable,
            status_counts,
            queue_depth: stats.depth(),
            in_flight: stats.in_flight,
            scheduled_retries: self.scheduler.pending().await,
            recent_conflicts: self.conflicts.snapshot(),
            recent_audit,
            last_report: self.latest_report.read().clone(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::super::tests::memory_engine;
    use super::*;
    use crate::config::SyncEngineConfig;
    use crate::entity::{ProjectStatus, SyncedEntity};
    use crate::remote::types::{Document, RemoteValue};

    const SECRET: &str = "whsec_test";

    fn config() -> SyncEngineConfig {
        SyncEngineConfig {
            webhook_secret: Some(SECRET.into()),
            remote_parent_id: Some("workspace-1".into()),
            worker_count: 1,
            scan_interval_secs: 0,
            ..Default::default()
        }
    }

    fn linked_entity(id: &str, doc_id: &str) -> SyncedEntity {
        let mut entity = SyncedEntity::new(id, format!("Entity {id}"));
        entity.status = ProjectStatus::InProgress;
        entity.remote_document_id = Some(doc_id.to_string());
        entity.sync_status = SyncStatus::Synced;
        entity.last_synced_at = Some(Utc::now());
        entity
    }

    #[tokio::test]
    async fn test_webhook_enqueues_pull_and_marks_pending() {
        let (engine, store, _) = memory_engine(config());
        store.put(&linked_entity("P1", "doc-1")).await.unwrap();

        let payload = json!({
            "event_id": "evt-1",
            "type": "page.property_changed",
            "page_id": "doc-1",
        });
        let ack = engine
            .receive_webhook("notion", SECRET, &payload)
            .await
            .unwrap();
        assert!(!ack.duplicate);
        assert_eq!(ack.tasks_enqueued, 1);

        assert_eq!(
            engine.state_store.get_status("P1").await.unwrap(),
            SyncStatus::Pending
        );
        let queued = engine.queue.pop().await.unwrap();
        assert_eq!(queued.entity_id, "P1");
        assert_eq!(queued.direction, Direction::Pull);
    }

    #[tokio::test]
    async fn test_webhook_bad_token_rejected() {
        let (engine, _, _) = memory_engine(config());
        let payload = json!({ "event_id": "evt-1", "type": "page.updated", "page_id": "d" });
        let err = engine
            .receive_webhook("notion", "wrong", &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Unauthorized));
    }

    #[tokio::test]
    async fn test_trigger_sync_unknown_entity() {
        let (engine, _, _) = memory_engine(config());
        let err = engine.trigger_sync("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_trigger_sync_enqueues_push() {
        let (engine, store, _) = memory_engine(config());
        store.put(&linked_entity("P1", "doc-1")).await.unwrap();

        let ack = engine.trigger_sync("P1").await.unwrap();
        assert_eq!(ack.entity_id, "P1");
        assert_eq!(ack.sync_status, SyncStatus::Pending);

        let queued = engine.queue.pop().await.unwrap();
        assert_eq!(queued.direction, Direction::Push);
        assert_eq!(queued.reason, TaskReason::ManualTrigger);
        assert_eq!(queued.attempt, 0);
    }

    #[tokio::test]
    async fn test_trigger_on_dead_entity_writes_audit() {
        let (engine, store, _) = memory_engine(config());
        let mut entity = linked_entity("P1", "doc-1");
        entity.sync_status = SyncStatus::Dead;
        entity.last_sync_error = Some("remote document is archived".into());
        store.put(&entity).await.unwrap();

        engine.trigger_sync("P1").await.unwrap();

        let audit = engine.state_store.recent_audit(5).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].kind, AuditEntry::KIND_MANUAL_RETRIGGER);
        assert!(audit[0].detail.contains("remote document is archived"));
        assert_eq!(
            engine.state_store.get_status("P1").await.unwrap(),
            SyncStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_intake_rejected_after_shutdown() {
        let (engine, store, _) = memory_engine(config());
        store.put(&linked_entity("P1", "doc-1")).await.unwrap();
        engine.start().await;
        engine.shutdown().await;

        let payload = json!({
            "event_id": "evt-1",
            "type": "page.property_changed",
            "page_id": "doc-1",
        });
        let err = engine
            .receive_webhook("notion", SECRET, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::DispatchFailed(_)));

        let err = engine.trigger_sync("P1").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        // the rejected trigger must not have touched the row
        assert_eq!(
            engine.state_store.get_status("P1").await.unwrap(),
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn test_health_zero_fills_statuses() {
        let (engine, store, _) = memory_engine(config());
        store.put(&linked_entity("P1", "doc-1")).await.unwrap();

        let health = engine.health().await;
        assert!(health.store_reachable);
        // not running yet, so not healthy
        assert!(!health.healthy);
        assert_eq!(health.state, EngineState::Idle);
        assert_eq!(health.status_counts.len(), SyncStatus::ALL.len());
        assert_eq!(health.status_counts[&SyncStatus::Synced], 1);
        assert_eq!(health.status_counts[&SyncStatus::Dead], 0);
        assert!(!health.needs_attention());
    }

    #[tokio::test]
    async fn test_run_scan_remembers_report() {
        let (engine, store, remote) = memory_engine(config());
        // drifted remote copy: newer edit with a different status
        let entity = linked_entity("P1", "doc-1");
        let mut properties = crate::mapper::to_remote_properties(&entity);
        properties.insert(
            "Status".to_string(),
            RemoteValue::Select("Delivered".to_string()),
        );
        remote.insert_document(Document {
            id: "doc-1".into(),
            parent_id: Some("workspace-1".into()),
            created_at: Utc::now() - chrono::Duration::days(1),
            last_edited_at: Utc::now() + chrono::Duration::seconds(60),
            archived: false,
            properties,
        });
        store.put(&entity).await.unwrap();

        let report = engine.run_scan(ScanScope::Full).await;
        assert_eq!(report.total_checked, 1);
        assert!(report.complete);

        let health = engine.health().await;
        let remembered = health.last_report.expect("report stored");
        assert_eq!(remembered.total_checked, 1);
    }
}
