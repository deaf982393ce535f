// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot sync execution: a single push or pull attempt for one
//! entity.
//!
//! The executor is idempotent by construction. Pushes fingerprint the
//! mapped payload and skip the remote write when nothing material
//! changed; pulls compare edit clocks and refresh bookkeeping without
//! touching data when the remote is unchanged. Running the same task
//! twice in a row therefore produces no second remote write and no
//! local data change.
//!
//! Conflicts resolve last-writer-wins on the two edit clocks. A pull
//! that finds the local side strictly newer keeps local values and
//! enqueues a healing push so the remote converges. An exact tie keeps
//! the locally authoritative values, records the difference for review,
//! and writes nothing anywhere.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::entity::SyncedEntity;
use crate::mapper;
use crate::queue::TaskQueue;
use crate::reconcile::{Discrepancy, Resolution};
use crate::remote::client::{DocumentApi, RemoteError};
use crate::store::traits::{RecordStore, StoreError, SyncStateStore};
use crate::task::{Direction, SyncTask};

/// Result of executing one task.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The entity reached SYNCED.
    Done,
    /// Retryable failure; the scheduler decides the next attempt.
    Retry(RemoteError),
    /// Validation-style failure. The entity stays FAILED and is not
    /// retried automatically; retrying cannot fix the input.
    Fault(String),
    /// Permanent failure; the entity is dead-lettered immediately.
    Dead(String),
}

impl ExecOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecOutcome::Done => "done",
            ExecOutcome::Retry(_) => "retry",
            ExecOutcome::Fault(_) => "fault",
            ExecOutcome::Dead(_) => "dead",
        }
    }
}

/// Bounded in-memory log of conflicts kept for operator review.
pub struct ConflictLog {
    entries: RwLock<VecDeque<Discrepancy>>,
    cap: usize,
}

impl ConflictLog {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self { entries: RwLock::new(VecDeque::new()), cap: cap.max(1) }
    }

    pub fn record(&self, discrepancy: Discrepancy) {
        let mut entries = self.entries.write();
        entries.push_back(discrepancy);
        while entries.len() > self.cap {
            entries.pop_front();
        }
    }

    /// Newest last.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Discrepancy> {
        self.entries.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Executes sync tasks against the stores and the remote API.
pub struct SyncExecutor {
    records: Arc<dyn RecordStore>,
    state: Arc<dyn SyncStateStore>,
    remote: Arc<dyn DocumentApi>,
    queue: Arc<TaskQueue>,
    conflicts: Arc<ConflictLog>,
    /// Container for documents created on first push.
    parent_id: Option<String>,
}

impl SyncExecutor {
    pub fn new(
        records: Arc<dyn RecordStore>,
        state: Arc<dyn SyncStateStore>,
        remote: Arc<dyn DocumentApi>,
        queue: Arc<TaskQueue>,
        conflicts: Arc<ConflictLog>,
        parent_id: Option<String>,
    ) -> Self {
        Self { records, state, remote, queue, conflicts, parent_id }
    }

    /// Run one attempt. Success writes the SYNCED bookkeeping here;
    /// failure transitions are the caller's to apply, based on the
    /// outcome.
    #[tracing::instrument(
        skip(self, task),
        fields(
            entity_id = %task.entity_id,
            direction = %task.direction,
            attempt = task.attempt,
            reason = %task.reason,
        )
    )]
    pub async fn execute(&self, task: &SyncTask) -> ExecOutcome {
        match task.direction {
            Direction::Push => self.push(task).await,
            Direction::Pull => self.pull(task).await,
        }
    }

    fn classify_remote(error: RemoteError) -> ExecOutcome {
        match error {
            RemoteError::RateLimited { .. } | RemoteError::Transient(_) => {
                ExecOutcome::Retry(error)
            }
            RemoteError::NotFound => {
                ExecOutcome::Dead("remote document not found; manual re-link required".into())
            }
            RemoteError::Permanent { .. } => ExecOutcome::Dead(error.to_string()),
        }
    }

    async fn load_entity(&self, entity_id: &str) -> Result<SyncedEntity, ExecOutcome> {
        match self.records.get(entity_id).await {
            Ok(Some(entity)) => Ok(entity),
            Ok(None) => Err(ExecOutcome::Fault(format!(
                "entity {entity_id} no longer exists locally"
            ))),
            Err(e) => Err(ExecOutcome::Retry(RemoteError::Transient(format!(
                "record store read failed: {e}"
            )))),
        }
    }

    /// Record success. `fingerprint` is `Some` only when this attempt
    /// actually wrote a payload to the remote; the stored hash must
    /// always describe the last payload the remote received, so paths
    /// that skip the remote write pass `None` and leave it alone.
    ///
    /// A store failure here is retryable: the remote write (if any)
    /// already happened, and re-running the task is safe.
    async fn finish_synced(
        &self,
        entity_id: &str,
        new_document_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> ExecOutcome {
        match self
            .state
            .mark_synced(entity_id, new_document_id, Utc::now(), fingerprint)
            .await
        {
            Ok(()) => ExecOutcome::Done,
            Err(e) => ExecOutcome::Retry(RemoteError::Transient(format!(
                "failed to record synced state: {e}"
            ))),
        }
    }

    async fn push(&self, task: &SyncTask) -> ExecOutcome {
        let entity = match self.load_entity(&task.entity_id).await {
            Ok(entity) => entity,
            Err(outcome) => return outcome,
        };
        let properties = mapper::to_remote_properties(&entity);
        let fingerprint = mapper::payload_fingerprint(&properties);

        match entity.remote_document_id.as_deref() {
            Some(document_id) => {
                if entity.last_synced_hash.as_deref() == Some(fingerprint.as_str()) {
                    debug!("payload unchanged since last sync; skipping remote write");
                    return self.finish_synced(&task.entity_id, None, None).await;
                }
                match self.remote.update_properties(document_id, &properties).await {
                    Ok(()) => {
                        self.finish_synced(&task.entity_id, None, Some(&fingerprint)).await
                    }
                    Err(e) => Self::classify_remote(e),
                }
            }
            None => {
                let Some(parent_id) = self.parent_id.as_deref() else {
                    return ExecOutcome::Fault(
                        "remote_parent_id is not configured; cannot create documents".into(),
                    );
                };
                match self.remote.create_document(parent_id, &properties).await {
                    Ok(doc_ref) => {
                        info!(document_id = %doc_ref.id, "created remote document");
                        self.finish_synced(
                            &task.entity_id,
                            Some(&doc_ref.id),
                            Some(&fingerprint),
                        )
                        .await
                    }
                    Err(e) => Self::classify_remote(e),
                }
            }
        }
    }

    async fn pull(&self, task: &SyncTask) -> ExecOutcome {
        let entity = match self.load_entity(&task.entity_id).await {
            Ok(entity) => entity,
            Err(outcome) => return outcome,
        };
        let Some(document_id) = entity.remote_document_id.clone() else {
            return ExecOutcome::Fault("pull requested for an entity with no linked document".into());
        };
        let doc = match self.remote.get_document(&document_id).await {
            Ok(doc) => doc,
            Err(e) => return Self::classify_remote(e),
        };
        if doc.archived {
            return ExecOutcome::Dead("remote document is archived; manual re-link required".into());
        }

        let remote_changed = entity
            .last_synced_at
            .map_or(true, |at| doc.last_edited_at > at);
        if !remote_changed {
            debug!("remote unchanged since last sync");
            return self.finish_synced(&task.entity_id, None, None).await;
        }

        let patch = match mapper::from_remote_properties(&doc.properties) {
            Ok(patch) => patch,
            Err(e) => return ExecOutcome::Fault(format!("remote property mapping failed: {e}")),
        };

        let local_changed = entity.changed_since(entity.last_synced_at);
        if local_changed && doc.last_edited_at < entity.updated_at {
            // local wins: keep values and push them back so the remote
            // converges. The entity stays PENDING; the healing task
            // parks behind this one and owns the SYNCED transition.
            info!("conflict resolved toward local edit; scheduling healing push");
            crate::metrics::record_conflict("local");
            self.queue
                .push(SyncTask::new(&task.entity_id, Direction::Push, task.reason))
                .await;
            return ExecOutcome::Done;
        }
        if local_changed && doc.last_edited_at == entity.updated_at {
            // dead tie between conflicting edits: the local side is
            // authoritative, and the difference goes on record
            warn!("conflicting edits with identical timestamps; keeping local values");
            crate::metrics::record_conflict("tie");
            let local_view = mapper::to_remote_properties(&entity);
            for (field, local_value, remote_value) in
                mapper::diff_properties(&local_view, &doc.properties)
            {
                self.conflicts.record(Discrepancy {
                    entity_id: task.entity_id.clone(),
                    field,
                    local_value,
                    remote_value,
                    resolution: Resolution::KeptLocal,
                });
            }
            return self.finish_synced(&task.entity_id, None, None).await;
        }
        if local_changed {
            info!("conflict resolved toward remote edit (last writer wins)");
            crate::metrics::record_conflict("remote");
        }

        // remote is the (strictly) newer side: apply its values
        if patch.is_empty() {
            return self.finish_synced(&task.entity_id, None, None).await;
        }
        match self
            .records
            .apply_patch(&task.entity_id, &patch, doc.last_edited_at)
            .await
        {
            Ok(()) => self.finish_synced(&task.entity_id, None, None).await,
            Err(StoreError::NotFound) => {
                ExecOutcome::Fault("entity disappeared while applying pulled changes".into())
            }
            Err(e) => ExecOutcome::Retry(RemoteError::Transient(format!(
                "record store write failed: {e}"
            ))),
        }
    }
}
