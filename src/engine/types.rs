//! Public types for the sync engine facade.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::SyncStatus;
use crate::reconcile::{Discrepancy, DiscrepancyReport};
use crate::store::traits::AuditEntry;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Constructed, workers not yet spawned
    Idle,
    /// Spawning workers and background loops
    Starting,
    /// Accepting webhooks, triggers, and scans
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// All workers drained and joined
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Receipt for a manual sync trigger. The work itself runs
/// asynchronously; `sync_status` is the status at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerAck {
    pub entity_id: String,
    pub sync_status: SyncStatus,
}

/// Aggregate engine health, suitable for an operator-facing endpoint.
///
/// Collection never fails: a store outage shows up as
/// `store_reachable: false` with zeroed counts rather than an error.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: EngineState,
    /// True when running and the record store answers.
    pub healthy: bool,
    pub store_reachable: bool,
    /// Entity counts per sync status. Every status is present, zero
    /// filled, so dashboards get a stable shape.
    pub status_counts: BTreeMap<SyncStatus, u64>,
    /// Tasks ready to run plus tasks parked behind the single-flight
    /// lock.
    pub queue_depth: usize,
    pub in_flight: usize,
    /// Tasks waiting out a backoff delay.
    pub scheduled_retries: usize,
    /// Conflicts kept for operator review, oldest first.
    pub recent_conflicts: Vec<Discrepancy>,
    /// Dead-letter and manual-action audit entries, newest first.
    pub recent_audit: Vec<AuditEntry>,
    /// Most recent reconciliation scan, if one has run.
    pub last_report: Option<DiscrepancyReport>,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    /// Coarse indicator for end users: "up to date" only when nothing
    /// is failed, dead, or still moving.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        self.status_counts.get(&SyncStatus::Failed).copied().unwrap_or(0) > 0
            || self.status_counts.get(&SyncStatus::Dead).copied().unwrap_or(0) > 0
    }
}
