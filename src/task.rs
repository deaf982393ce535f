//! Typed unit of work flowing through the task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a sync task moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Local record -> remote document.
    Push,
    /// Remote document -> local record.
    Pull,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Push => "PUSH",
            Direction::Pull => "PULL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a task was created. Carried through logs and metrics so queue
/// composition is attributable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskReason {
    Webhook,
    ManualTrigger,
    Reconciliation,
}

impl TaskReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskReason::Webhook => "webhook",
            TaskReason::ManualTrigger => "manual-trigger",
            TaskReason::Reconciliation => "reconciliation",
        }
    }
}

impl std::fmt::Display for TaskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One scheduled sync attempt for one entity.
///
/// `attempt` is zero-based: a task that has never failed carries 0.
/// The retry scheduler bumps it and sets `next_attempt_at` on each
/// re-schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub entity_id: String,
    pub direction: Direction,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub reason: TaskReason,
}

impl SyncTask {
    /// A first-attempt task due immediately.
    pub fn new(entity_id: impl Into<String>, direction: Direction, reason: TaskReason) -> Self {
        Self {
            entity_id: entity_id.into(),
            direction,
            attempt: 0,
            next_attempt_at: Utc::now(),
            reason,
        }
    }
}
