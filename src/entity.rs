//! Core data model: the locally authoritative entity and its sync lifecycle.
//!
//! A [`SyncedEntity`] is one row in the record store. Business fields
//! (name, status, address, tier, due date, budget) are owned by the local
//! application; the `sync_*` columns are bookkeeping owned by the engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sync lifecycle state of an entity. Ordering follows the lifecycle,
/// so status maps iterate from `NotSynced` through `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never pushed or pulled.
    NotSynced,
    /// A task for this entity is queued or executing.
    Pending,
    /// Local and remote agreed at the last completed sync.
    Synced,
    /// Last attempt failed; a retry may still be scheduled.
    Failed,
    /// Retries exhausted or failure was permanent. Webhooks and scans
    /// leave the entity alone; only a manual re-trigger moves it out.
    Dead,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 5] = [
        SyncStatus::NotSynced,
        SyncStatus::Pending,
        SyncStatus::Synced,
        SyncStatus::Failed,
        SyncStatus::Dead,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "not_synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Dead => "dead",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_synced" => Some(SyncStatus::NotSynced),
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            "dead" => Some(SyncStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Business status of a project entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    InProgress,
    Review,
    Delivered,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 4] = [
        ProjectStatus::Planning,
        ProjectStatus::InProgress,
        ProjectStatus::Review,
        ProjectStatus::Delivered,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Review => "review",
            ProjectStatus::Delivered => "delivered",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(ProjectStatus::Planning),
            "in_progress" => Some(ProjectStatus::InProgress),
            "review" => Some(ProjectStatus::Review),
            "delivered" => Some(ProjectStatus::Delivered),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Commercial tier of a project entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectTier {
    Standard,
    Premium,
    Enterprise,
}

impl ProjectTier {
    pub const ALL: [ProjectTier; 3] = [
        ProjectTier::Standard,
        ProjectTier::Premium,
        ProjectTier::Enterprise,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectTier::Standard => "standard",
            ProjectTier::Premium => "premium",
            ProjectTier::Enterprise => "enterprise",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(ProjectTier::Standard),
            "premium" => Some(ProjectTier::Premium),
            "enterprise" => Some(ProjectTier::Enterprise),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One locally authoritative record, plus the engine's sync bookkeeping.
///
/// `updated_at` is the local modification clock used for conflict
/// resolution. `remote_document_id` is written exactly once, when the
/// entity is first synced, and never cleared afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEntity {
    /// Stable local identifier (primary key in the record store).
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub address: String,
    pub tier: ProjectTier,
    pub due_date: Option<NaiveDate>,
    /// Budget in minor currency units (pence/cents).
    pub budget_minor: i64,
    /// Last local modification time of the business fields.
    pub updated_at: DateTime<Utc>,
    /// Counterpart document in the remote workspace, once linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_document_id: Option<String>,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_error: Option<String>,
    /// Fingerprint of the mapped payload at the last successful sync.
    /// Lets a push skip the remote write when nothing material changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_hash: Option<String>,
}

impl SyncedEntity {
    /// Create a fresh, never-synced entity with default business fields.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ProjectStatus::Planning,
            address: String::new(),
            tier: ProjectTier::Standard,
            due_date: None,
            budget_minor: 0,
            updated_at: Utc::now(),
            remote_document_id: None,
            sync_status: SyncStatus::NotSynced,
            last_synced_at: None,
            last_sync_error: None,
            last_synced_hash: None,
        }
    }

    /// Apply a pulled patch to the business fields, stamping `updated_at`
    /// with the remote edit time so the local clock reflects the merge.
    pub fn apply(&mut self, patch: &EntityPatch, edited_at: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(address) = &patch.address {
            self.address = address.clone();
        }
        if let Some(tier) = patch.tier {
            self.tier = tier;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(budget_minor) = patch.budget_minor {
            self.budget_minor = budget_minor;
        }
        self.updated_at = edited_at;
    }

    /// True when the business fields changed after the given sync point.
    /// A missing sync point means the entity was never synced, which
    /// counts as changed.
    #[must_use]
    pub fn changed_since(&self, sync_point: Option<DateTime<Utc>>) -> bool {
        sync_point.map_or(true, |at| self.updated_at > at)
    }
}

/// Partial update produced by mapping remote properties back to local
/// fields. Absent fields are left untouched; `due_date` uses a nested
/// option so a cleared remote date can clear the local one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub status: Option<ProjectStatus>,
    pub address: Option<String>,
    pub tier: Option<ProjectTier>,
    pub due_date: Option<Option<NaiveDate>>,
    pub budget_minor: Option<i64>,
}

impl EntityPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.status.is_none()
            && self.address.is_none()
            && self.tier.is_none()
            && self.due_date.is_none()
            && self.budget_minor.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in SyncStatus::ALL {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        for status in ProjectStatus::ALL {
            assert_eq!(ProjectStatus::parse(status.as_str()), Some(status));
        }
        for tier in ProjectTier::ALL {
            assert_eq!(ProjectTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(SyncStatus::parse("bogus"), None);
    }

    #[test]
    fn test_new_entity_defaults() {
        let entity = SyncedEntity::new("P1", "Harbor View");
        assert_eq!(entity.sync_status, SyncStatus::NotSynced);
        assert_eq!(entity.status, ProjectStatus::Planning);
        assert_eq!(entity.tier, ProjectTier::Standard);
        assert!(entity.remote_document_id.is_none());
        assert!(entity.last_synced_at.is_none());
    }

    #[test]
    fn test_apply_patch_stamps_updated_at() {
        let mut entity = SyncedEntity::new("P1", "Harbor View");
        let edited_at = Utc::now() + chrono::Duration::seconds(30);
        let patch = EntityPatch {
            status: Some(ProjectStatus::Review),
            budget_minor: Some(125_000_00),
            ..Default::default()
        };
        entity.apply(&patch, edited_at);
        assert_eq!(entity.status, ProjectStatus::Review);
        assert_eq!(entity.budget_minor, 125_000_00);
        assert_eq!(entity.updated_at, edited_at);
        // untouched fields survive
        assert_eq!(entity.name, "Harbor View");
    }

    #[test]
    fn test_apply_patch_can_clear_due_date() {
        let mut entity = SyncedEntity::new("P1", "Harbor View");
        entity.due_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        let patch = EntityPatch {
            due_date: Some(None),
            ..Default::default()
        };
        entity.apply(&patch, Utc::now());
        assert!(entity.due_date.is_none());
    }

    #[test]
    fn test_changed_since() {
        let entity = SyncedEntity::new("P1", "Harbor View");
        assert!(entity.changed_since(None));
        assert!(entity.changed_since(Some(entity.updated_at - chrono::Duration::seconds(1))));
        assert!(!entity.changed_since(Some(entity.updated_at)));
        assert!(!entity.changed_since(Some(entity.updated_at + chrono::Duration::seconds(1))));
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(EntityPatch::default().is_empty());
        let patch = EntityPatch {
            name: Some("x".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_entity_serde_round_trip() {
        let mut entity = SyncedEntity::new("P1", "Harbor View");
        entity.remote_document_id = Some("doc-9".into());
        entity.sync_status = SyncStatus::Synced;
        let json = serde_json::to_string(&entity).unwrap();
        let back: SyncedEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
    }
}
