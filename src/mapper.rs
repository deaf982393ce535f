// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-way translation between local entity fields and remote document
//! properties.
//!
//! The mapping table is closed: every mapped field appears exactly once
//! in [`MAPPINGS`], and [`verify_mappings`] confirms that at startup.
//! Pushing ignores local fields with no mapping; pulling ignores remote
//! properties with no mapping. Neither direction performs I/O.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::entity::{EntityPatch, ProjectStatus, ProjectTier, SyncedEntity};
use crate::remote::types::RemoteValue;

/// Closed identifier set for mapped fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    Name,
    Status,
    Address,
    Tier,
    DueDate,
    Budget,
}

impl FieldId {
    pub const ALL: [FieldId; 6] = [
        FieldId::Name,
        FieldId::Status,
        FieldId::Address,
        FieldId::Tier,
        FieldId::DueDate,
        FieldId::Budget,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::Name => "name",
            FieldId::Status => "status",
            FieldId::Address => "address",
            FieldId::Tier => "tier",
            FieldId::DueDate => "due_date",
            FieldId::Budget => "budget",
        }
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remote value kind a field translates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Select,
    Date,
    Number,
}

/// One row of the field mapping table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub field: FieldId,
    /// Property name on the remote document.
    pub remote_name: &'static str,
    pub kind: FieldKind,
}

/// The complete mapping table. Order here fixes the order of mapped
/// payloads and diff output.
pub const MAPPINGS: &[FieldMapping] = &[
    FieldMapping { field: FieldId::Name, remote_name: "Name", kind: FieldKind::Text },
    FieldMapping { field: FieldId::Status, remote_name: "Status", kind: FieldKind::Select },
    FieldMapping { field: FieldId::Address, remote_name: "Address", kind: FieldKind::Text },
    FieldMapping { field: FieldId::Tier, remote_name: "Tier", kind: FieldKind::Select },
    FieldMapping { field: FieldId::DueDate, remote_name: "Due Date", kind: FieldKind::Date },
    FieldMapping { field: FieldId::Budget, remote_name: "Budget", kind: FieldKind::Number },
];

/// Failure translating remote values to local fields, or a defect in
/// the mapping table itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("unknown {field} option '{value}'")]
    UnknownOption { field: &'static str, value: String },

    #[error("property '{property}' expected a {expected} value, got {actual}")]
    KindMismatch {
        property: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid date '{value}' for {field}: expected YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },

    #[error("non-finite number for {field}")]
    NonFiniteNumber { field: &'static str },

    #[error("field '{0}' is mapped more than once")]
    DuplicateMapping(&'static str),

    #[error("field '{0}' has no mapping")]
    MissingMapping(&'static str),
}

/// Confirm the mapping table covers every field exactly once.
///
/// Run at engine construction; a broken table is a deploy-time defect,
/// not a per-task one.
pub fn verify_mappings() -> Result<(), MapError> {
    for field in FieldId::ALL {
        let count = MAPPINGS.iter().filter(|m| m.field == field).count();
        if count == 0 {
            return Err(MapError::MissingMapping(field.as_str()));
        }
        if count > 1 {
            return Err(MapError::DuplicateMapping(field.as_str()));
        }
    }
    Ok(())
}

fn status_label(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Planning => "Planning",
        ProjectStatus::InProgress => "In Progress",
        ProjectStatus::Review => "Review",
        ProjectStatus::Delivered => "Delivered",
    }
}

fn status_from_label(label: &str) -> Option<ProjectStatus> {
    match label {
        "Planning" => Some(ProjectStatus::Planning),
        "In Progress" => Some(ProjectStatus::InProgress),
        "Review" => Some(ProjectStatus::Review),
        "Delivered" => Some(ProjectStatus::Delivered),
        _ => None,
    }
}

fn tier_label(tier: ProjectTier) -> &'static str {
    match tier {
        ProjectTier::Standard => "Standard",
        ProjectTier::Premium => "Premium",
        ProjectTier::Enterprise => "Enterprise",
    }
}

fn tier_from_label(label: &str) -> Option<ProjectTier> {
    match label {
        "Standard" => Some(ProjectTier::Standard),
        "Premium" => Some(ProjectTier::Premium),
        "Enterprise" => Some(ProjectTier::Enterprise),
        _ => None,
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Budgets are stored in minor units locally and exposed as major
/// units remotely. Exact for any realistic budget (f64 is lossless up
/// to 2^53 minor units).
fn budget_to_major(minor: i64) -> f64 {
    minor as f64 / 100.0
}

fn budget_to_minor(major: f64) -> Result<i64, MapError> {
    if !major.is_finite() {
        return Err(MapError::NonFiniteNumber { field: "budget" });
    }
    Ok((major * 100.0).round() as i64)
}

/// Map an entity's business fields to a remote property payload.
///
/// Total: every entity state has a remote rendering. A missing due date
/// becomes an explicit [`RemoteValue::Empty`] so pushes can clear the
/// remote date rather than silently leaving it behind.
#[must_use]
pub fn to_remote_properties(entity: &SyncedEntity) -> BTreeMap<String, RemoteValue> {
    let mut properties = BTreeMap::new();
    for mapping in MAPPINGS {
        let value = match mapping.field {
            FieldId::Name => RemoteValue::Text(entity.name.clone()),
            FieldId::Status => RemoteValue::Select(status_label(entity.status).to_string()),
            FieldId::Address => RemoteValue::Text(entity.address.clone()),
            FieldId::Tier => RemoteValue::Select(tier_label(entity.tier).to_string()),
            FieldId::DueDate => match entity.due_date {
                Some(date) => RemoteValue::Date(date.format(DATE_FORMAT).to_string()),
                None => RemoteValue::Empty,
            },
            FieldId::Budget => RemoteValue::Number(budget_to_major(entity.budget_minor)),
        };
        properties.insert(mapping.remote_name.to_string(), value);
    }
    properties
}

fn kind_mismatch(mapping: &FieldMapping, value: &RemoteValue) -> MapError {
    let expected = match mapping.kind {
        FieldKind::Text => "text",
        FieldKind::Select => "select",
        FieldKind::Date => "date",
        FieldKind::Number => "number",
    };
    MapError::KindMismatch {
        property: mapping.remote_name.to_string(),
        expected,
        actual: value.kind(),
    }
}

/// Map remote properties to a local patch.
///
/// Properties without a mapping are ignored. A property that is present
/// but [`RemoteValue::Empty`] contributes nothing, except the due date,
/// where empty means "cleared". Unknown select options and malformed
/// dates are validation failures the caller must not retry.
pub fn from_remote_properties(
    properties: &BTreeMap<String, RemoteValue>,
) -> Result<EntityPatch, MapError> {
    let mut patch = EntityPatch::default();
    for mapping in MAPPINGS {
        let Some(value) = properties.get(mapping.remote_name) else {
            continue;
        };
        match (mapping.field, value) {
            (FieldId::Name, RemoteValue::Text(text)) => patch.name = Some(text.clone()),
            (FieldId::Address, RemoteValue::Text(text)) => patch.address = Some(text.clone()),
            (FieldId::Status, RemoteValue::Select(label)) => {
                patch.status = Some(status_from_label(label).ok_or_else(|| {
                    MapError::UnknownOption { field: "status", value: label.clone() }
                })?);
            }
            (FieldId::Tier, RemoteValue::Select(label)) => {
                patch.tier = Some(tier_from_label(label).ok_or_else(|| {
                    MapError::UnknownOption { field: "tier", value: label.clone() }
                })?);
            }
            (FieldId::DueDate, RemoteValue::Date(raw)) => {
                let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
                    MapError::InvalidDate { field: "due_date", value: raw.clone() }
                })?;
                patch.due_date = Some(Some(date));
            }
            (FieldId::DueDate, RemoteValue::Empty) => patch.due_date = Some(None),
            (FieldId::Budget, RemoteValue::Number(major)) => {
                patch.budget_minor = Some(budget_to_minor(*major)?);
            }
            // other empties carry no information
            (_, RemoteValue::Empty) => {}
            (_, other) => return Err(kind_mismatch(mapping, other)),
        }
    }
    Ok(patch)
}

/// Hex SHA-256 over the canonical JSON form of a mapped payload.
///
/// `BTreeMap` ordering makes the digest independent of insertion order,
/// so equal payloads always produce equal fingerprints.
#[must_use]
pub fn payload_fingerprint(properties: &BTreeMap<String, RemoteValue>) -> String {
    let bytes = serde_json::to_vec(properties).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Field-level differences between two mapped payloads, restricted to
/// mapped property names. Returns `(property, local, remote)` for each
/// mismatch, in mapping-table order.
#[must_use]
pub fn diff_properties(
    local: &BTreeMap<String, RemoteValue>,
    remote: &BTreeMap<String, RemoteValue>,
) -> Vec<(String, Option<RemoteValue>, Option<RemoteValue>)> {
    let mut diffs = Vec::new();
    for mapping in MAPPINGS {
        let local_value = local.get(mapping.remote_name);
        let remote_value = remote.get(mapping.remote_name);
        // a mapped property the remote never materialized is the same
        // thing as an explicitly empty one
        let effective_local = local_value.filter(|v| !v.is_empty());
        let effective_remote = remote_value.filter(|v| !v.is_empty());
        if effective_local != effective_remote {
            diffs.push((
                mapping.remote_name.to_string(),
                local_value.cloned(),
                remote_value.cloned(),
            ));
        }
    }
    diffs
}
