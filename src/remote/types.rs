//! Wire types for the remote document workspace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed remote property value.
///
/// The provider models every property as a tagged value object. `Empty`
/// is a property that exists on the document but currently holds
/// nothing (a cleared date, for instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RemoteValue {
    Text(String),
    Select(String),
    /// ISO-8601 calendar date, `YYYY-MM-DD`.
    Date(String),
    Number(f64),
    Empty,
}

impl RemoteValue {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteValue::Text(_) => "text",
            RemoteValue::Select(_) => "select",
            RemoteValue::Date(_) => "date",
            RemoteValue::Number(_) => "number",
            RemoteValue::Empty => "empty",
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, RemoteValue::Empty)
    }
}

/// Lightweight handle to a remote document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// A fully retrieved remote document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// The provider's edit clock; drives conflict resolution.
    pub last_edited_at: DateTime<Utc>,
    /// Soft-deleted on the provider side. Archived documents cannot be
    /// written to and are treated as gone.
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, RemoteValue>,
}

/// One content block inside a document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub has_children: bool,
}

/// Search filter for locating documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl DocumentQuery {
    #[must_use]
    pub fn by_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            parent_id: None,
        }
    }

    #[must_use]
    pub fn in_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}
