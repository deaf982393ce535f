//! Incoming change events from the remote document provider.
//!
//! Events are ephemeral: they trigger pull tasks but are never stored.
//! Parsing is deliberately lenient about everything except `event_id`
//! and `type`, because providers ship pings and experimental event
//! kinds that still deserve an acknowledgement.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Kind of change the provider reported. Unrecognized kinds are
/// preserved verbatim so they can be logged before being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EventType {
    Created,
    Updated,
    PropertyChanged,
    Unknown(String),
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "page.created" => EventType::Created,
            "page.updated" => EventType::Updated,
            "page.property_changed" => EventType::PropertyChanged,
            _ => EventType::Unknown(raw),
        }
    }
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Created => "page.created",
            EventType::Updated => "page.updated",
            EventType::PropertyChanged => "page.property_changed",
            EventType::Unknown(raw) => raw,
        }
    }

    /// True for event kinds that should produce a pull task.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !matches!(self, EventType::Unknown(_))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One parsed provider notification.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    /// Provider-assigned id, used for delivery deduplication.
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Remote document the event concerns. Empty for pings.
    #[serde(default, rename = "page_id", alias = "document_id")]
    pub remote_document_id: String,
    /// When the provider says the change happened. Advisory only; the
    /// executor re-reads the document and trusts its edit time instead.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    /// Raw property values the provider attached. Advisory for the same
    /// reason, so they are kept unmapped.
    #[serde(default, rename = "properties")]
    pub updated_properties: BTreeMap<String, Value>,
}

impl ChangeEvent {
    /// Parse a raw webhook body.
    pub fn parse(payload: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}
