//! Remote document API abstraction.
//!
//! Implementations classify failures but never retry; retry policy
//! belongs to the scheduler. All calls are bounded by the configured
//! request timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Block, Document, DocumentQuery, DocumentRef, RemoteValue};

/// Classified failure from the remote document API.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The provider throttled the call. `retry_after` is the provider's
    /// own hint, when it sent one.
    #[error("rate limited by remote API")]
    RateLimited { retry_after: Option<Duration> },

    /// Network trouble, timeout, or a 5xx. Worth retrying.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The document does not exist (or is gone).
    #[error("remote document not found")]
    NotFound,

    /// A 4xx the engine cannot fix by retrying.
    #[error("permanent remote failure (status {status}): {message}")]
    Permanent { status: u16, message: String },
}

impl RemoteError {
    /// True when the scheduler should re-attempt the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. } | RemoteError::Transient(_)
        )
    }
}

/// Typed surface of the remote document workspace.
///
/// Backed by HTTP in production ([`HttpDocumentClient`]) and by an
/// in-memory fake in tests ([`InMemoryDocumentApi`]).
///
/// [`HttpDocumentClient`]: super::http::HttpDocumentClient
/// [`InMemoryDocumentApi`]: super::memory::InMemoryDocumentApi
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Search for a document. Returns the first match, if any.
    async fn find_document(
        &self,
        query: &DocumentQuery,
    ) -> Result<Option<DocumentRef>, RemoteError>;

    /// Retrieve a document with its properties.
    async fn get_document(&self, id: &str) -> Result<Document, RemoteError>;

    /// Create a document under `parent_id` with the given properties.
    async fn create_document(
        &self,
        parent_id: &str,
        properties: &BTreeMap<String, RemoteValue>,
    ) -> Result<DocumentRef, RemoteError>;

    /// Overwrite the given properties on an existing document.
    /// Properties not named are left alone.
    async fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, RemoteValue>,
    ) -> Result<(), RemoteError>;

    /// List the direct child blocks of a document body.
    async fn list_child_blocks(&self, id: &str) -> Result<Vec<Block>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::RateLimited { retry_after: None }.is_retryable());
        assert!(RemoteError::Transient("timeout".into()).is_retryable());
        assert!(!RemoteError::NotFound.is_retryable());
        assert!(!RemoteError::Permanent { status: 400, message: "bad".into() }.is_retryable());
    }

    #[test]
    fn test_error_messages_are_useful() {
        let err = RemoteError::Permanent { status: 403, message: "token revoked".into() };
        assert_eq!(
            err.to_string(),
            "permanent remote failure (status 403): token revoked"
        );
    }
}
