//! In-memory implementation of [`DocumentApi`] for tests and local
//! development.
//!
//! Behaves like the real provider well enough to exercise the engine:
//! documents carry edit timestamps, updates bump them, and a fault
//! queue lets tests inject classified failures one call at a time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::client::{DocumentApi, RemoteError};
use super::types::{Block, Document, DocumentQuery, DocumentRef, RemoteValue};

/// Fake document workspace backed by a [`DashMap`].
#[derive(Default)]
pub struct InMemoryDocumentApi {
    docs: DashMap<String, Document>,
    blocks: DashMap<String, Vec<Block>>,
    faults: Mutex<VecDeque<RemoteError>>,
    latency: Mutex<Option<std::time::Duration>>,
    next_id: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
}

impl InMemoryDocumentApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error; the next API call (any operation) returns it
    /// instead of executing.
    pub fn inject_fault(&self, error: RemoteError) {
        self.faults.lock().push_back(error);
    }

    /// Queue `n` copies of the same error.
    pub fn inject_faults(&self, n: usize, error: &RemoteError) {
        let mut faults = self.faults.lock();
        for _ in 0..n {
            faults.push_back(error.clone());
        }
    }

    /// Faults queued but not yet consumed. Each failed attempt consumes
    /// exactly one, which makes attempt counts observable.
    #[must_use]
    pub fn faults_remaining(&self) -> usize {
        self.faults.lock().len()
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn take_fault(&self) -> Option<RemoteError> {
        self.faults.lock().pop_front()
    }

    /// Add a fixed delay to every call, for tests that need an
    /// observable in-progress window.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock() = Some(latency);
    }

    async fn simulate_latency(&self) {
        let delay = *self.latency.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Seed or replace a document wholesale, timestamps included.
    pub fn insert_document(&self, doc: Document) {
        self.docs.insert(doc.id.clone(), doc);
    }

    #[must_use]
    pub fn document(&self, id: &str) -> Option<Document> {
        self.docs.get(id).map(|d| d.clone())
    }

    pub fn set_child_blocks(&self, id: &str, blocks: Vec<Block>) {
        self.blocks.insert(id.to_string(), blocks);
    }

    /// Remote writes observed, split by kind. The idempotence tests
    /// assert these stay flat when payloads have not changed.
    #[must_use]
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl DocumentApi for InMemoryDocumentApi {
    async fn find_document(
        &self,
        query: &DocumentQuery,
    ) -> Result<Option<DocumentRef>, RemoteError> {
        self.simulate_latency().await;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let mut matches: Vec<DocumentRef> = self
            .docs
            .iter()
            .filter(|entry| {
                let doc = entry.value();
                let title_ok = query.title.as_deref().map_or(true, |title| {
                    doc.properties.get("Name") == Some(&RemoteValue::Text(title.to_string()))
                });
                let parent_ok = query
                    .parent_id
                    .as_deref()
                    .map_or(true, |p| doc.parent_id.as_deref() == Some(p));
                title_ok && parent_ok && !doc.archived
            })
            .map(|entry| DocumentRef {
                id: entry.value().id.clone(),
                parent_id: entry.value().parent_id.clone(),
            })
            .collect();
        // DashMap iteration order is arbitrary; sort for determinism
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.into_iter().next())
    }

    async fn get_document(&self, id: &str) -> Result<Document, RemoteError> {
        self.simulate_latency().await;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        self.docs
            .get(id)
            .map(|d| d.clone())
            .ok_or(RemoteError::NotFound)
    }

    async fn create_document(
        &self,
        parent_id: &str,
        properties: &BTreeMap<String, RemoteValue>,
    ) -> Result<DocumentRef, RemoteError> {
        self.simulate_latency().await;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let now = Utc::now();
        let doc = Document {
            id: id.clone(),
            parent_id: Some(parent_id.to_string()),
            created_at: now,
            last_edited_at: now,
            archived: false,
            properties: properties.clone(),
        };
        self.docs.insert(id.clone(), doc);
        self.creates.fetch_add(1, Ordering::Relaxed);
        Ok(DocumentRef { id, parent_id: Some(parent_id.to_string()) })
    }

    async fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, RemoteValue>,
    ) -> Result<(), RemoteError> {
        self.simulate_latency().await;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let Some(mut doc) = self.docs.get_mut(id) else {
            return Err(RemoteError::NotFound);
        };
        if doc.archived {
            return Err(RemoteError::Permanent {
                status: 400,
                message: "cannot update an archived document".into(),
            });
        }
        for (name, value) in properties {
            doc.properties.insert(name.clone(), value.clone());
        }
        doc.last_edited_at = Utc::now();
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list_child_blocks(&self, id: &str) -> Result<Vec<Block>, RemoteError> {
        self.simulate_latency().await;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        if !self.docs.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        Ok(self.blocks.get(id).map(|b| b.clone()).unwrap_or_default())
    }
}
