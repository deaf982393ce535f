// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine facade.
//!
//! The [`SyncEngine`] ties every component together: the webhook
//! dispatcher feeding the task queue, the worker pool draining it
//! through the executor, the retry scheduler feeding failures back in,
//! and the reconciliation scanner sweeping for drift.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docsync_engine::{SyncEngine, SyncEngineConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), docsync_engine::EngineError> {
//! let config = SyncEngineConfig {
//!     database_url: Some("postgres://localhost/app".into()),
//!     remote_api_url: Some("https://api.provider.example".into()),
//!     remote_api_token: Some("secret-token".into()),
//!     remote_parent_id: Some("workspace-1".into()),
//!     webhook_secret: Some("whsec_abc".into()),
//!     ..Default::default()
//! };
//! let engine: Arc<SyncEngine> = SyncEngine::connect(config).await?;
//! engine.start().await;
//!
//! // hand webhook payloads and manual triggers to the engine ...
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
mod types;
mod worker;

pub use types::{EngineState, HealthReport, TriggerAck};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{ConfigError, SyncEngineConfig};
use crate::dedup::DedupCache;
use crate::executor::{ConflictLog, SyncExecutor};
use crate::mapper::{self, MapError};
use crate::queue::TaskQueue;
use crate::reconcile::{DiscrepancyReport, ReconciliationScanner};
use crate::remote::client::{DocumentApi, RemoteError};
use crate::remote::http::HttpDocumentClient;
use crate::scheduler::{BackoffPolicy, RetryScheduler};
use crate::store::sql::SqlStore;
use crate::store::traits::{RecordStore, StoreError, SyncStateStore};
use crate::webhook::WebhookDispatcher;

/// Failure to construct or connect an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The compile-time mapping table is inconsistent. Indicates a bug,
    /// not an environment problem.
    #[error("property mapping table is invalid: {0}")]
    Mapping(#[from] MapError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Webhook-driven synchronization engine for one entity type.
///
/// # Thread Safety
///
/// The engine is `Send + Sync` and meant to live in an `Arc`; every
/// public method takes `&self`. Per-entity ordering is enforced by the
/// task queue's single-flight discipline, not by callers.
pub struct SyncEngine {
    pub(super) config: SyncEngineConfig,

    pub(super) records: Arc<dyn RecordStore>,
    pub(super) state_store: Arc<dyn SyncStateStore>,

    /// Task intake shared by webhooks, triggers, scans, and retries.
    pub(super) queue: Arc<TaskQueue>,
    pub(super) scheduler: Arc<RetryScheduler>,
    pub(super) executor: Arc<SyncExecutor>,
    pub(super) dispatcher: WebhookDispatcher,
    pub(super) scanner: Arc<ReconciliationScanner>,
    pub(super) conflicts: Arc<ConflictLog>,

    /// Most recent reconciliation report, for the health endpoint.
    pub(super) latest_report: RwLock<Option<DiscrepancyReport>>,

    /// Engine state (broadcast to watchers). Background loops watch
    /// this channel and exit on `ShuttingDown`.
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Assemble an engine from injected stores and remote client.
    ///
    /// Validates the configuration and the property mapping table up
    /// front; a misconfigured engine never constructs.
    pub fn new(
        config: SyncEngineConfig,
        records: Arc<dyn RecordStore>,
        state_store: Arc<dyn SyncStateStore>,
        remote: Arc<dyn DocumentApi>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        mapper::verify_mappings()?;

        // validate() guarantees the secret is present
        let secret = config.webhook_secret.clone().unwrap_or_default();
        let dedup = DedupCache::new(
            config.dedup_max_entries,
            Duration::from_secs(config.dedup_ttl_secs),
        );

        let queue = Arc::new(TaskQueue::new());
        let scheduler = Arc::new(RetryScheduler::new(BackoffPolicy::from_config(&config)));
        let conflicts = Arc::new(ConflictLog::new(config.conflict_log_size));
        let executor = Arc::new(SyncExecutor::new(
            records.clone(),
            state_store.clone(),
            remote.clone(),
            queue.clone(),
            conflicts.clone(),
            config.remote_parent_id.clone(),
        ));
        let dispatcher = WebhookDispatcher::new(secret, dedup, records.clone());
        let scanner = Arc::new(ReconciliationScanner::new(
            records.clone(),
            state_store.clone(),
            remote.clone(),
            queue.clone(),
            config.scan_batch_size,
        ));
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);

        Ok(Self {
            config,
            records,
            state_store,
            queue,
            scheduler,
            executor,
            dispatcher,
            scanner,
            conflicts,
            latest_report: RwLock::new(None),
            state: state_tx,
            state_rx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Connect to the configured backends and assemble an engine.
    ///
    /// Convenience wrapper over [`new`](Self::new) that builds the SQL
    /// store and HTTP client from `database_url` / `remote_api_*`.
    pub async fn connect(config: SyncEngineConfig) -> Result<Arc<Self>, EngineError> {
        let database_url = config.database_url.clone().ok_or_else(|| {
            ConfigError::Invalid("database_url is required to connect".into())
        })?;
        let api_url = config.remote_api_url.clone().ok_or_else(|| {
            ConfigError::Invalid("remote_api_url is required to connect".into())
        })?;
        let api_token = config.remote_api_token.clone().ok_or_else(|| {
            ConfigError::Invalid("remote_api_token is required to connect".into())
        })?;

        let store = Arc::new(SqlStore::new(&database_url).await?);
        let remote = Arc::new(HttpDocumentClient::new(
            api_url,
            api_token,
            Duration::from_millis(config.request_timeout_ms),
        )?);
        info!("connected to record store and remote API");

        Ok(Arc::new(Self::new(config, store.clone(), store, remote)?))
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// A receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// True while webhooks and triggers are being accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::InMemoryDocumentApi;
    use crate::store::memory::MemoryRecordStore;

    fn test_config() -> SyncEngineConfig {
        SyncEngineConfig {
            webhook_secret: Some("whsec_test".into()),
            remote_parent_id: Some("workspace-1".into()),
            ..Default::default()
        }
    }

    /// Engine on in-memory backends, with direct handles to both so
    /// tests can seed rows and inject remote faults.
    pub(super) fn memory_engine(
        config: SyncEngineConfig,
    ) -> (Arc<SyncEngine>, Arc<MemoryRecordStore>, Arc<InMemoryDocumentApi>) {
        let store = Arc::new(MemoryRecordStore::new());
        let remote = Arc::new(InMemoryDocumentApi::new());
        let engine = Arc::new(
            SyncEngine::new(config, store.clone(), store.clone(), remote.clone()).unwrap(),
        );
        (engine, store, remote)
    }

    #[test]
    fn test_new_engine_is_idle() {
        let (engine, _, _) = memory_engine(test_config());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let store = Arc::new(MemoryRecordStore::new());
        let remote = Arc::new(InMemoryDocumentApi::new());
        let config = SyncEngineConfig::default(); // no webhook secret
        let err = SyncEngine::new(config, store.clone(), store, remote).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_requires_database_url() {
        let config = test_config();
        let err = SyncEngine::connect(config).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::Invalid(_))));
    }
}
