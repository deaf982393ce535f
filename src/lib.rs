//! # Docsync Engine
//!
//! A webhook-driven synchronization engine between a locally
//! authoritative record store and a remote document workspace.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Intake Layer                          │
//! │  • Webhooks: verify token → dedup → resolve entity         │
//! │  • Manual triggers (the only way out of DEAD)              │
//! │  • Reconciliation scan findings                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (SyncTask per change)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Task Queue + Worker Pool                       │
//! │  • FIFO with per-entity single flight                      │
//! │  • Fixed pool; tasks for distinct entities run in parallel │
//! │  • Retry scheduler: exponential backoff, attempt ceiling   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (PUSH / PULL execution)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Sync Executor                          │
//! │  • PUSH: map entity → skip if payload unchanged → write    │
//! │  • PULL: fetch document → conflict policy → apply patch    │
//! │  • Conflicts: strictly later edit wins; ties keep local    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                      │
//!          ▼                                      ▼
//! ┌─────────────────────┐              ┌─────────────────────────┐
//! │  Record Store (SQL) │              │  Remote Document API    │
//! │  • entity rows      │              │  • rate-limit aware     │
//! │  • sync bookkeeping │              │  • typed error split    │
//! │  • audit trail      │              │    (retryable or not)   │
//! └─────────────────────┘              └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsync_engine::{ScanScope, SyncEngine, SyncEngineConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docsync_engine::EngineError> {
//!     let config = SyncEngineConfig {
//!         database_url: Some("postgres://localhost/app".into()),
//!         remote_api_url: Some("https://api.provider.example".into()),
//!         remote_api_token: Some("secret-token".into()),
//!         remote_parent_id: Some("workspace-1".into()),
//!         webhook_secret: Some("whsec_abc".into()),
//!         ..Default::default()
//!     };
//!
//!     let engine = SyncEngine::connect(config).await?;
//!     engine.start().await;
//!
//!     // Feed it a provider webhook (transport layer's job)
//!     let payload = json!({
//!         "event_id": "evt-1",
//!         "type": "page.property_changed",
//!         "page_id": "doc-93fe",
//!     });
//!     let ack = engine.receive_webhook("notion", "whsec_abc", &payload).await;
//!     println!("ack: {ack:?}");
//!
//!     // Or push one entity by hand
//!     let ack = engine.trigger_sync("P1").await;
//!     println!("trigger: {ack:?}");
//!
//!     // Sweep for drift outside the webhook path
//!     let report = engine.run_scan(ScanScope::Full).await;
//!     println!("scan found {} discrepancies", report.discrepancies.len());
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - **Per-entity ordering**: at most one task per entity executes at a
//!   time; later tasks park and run in arrival order
//! - **Idempotent replay**: webhook deliveries are deduplicated by
//!   event id, and a push whose mapped payload matches the last synced
//!   payload skips the remote write
//! - **Every attempt ends in a transition**: SYNCED, FAILED (retry
//!   scheduled), or DEAD (audit-logged, manual re-trigger only)
//! - **Deterministic conflicts**: the strictly later edit wins; exact
//!   ties keep the local value and record the discrepancy
//!
//! ## Modules
//!
//! - [`engine`]: the [`SyncEngine`] facade tying everything together
//! - [`entity`]: the locally authoritative record and its sync lifecycle
//! - [`mapper`]: bidirectional field mapping and payload fingerprints
//! - [`webhook`]: token check, dedup, event-to-task dispatch
//! - [`executor`]: PUSH/PULL execution and conflict resolution
//! - [`queue`] / [`scheduler`]: single-flight intake and retry backoff
//! - [`reconcile`]: periodic drift scan between store and workspace
//! - [`store`]: SQL (Postgres/SQLite) and in-memory record stores
//! - [`remote`]: HTTP client for the document API, plus a test double

pub mod config;
pub mod dedup;
pub mod engine;
pub mod entity;
pub mod event;
pub mod executor;
pub mod mapper;
pub mod metrics;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod webhook;

pub use config::{ConfigError, SyncEngineConfig};
pub use engine::{EngineError, EngineState, HealthReport, SyncEngine, TriggerAck};
pub use entity::{EntityPatch, ProjectStatus, ProjectTier, SyncStatus, SyncedEntity};
pub use event::{ChangeEvent, EventType};
pub use executor::{ConflictLog, ExecOutcome, SyncExecutor};
pub use mapper::MapError;
pub use queue::{QueueStats, TaskQueue};
pub use reconcile::{Discrepancy, DiscrepancyReport, Resolution, ScanScope};
pub use remote::client::{DocumentApi, RemoteError};
pub use remote::http::HttpDocumentClient;
pub use remote::types::{Block, Document, DocumentQuery, DocumentRef, RemoteValue};
pub use scheduler::{BackoffPolicy, RetryScheduler, ScheduleOutcome};
pub use store::sql::SqlStore;
pub use store::traits::{AuditEntry, RecordStore, StoreError, SyncStateStore};
pub use task::{Direction, SyncTask, TaskReason};
pub use webhook::{WebhookAck, WebhookDispatcher, WebhookError};
