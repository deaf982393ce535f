//! Configuration for the sync engine.
//!
//! All tuning knobs have defaults; connection settings do not. The
//! webhook secret is deliberately non-optional at validation time, so
//! an engine can never come up accepting unauthenticated events.
//!
//! # Example
//!
//! ```
//! use docsync_engine::SyncEngineConfig;
//!
//! let config = SyncEngineConfig {
//!     webhook_secret: Some("whsec_local".into()),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.worker_count, 4);
//! ```

use serde::Deserialize;
use thiserror::Error;

/// Raised when a configuration cannot produce a working engine.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The engine refuses to start without a webhook secret.
    #[error("webhook_secret is not set; unauthenticated webhook intake is not supported")]
    MissingWebhookSecret,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEngineConfig {
    /// Record store connection string (Postgres in production,
    /// `sqlite://...` in tests). Only required by [`connect`].
    ///
    /// [`connect`]: crate::engine::SyncEngine::connect
    #[serde(default)]
    pub database_url: Option<String>,

    /// Base URL of the remote document API.
    #[serde(default)]
    pub remote_api_url: Option<String>,

    /// Bearer token for the remote document API.
    #[serde(default)]
    pub remote_api_token: Option<String>,

    /// Container that newly created documents are filed under.
    /// Pushes for unlinked entities fail without it.
    #[serde(default)]
    pub remote_parent_id: Option<String>,

    /// Shared secret presented by the webhook provider. Mandatory.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Per-call timeout for remote API requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Number of concurrent sync workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// First retry delay; doubles on each subsequent attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound on any single retry delay.
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,

    /// Jitter applied to retry delays, as a fraction of the delay.
    /// 0.2 means each delay lands within +/- 20% of nominal.
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// Attempt ceiling. An entity whose task has failed this many times
    /// moves to the dead letter state.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Capacity of the webhook event-id dedup cache.
    #[serde(default = "default_dedup_max_entries")]
    pub dedup_max_entries: usize,

    /// How long a seen event id suppresses redeliveries.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// Period of the background reconciliation scan. 0 disables it;
    /// on-demand scans still work.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Entities fetched per page during a scan.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// How many unresolved conflicts the in-memory log retains.
    #[serde(default = "default_conflict_log_size")]
    pub conflict_log_size: usize,
}

fn default_request_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

fn default_worker_count() -> usize {
    4
}

fn default_retry_base_ms() -> u64 {
    2_000 // 2 seconds
}

fn default_retry_cap_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_retry_jitter() -> f64 {
    0.2
}

fn default_max_attempts() -> u32 {
    6
}

fn default_dedup_max_entries() -> usize {
    4096
}

fn default_dedup_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_scan_interval_secs() -> u64 {
    3_600 // 1 hour
}

fn default_scan_batch_size() -> usize {
    50
}

fn default_conflict_log_size() -> usize {
    256
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            remote_api_url: None,
            remote_api_token: None,
            remote_parent_id: None,
            webhook_secret: None,
            request_timeout_ms: default_request_timeout_ms(),
            worker_count: default_worker_count(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            retry_jitter: default_retry_jitter(),
            max_attempts: default_max_attempts(),
            dedup_max_entries: default_dedup_max_entries(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            scan_batch_size: default_scan_batch_size(),
            conflict_log_size: default_conflict_log_size(),
        }
    }
}

impl SyncEngineConfig {
    /// Check internal consistency. Called by the engine constructor, so
    /// a bad config fails before any I/O happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingWebhookSecret);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.retry_base_ms == 0 {
            return Err(ConfigError::Invalid("retry_base_ms must be non-zero".into()));
        }
        if self.retry_cap_ms < self.retry_base_ms {
            return Err(ConfigError::Invalid(
                "retry_cap_ms must be >= retry_base_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigError::Invalid(
                "retry_jitter must be between 0.0 and 1.0".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be non-zero".into()));
        }
        if self.scan_batch_size == 0 {
            return Err(ConfigError::Invalid("scan_batch_size must be at least 1".into()));
        }
        if self.dedup_max_entries == 0 {
            return Err(ConfigError::Invalid(
                "dedup_max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
