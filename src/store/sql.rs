// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL implementation of [`RecordStore`] and [`SyncStateStore`].
//!
//! Uses `sqlx::Any`, so the same code runs against Postgres in
//! production and SQLite in tests. Timestamps are stored as unix
//! milliseconds (BIGINT) and dates as ISO text, which keeps the column
//! types portable across both dialects.
//!
//! Every sync-status write is a single `UPDATE`; there is no
//! read-modify-write on the bookkeeping columns.

use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info, warn};

use crate::entity::{EntityPatch, SyncStatus, SyncedEntity};
use crate::store::traits::{AuditEntry, RecordStore, StoreError, SyncStateStore};

static DRIVERS: Once = Once::new();

fn ensure_drivers() {
    DRIVERS.call_once(sqlx::any::install_default_drivers);
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQL-backed store. Cheap to clone; the pool is shared.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Connect and ensure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        ensure_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("sql store ready");
        Ok(store)
    }

    /// Idempotent schema setup.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS synced_entities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                address TEXT NOT NULL,
                tier TEXT NOT NULL,
                due_date TEXT,
                budget_minor BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                remote_document_id TEXT,
                sync_status TEXT NOT NULL,
                last_synced_at BIGINT,
                last_sync_error TEXT,
                last_synced_hash TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entities_remote_id
             ON synced_entities (remote_document_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entities_sync_status
             ON synced_entities (sync_status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_audit (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                occurred_at BIGINT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_occurred_at
             ON sync_audit (occurred_at)",
        )
        .execute(&self.pool)
        .await?;
        debug!("schema initialized");
        Ok(())
    }

    fn millis_to_datetime(entity_id: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
        DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corruption {
            entity_id: entity_id.to_string(),
            detail: format!("timestamp {millis} out of range"),
        })
    }

    fn row_to_entity(row: &AnyRow) -> Result<SyncedEntity, StoreError> {
        let id: String = row.try_get("id")?;

        let status_tag: String = row.try_get("status")?;
        let status = crate::entity::ProjectStatus::parse(&status_tag).ok_or_else(|| {
            StoreError::Corruption {
                entity_id: id.clone(),
                detail: format!("unknown status tag '{status_tag}'"),
            }
        })?;

        let tier_tag: String = row.try_get("tier")?;
        let tier = crate::entity::ProjectTier::parse(&tier_tag).ok_or_else(|| {
            StoreError::Corruption {
                entity_id: id.clone(),
                detail: format!("unknown tier tag '{tier_tag}'"),
            }
        })?;

        let sync_tag: String = row.try_get("sync_status")?;
        let sync_status = SyncStatus::parse(&sync_tag).ok_or_else(|| StoreError::Corruption {
            entity_id: id.clone(),
            detail: format!("unknown sync_status tag '{sync_tag}'"),
        })?;

        let due_date = row
            .try_get::<Option<String>, _>("due_date")?
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|_| StoreError::Corruption {
                    entity_id: id.clone(),
                    detail: format!("bad due_date '{raw}'"),
                })
            })
            .transpose()?;

        let updated_at = Self::millis_to_datetime(&id, row.try_get("updated_at")?)?;
        let last_synced_at = row
            .try_get::<Option<i64>, _>("last_synced_at")?
            .map(|ms| Self::millis_to_datetime(&id, ms))
            .transpose()?;

        Ok(SyncedEntity {
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            budget_minor: row.try_get("budget_minor")?,
            remote_document_id: row.try_get("remote_document_id")?,
            last_sync_error: row.try_get("last_sync_error")?,
            last_synced_hash: row.try_get("last_synced_hash")?,
            id,
            status,
            tier,
            due_date,
            updated_at,
            sync_status,
            last_synced_at,
        })
    }

    fn row_to_audit(row: &AnyRow) -> Result<AuditEntry, StoreError> {
        let id: String = row.try_get("id")?;
        let occurred_at = Self::millis_to_datetime(&id, row.try_get("occurred_at")?)?;
        Ok(AuditEntry {
            entity_id: row.try_get("entity_id")?,
            kind: row.try_get("kind")?,
            detail: row.try_get("detail")?,
            id,
            occurred_at,
        })
    }

    /// UPDATE one row, mapping "no row matched" to `NotFound`.
    async fn update_one<'a>(
        &self,
        query: sqlx::query::Query<'a, sqlx::Any, sqlx::any::AnyArguments<'a>>,
    ) -> Result<(), StoreError> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqlStore {
    async fn get(&self, entity_id: &str) -> Result<Option<SyncedEntity>, StoreError> {
        let row = sqlx::query("SELECT * FROM synced_entities WHERE id = $1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn put(&self, entity: &SyncedEntity) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO synced_entities (
                id, name, status, address, tier, due_date, budget_minor,
                updated_at, remote_document_id, sync_status, last_synced_at,
                last_sync_error, last_synced_hash
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                address = excluded.address,
                tier = excluded.tier,
                due_date = excluded.due_date,
                budget_minor = excluded.budget_minor,
                updated_at = excluded.updated_at,
                remote_document_id = excluded.remote_document_id,
                sync_status = excluded.sync_status,
                last_synced_at = excluded.last_synced_at,
                last_sync_error = excluded.last_sync_error,
                last_synced_hash = excluded.last_synced_hash",
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(entity.status.as_str())
        .bind(&entity.address)
        .bind(entity.tier.as_str())
        .bind(entity.due_date.map(|d| d.format(DATE_FORMAT).to_string()))
        .bind(entity.budget_minor)
        .bind(entity.updated_at.timestamp_millis())
        .bind(entity.remote_document_id.as_deref())
        .bind(entity.sync_status.as_str())
        .bind(entity.last_synced_at.map(|at| at.timestamp_millis()))
        .bind(entity.last_sync_error.as_deref())
        .bind(entity.last_synced_hash.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_patch(
        &self,
        entity_id: &str,
        patch: &EntityPatch,
        edited_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // safe as RMW: the executor holds the entity's single-flight lock
        let Some(mut entity) = self.get(entity_id).await? else {
            return Err(StoreError::NotFound);
        };
        entity.apply(patch, edited_at);
        self.put(&entity).await
    }

    async fn find_by_remote_id(
        &self,
        remote_document_id: &str,
    ) -> Result<Option<SyncedEntity>, StoreError> {
        let row = sqlx::query("SELECT * FROM synced_entities WHERE remote_document_id = $1")
            .bind(remote_document_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn list_linked(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SyncedEntity>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM synced_entities
             WHERE remote_document_id IS NOT NULL
             ORDER BY id
             LIMIT $1 OFFSET $2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entity).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(SyncStatus, u64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT sync_status, COUNT(*) AS n FROM synced_entities GROUP BY sync_status",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let tag: String = row.try_get("sync_status")?;
            let n: i64 = row.try_get("n")?;
            match SyncStatus::parse(&tag) {
                Some(status) => counts.push((status, n.max(0) as u64)),
                // tolerate rows poked by hand; counting must not fail health
                None => warn!(tag, "skipping rows with unknown sync_status tag"),
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for SqlStore {
    async fn mark_pending(&self, entity_id: &str) -> Result<(), StoreError> {
        self.update_one(
            sqlx::query("UPDATE synced_entities SET sync_status = $1 WHERE id = $2")
                .bind(SyncStatus::Pending.as_str())
                .bind(entity_id),
        )
        .await
    }

    async fn mark_synced(
        &self,
        entity_id: &str,
        remote_document_id: Option<&str>,
        at: DateTime<Utc>,
        payload_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        // the first COALESCE keeps an existing link (the column is
        // set-once); the second keeps the stored hash when the sync
        // made no remote write
        self.update_one(
            sqlx::query(
                "UPDATE synced_entities SET
                    sync_status = $1,
                    last_synced_at = $2,
                    last_sync_error = NULL,
                    last_synced_hash = COALESCE($3, last_synced_hash),
                    remote_document_id = COALESCE(remote_document_id, $4)
                 WHERE id = $5",
            )
            .bind(SyncStatus::Synced.as_str())
            .bind(at.timestamp_millis())
            .bind(payload_hash)
            .bind(remote_document_id)
            .bind(entity_id),
        )
        .await
    }

    async fn mark_failed(&self, entity_id: &str, error: &str) -> Result<(), StoreError> {
        self.update_one(
            sqlx::query(
                "UPDATE synced_entities SET sync_status = $1, last_sync_error = $2 WHERE id = $3",
            )
            .bind(SyncStatus::Failed.as_str())
            .bind(error)
            .bind(entity_id),
        )
        .await
    }

    async fn mark_dead(&self, entity_id: &str, error: &str) -> Result<(), StoreError> {
        self.update_one(
            sqlx::query(
                "UPDATE synced_entities SET sync_status = $1, last_sync_error = $2 WHERE id = $3",
            )
            .bind(SyncStatus::Dead.as_str())
            .bind(error)
            .bind(entity_id),
        )
        .await
    }

    async fn get_status(&self, entity_id: &str) -> Result<SyncStatus, StoreError> {
        let row = sqlx::query("SELECT sync_status FROM synced_entities WHERE id = $1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        let tag: String = row.try_get("sync_status")?;
        SyncStatus::parse(&tag).ok_or_else(|| StoreError::Corruption {
            entity_id: entity_id.to_string(),
            detail: format!("unknown sync_status tag '{tag}'"),
        })
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_audit (id, entity_id, occurred_at, kind, detail)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.id)
        .bind(&entry.entity_id)
        .bind(entry.occurred_at.timestamp_millis())
        .bind(&entry.kind)
        .bind(&entry.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        // id breaks same-millisecond ties; occurred_at alone would leave
        // the order up to the backend
        let rows = sqlx::query(
            "SELECT * FROM sync_audit ORDER BY occurred_at DESC, id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_audit).collect()
    }
}
