//! CheckpointStore: durable per-part completion records in SQLite.
//!
//! One pool is shared by every worker in the process. SQLite serialises
//! writers itself; when it reports the database as busy or locked the
//! operation is retried with the shared `RetryPolicy`.

use crate::{
    errors::{StoreError, StoreResult},
    models::{
        checkpoint::{CheckpointRecord, CheckpointedRange},
        part::PartDescriptor,
    },
    services::retry::RetryPolicy,
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct CheckpointStore {
    db: Arc<SqlitePool>,
    policy: RetryPolicy,
}

impl CheckpointStore {
    /// Open (creating if needed) the store at `path` and apply the schema.
    pub async fn open(path: &Path, policy: RetryPolicy) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
                info!("Created missing directory {:?}", parent);
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            db: Arc::new(db),
            policy,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            let db = &*self.db;
            self.policy
                .run("checkpoint_migrate", || async move {
                    sqlx::query(stmt).execute(db).await.map_err(StoreError::from)
                })
                .await?;
        }
        Ok(())
    }

    /// Append one completion record for `part` of `(key, bucket)`, along
    /// with the byte range it covered.
    ///
    /// Safe to call concurrently; recording the same part twice is harmless.
    pub async fn record_part_complete(
        &self,
        key: &str,
        bucket: &str,
        part: &PartDescriptor,
        etag: Option<&str>,
    ) -> StoreResult<CheckpointRecord> {
        let db = &*self.db;
        self.policy
            .run("record_part_complete", || async move {
                sqlx::query_as::<_, CheckpointRecord>(
                    r#"
                    INSERT INTO checkpoints (id, key, bucket, part, part_offset, part_length, etag)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    RETURNING id, key, bucket, part, part_offset, part_length, etag
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(key)
                .bind(bucket)
                .bind(part.part_number as i64)
                .bind(part.offset as i64)
                .bind(part.length as i64)
                .bind(etag)
                .fetch_one(db)
                .await
                .map_err(StoreError::from)
            })
            .await
    }

    /// Distinct completed part numbers for `(key, bucket)`, ascending.
    pub async fn list_completed_parts(&self, key: &str, bucket: &str) -> StoreResult<Vec<i32>> {
        let db = &*self.db;
        let parts = self
            .policy
            .run("list_completed_parts", || async move {
                sqlx::query_scalar::<_, i64>(
                    "SELECT DISTINCT part FROM checkpoints WHERE key = ? AND bucket = ? ORDER BY part",
                )
                .bind(key)
                .bind(bucket)
                .fetch_all(db)
                .await
                .map_err(StoreError::from)
            })
            .await?;
        Ok(parts.into_iter().map(|p| p as i32).collect())
    }

    /// Distinct `(part, offset, length)` triples for `(key, bucket)`, by part.
    ///
    /// The same part number may appear more than once when it was recorded
    /// under different chunk plans.
    pub async fn list_completed_ranges(
        &self,
        key: &str,
        bucket: &str,
    ) -> StoreResult<Vec<CheckpointedRange>> {
        let db = &*self.db;
        let rows = self
            .policy
            .run("list_completed_ranges", || async move {
                sqlx::query_as::<_, (i64, i64, i64)>(
                    r#"
                    SELECT DISTINCT part, part_offset, part_length FROM checkpoints
                    WHERE key = ? AND bucket = ?
                    ORDER BY part, part_offset
                    "#,
                )
                .bind(key)
                .bind(bucket)
                .fetch_all(db)
                .await
                .map_err(StoreError::from)
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|(part, offset, length)| CheckpointedRange {
                part: part as i32,
                offset: offset as u64,
                length: length as u64,
            })
            .collect())
    }

    /// Remove every record for `(key, bucket)`. Returns how many rows went.
    pub async fn clear_completed_parts(&self, key: &str, bucket: &str) -> StoreResult<u64> {
        let db = &*self.db;
        let result = self
            .policy
            .run("clear_completed_parts", || async move {
                sqlx::query("DELETE FROM checkpoints WHERE key = ? AND bucket = ?")
                    .bind(key)
                    .bind(bucket)
                    .execute(db)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
