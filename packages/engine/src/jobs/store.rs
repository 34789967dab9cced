//! Durable storage for job records.
//!
//! The `JobStore` trait abstracts persistence so the engine can run
//! against Postgres in production and an in-memory store in tests.
//! Updates carry an optimistic version check: a write against a stale
//! version fails with `StoreError::VersionConflict` and the caller
//! re-reads before deciding what to do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::record::{JobKind, JobRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no job record for owner {owner_ref} kind {kind}")]
    NotFound { owner_ref: Uuid, kind: JobKind },

    #[error("stale version {expected} for job record {id}")]
    VersionConflict { id: Uuid, expected: i32 },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load the record for an owner/kind pair, if any.
    async fn get(&self, owner_ref: Uuid, kind: JobKind) -> Result<Option<JobRecord>, StoreError>;

    /// Insert or replace the record for its `(owner_ref, kind)` pair.
    /// Returns the stored record with its current version.
    async fn upsert(&self, record: JobRecord) -> Result<JobRecord, StoreError>;

    /// Write back a loaded record. Fails with `VersionConflict` when the
    /// stored version no longer matches `record.version`.
    async fn update(&self, record: &JobRecord) -> Result<JobRecord, StoreError>;

    /// Active records (Pending/Processing) started at or after the cutoff.
    async fn find_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

const COLUMNS: &str = "id, owner_ref, kind, external_job_id, runtime_task_id, status, progress, \
                       message, error, artifacts, started_at, completed_at, poll_attempts, \
                       transient_retry_attempts, version, created_at, updated_at";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, owner_ref: Uuid, kind: JobKind) -> Result<Option<JobRecord>, StoreError> {
        let record = sqlx::query_as::<_, JobRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM generation_jobs
            WHERE owner_ref = $1 AND kind = $2
            LIMIT 1
            "#,
        ))
        .bind(owner_ref)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert(&self, record: JobRecord) -> Result<JobRecord, StoreError> {
        let stored = sqlx::query_as::<_, JobRecord>(&format!(
            r#"
            INSERT INTO generation_jobs (
                id, owner_ref, kind, external_job_id, runtime_task_id, status, progress,
                message, error, artifacts, started_at, completed_at, poll_attempts,
                transient_retry_attempts, version, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17
            )
            ON CONFLICT (owner_ref, kind) DO UPDATE SET
                external_job_id = EXCLUDED.external_job_id,
                runtime_task_id = EXCLUDED.runtime_task_id,
                status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                message = EXCLUDED.message,
                error = EXCLUDED.error,
                artifacts = EXCLUDED.artifacts,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                poll_attempts = EXCLUDED.poll_attempts,
                transient_retry_attempts = EXCLUDED.transient_retry_attempts,
                version = generation_jobs.version + 1,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(record.id)
        .bind(record.owner_ref)
        .bind(record.kind)
        .bind(&record.external_job_id)
        .bind(&record.runtime_task_id)
        .bind(record.status)
        .bind(record.progress)
        .bind(&record.message)
        .bind(&record.error)
        .bind(&record.artifacts)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.poll_attempts)
        .bind(record.transient_retry_attempts)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn update(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let updated = sqlx::query_as::<_, JobRecord>(&format!(
            r#"
            UPDATE generation_jobs SET
                external_job_id = $1, runtime_task_id = $2, status = $3, progress = $4,
                message = $5, error = $6, artifacts = $7, started_at = $8, completed_at = $9,
                poll_attempts = $10, transient_retry_attempts = $11,
                version = version + 1, updated_at = NOW()
            WHERE id = $12 AND version = $13
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(&record.external_job_id)
        .bind(&record.runtime_task_id)
        .bind(record.status)
        .bind(record.progress)
        .bind(&record.message)
        .bind(&record.error)
        .bind(&record.artifacts)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.poll_attempts)
        .bind(record.transient_retry_attempts)
        .bind(record.id)
        .bind(record.version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(stored) => Ok(stored),
            None => {
                // Row missing entirely vs. version mismatch.
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM generation_jobs WHERE id = $1",
                )
                .bind(record.id)
                .fetch_one(&self.pool)
                .await?;

                if exists > 0 {
                    Err(StoreError::VersionConflict {
                        id: record.id,
                        expected: record.version,
                    })
                } else {
                    Err(StoreError::NotFound {
                        owner_ref: record.owner_ref,
                        kind: record.kind,
                    })
                }
            }
        }
    }

    async fn find_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let records = sqlx::query_as::<_, JobRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM generation_jobs
            WHERE status IN ('pending', 'processing')
              AND started_at IS NOT NULL
              AND started_at >= $1
            ORDER BY started_at ASC
            "#,
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
