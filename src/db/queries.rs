use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::error_code::ErrorCode;
use crate::models::job::{AuditEntry, DetectionJob, JobStage, JobStatus, JobUpdate, NewJob};

const JOB_COLUMNS: &str = "id, owner_id, status, stage, progress, result, error, error_code, \
                           image_ref, created_at, updated_at, deleted_at";

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<DetectionJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Malformed(format!("unknown status '{}'", status_str)))?;

    let error_code: Option<String> = row.try_get("error_code")?;
    let error_code = error_code
        .map(|code| {
            ErrorCode::from_str(&code)
                .map_err(|_| StoreError::Malformed(format!("unknown error code '{}'", code)))
        })
        .transpose()?;

    let result: Option<serde_json::Value> = row.try_get("result")?;
    let result = result
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Malformed(format!("result: {}", e)))?;

    Ok(DetectionJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        status,
        stage: row.try_get("stage")?,
        progress: row.try_get("progress")?,
        result,
        error: row.try_get("error")?,
        error_code,
        image_ref: row.try_get("image_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<DetectionJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO detection_jobs (id, owner_id, status, stage, progress, image_ref)
            VALUES ($1, $2, 'processing', $3, 0, $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&job.owner_id)
        .bind(JobStage::Queued.to_string())
        .bind(&job.image_ref)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn get(&self, job_id: Uuid, owner_id: &str) -> Result<Option<DetectionJob>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM detection_jobs
            WHERE id = $1 AND owner_id = $2 AND deleted_at IS NULL
            "#
        ))
        .bind(job_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<bool, StoreError> {
        let result = update
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Malformed(format!("result: {}", e)))?;

        let outcome = sqlx::query(
            r#"
            UPDATE detection_jobs
            SET status = COALESCE($2, status),
                stage = COALESCE($3, stage),
                progress = COALESCE($4, progress),
                result = COALESCE($5, result),
                error = COALESCE($6, error),
                error_code = COALESCE($7, error_code),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND deleted_at IS NULL
            "#,
        )
        .bind(job_id)
        .bind(update.status.map(|s| s.to_string()))
        .bind(update.stage)
        .bind(update.progress)
        .bind(result)
        .bind(update.error)
        .bind(update.error_code.map(|c| c.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn soft_delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE detection_jobs
            SET deleted_at = NOW(),
                image_ref = NULL,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM detection_jobs
            WHERE status = 'processing' AND created_at < $1 AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn find_expired(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM detection_jobs
            WHERE status IN ('completed', 'failed') AND created_at < $1 AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO detection_audit_log (job_id, bucket, path, actor, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.job_id)
        .bind(&entry.bucket)
        .bind(&entry.path)
        .bind(&entry.actor)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
