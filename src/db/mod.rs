use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{AuditEntry, DetectionJob, JobUpdate, NewJob};

pub mod catalog_queries;
pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Durable record of detection jobs.
///
/// Every mutation of job state goes through `update`, which only touches rows
/// still in `processing`; once a job is terminal its status never changes.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<DetectionJob, StoreError>;

    /// Fetch a visible job owned by `owner_id`. Other owners' jobs and
    /// soft-deleted rows are reported as `None`.
    async fn get(&self, job_id: Uuid, owner_id: &str) -> Result<Option<DetectionJob>, StoreError>;

    /// Apply `update` if the job is still processing. Returns whether a row changed.
    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<bool, StoreError>;

    /// Hide the job from polling and drop its image reference.
    async fn soft_delete(&self, job_id: Uuid) -> Result<(), StoreError>;

    /// Processing jobs created before `cutoff`, oldest first.
    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError>;

    /// Visible terminal jobs created before `cutoff`, oldest first.
    async fn find_expired(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError>;

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// A book already in a household's catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedBook {
    pub title: String,
    pub author: Option<String>,
    pub series: Option<String>,
}

/// Read access to the household catalog, used for ownership tagging.
#[async_trait]
pub trait HouseholdCatalog: Send + Sync {
    async fn owned_books(&self, household_id: &str) -> Result<Vec<OwnedBook>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored job is malformed: {0}")]
    Malformed(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
