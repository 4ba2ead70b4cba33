//! In-process job store and catalog, used by tests and local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{HouseholdCatalog, JobStore, OwnedBook, StoreError};
use crate::models::job::{AuditEntry, DetectionJob, JobStage, JobStatus, JobUpdate, NewJob};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, DetectionJob>>,
    audit: RwLock<Vec<AuditEntry>>,
    failing_updates: RwLock<HashSet<Uuid>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw row, including soft-deleted jobs.
    pub async fn snapshot(&self, job_id: Uuid) -> Option<DetectionJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.read().await.clone()
    }

    /// Make every subsequent `update` of this job fail.
    pub async fn fail_updates_for(&self, job_id: Uuid) {
        self.failing_updates.write().await.insert(job_id);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<DetectionJob, StoreError> {
        let now = Utc::now();
        let record = DetectionJob {
            id: Uuid::new_v4(),
            owner_id: job.owner_id,
            status: JobStatus::Processing,
            stage: JobStage::Queued.to_string(),
            progress: 0,
            result: None,
            error: None,
            error_code: None,
            image_ref: Some(job.image_ref),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.jobs.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, job_id: Uuid, owner_id: &str) -> Result<Option<DetectionJob>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&job_id)
            .filter(|job| job.owner_id == owner_id && job.deleted_at.is_none())
            .cloned())
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<bool, StoreError> {
        if self.failing_updates.read().await.contains(&job_id) {
            return Err(StoreError::Unavailable(format!("update of {} rejected", job_id)));
        }

        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs
            .get_mut(&job_id)
            .filter(|job| job.status == JobStatus::Processing && job.deleted_at.is_none())
        else {
            return Ok(false);
        };

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(stage) = update.stage {
            job.stage = stage;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(code) = update.error_code {
            job.error_code = Some(code);
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn soft_delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            if job.deleted_at.is_none() {
                let now = Utc::now();
                job.deleted_at = Some(now);
                job.image_ref = None;
                job.updated_at = now;
            }
        }
        Ok(())
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError> {
        Ok(self
            .select(limit, |job| {
                job.status == JobStatus::Processing && job.created_at < cutoff
            })
            .await)
    }

    async fn find_expired(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError> {
        Ok(self
            .select(limit, |job| job.status.is_terminal() && job.created_at < cutoff)
            .await)
    }

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.audit.write().await.push(entry);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl MemoryJobStore {
    async fn select(&self, limit: i64, pred: impl Fn(&DetectionJob) -> bool) -> Vec<DetectionJob> {
        let mut matched: Vec<DetectionJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.deleted_at.is_none() && pred(job))
            .cloned()
            .collect();
        matched.sort_by_key(|job| job.created_at);
        matched.truncate(usize::try_from(limit).unwrap_or(0));
        matched
    }
}

/// Fixed household catalog.
#[derive(Default)]
pub struct MemoryCatalog {
    households: HashMap<String, Vec<OwnedBook>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_household(mut self, household_id: &str, books: Vec<OwnedBook>) -> Self {
        self.households.insert(household_id.to_string(), books);
        self
    }
}

#[async_trait]
impl HouseholdCatalog for MemoryCatalog {
    async fn owned_books(&self, household_id: &str) -> Result<Vec<OwnedBook>, StoreError> {
        Ok(self.households.get(household_id).cloned().unwrap_or_default())
    }
}
