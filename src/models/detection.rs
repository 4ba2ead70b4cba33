use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::book::DetectionResult;
use crate::models::error_code::ErrorCode;
use crate::models::job::{DetectionJob, JobStatus};

/// Response after submitting a bookshelf photo.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: i32,
}

/// Poll projection of a detection job.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub stage: String,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DetectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DetectionJob> for JobStatusResponse {
    fn from(job: DetectionJob) -> Self {
        let can_retry = job.can_retry();
        Self {
            id: job.id,
            status: job.status,
            stage: job.stage,
            progress: job.progress,
            result: job.result,
            error: job.error,
            error_code: job.error_code,
            can_retry,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Outcome of one timeout sweep.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSweepReport {
    pub marked: usize,
    pub checked: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

/// Outcome of one retention sweep.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub processed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}
