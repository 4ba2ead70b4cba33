use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::book::DetectionResult;
use crate::models::error_code::ErrorCode;

/// Status of a detection job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Pipeline step labels written to `stage`. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStage {
    Queued,
    Accepted,
    Ocr,
    Detecting,
    Enriching,
    Ownership,
    Saving,
    Completed,
    Failed,
    FailedTimeout,
}

/// One bookshelf detection request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionJob {
    pub id: Uuid,
    pub owner_id: String,
    pub status: JobStatus,
    pub stage: String,
    pub progress: i32,
    pub result: Option<DetectionResult>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DetectionJob {
    pub fn can_retry(&self) -> Option<bool> {
        self.error_code.map(ErrorCode::can_retry)
    }
}

/// Fields supplied when a job row is created.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: String,
    pub image_ref: String,
}

/// Partial update applied to a job that is still `processing`.
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub stage: Option<String>,
    pub progress: Option<i32>,
    pub result: Option<DetectionResult>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl JobUpdate {
    /// Intermediate checkpoint: stage label plus coarse progress.
    pub fn checkpoint(stage: JobStage, progress: i32) -> Self {
        Self {
            stage: Some(stage.to_string()),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(result: DetectionResult) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            stage: Some(JobStage::Completed.to_string()),
            progress: Some(100),
            result: Some(result),
            ..Default::default()
        }
    }

    /// Terminal failure. Progress is left where the run stopped.
    pub fn failed(stage: JobStage, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            stage: Some(stage.to_string()),
            error: Some(message.into()),
            error_code: Some(code),
            ..Default::default()
        }
    }
}

/// Audit record written when the retention cleaner removes a job's image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub job_id: Uuid,
    pub bucket: String,
    pub path: Option<String>,
    pub actor: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
