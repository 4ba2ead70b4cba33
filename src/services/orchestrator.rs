//! Drives one detection job from stored image to terminal state.
//!
//! Stages and the progress written when each begins:
//!
//! | stage       | progress |
//! |-------------|----------|
//! | accepted    | 10       |
//! | ocr         | 20 (hybrid only) |
//! | detecting   | 30       |
//! | enriching   | 50       |
//! | ownership   | 80       |
//! | saving      | 90       |
//! | completed   | 100      |
//!
//! Every error is mapped to an [`ErrorCode`] and written as the job's terminal
//! `failed` state; `run` itself never returns an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::PipelineSettings;
use crate::db::{HouseholdCatalog, JobStore, StoreError};
use crate::models::book::{DetectionResult, DetectionStrategy};
use crate::models::error_code::ErrorCode;
use crate::models::job::{JobStage, JobUpdate};
use crate::services::detector::{BookDetector, DetectError};
use crate::services::merger::{ownership_keys, rank, tag_owned, ResultMerger};
use crate::services::ocr::OcrError;
use crate::services::queue::DetectionTask;
use crate::services::storage::{BlobStore, StorageError};
use crate::services::vision::VisionError;

/// How a run ended, for the caller's logging.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { books: usize },
    Failed { code: ErrorCode },
    /// The job left `processing` underneath us (e.g. reaped); nothing was written.
    Superseded,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Image storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error("No books detected in image")]
    NoBooksDetected,

    #[error("Job exceeded its {0:?} budget")]
    BudgetExceeded(Duration),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job is no longer processing")]
    Superseded,
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Storage(StorageError::NotFound(_)) => ErrorCode::UnexpectedError,
            PipelineError::Storage(_) => ErrorCode::ServiceUnavailable,
            PipelineError::Detect(DetectError::Ocr(e)) => match e {
                OcrError::Timeout => ErrorCode::Timeout,
                OcrError::Status(s) if s.as_u16() == 429 => ErrorCode::RateLimited,
                _ => ErrorCode::OcrFailed,
            },
            PipelineError::Detect(DetectError::Vision(e)) => match e {
                VisionError::Timeout => ErrorCode::Timeout,
                VisionError::RateLimited => ErrorCode::RateLimited,
                VisionError::Unavailable(_) => ErrorCode::ServiceUnavailable,
                VisionError::Http(inner) if inner.is_connect() => ErrorCode::ServiceUnavailable,
                _ => ErrorCode::AiFailed,
            },
            PipelineError::Detect(DetectError::MalformedResponse(_)) => ErrorCode::AiFailed,
            PipelineError::NoBooksDetected => ErrorCode::NoBooksDetected,
            PipelineError::BudgetExceeded(_) => ErrorCode::Timeout,
            PipelineError::Store(_) => ErrorCode::DatabaseError,
            PipelineError::Superseded => ErrorCode::UnexpectedError,
        }
    }
}

pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn BlobStore>,
    detector: BookDetector,
    merger: ResultMerger,
    catalog: Arc<dyn HouseholdCatalog>,
    job_budget: Duration,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn BlobStore>,
        detector: BookDetector,
        merger: ResultMerger,
        catalog: Arc<dyn HouseholdCatalog>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            jobs,
            storage,
            detector,
            merger,
            catalog,
            job_budget: settings.job_budget,
        }
    }

    /// Run the pipeline for one task and persist the terminal state.
    pub async fn run(&self, task: &DetectionTask) -> JobOutcome {
        let started = Instant::now();
        info!(job_id = %task.job_id, image_key = %task.image_key, "Processing detection job");

        let outcome = match tokio::time::timeout(self.job_budget, self.execute(task, started)).await {
            Ok(Ok(result)) => self.complete(task, result).await,
            Ok(Err(e)) => self.fail(task, e).await,
            Err(_) => self.fail(task, PipelineError::BudgetExceeded(self.job_budget)).await,
        };

        metrics::histogram!("detection_processing_seconds").record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn checkpoint(&self, task: &DetectionTask, stage: JobStage, progress: i32) -> Result<(), PipelineError> {
        if self.jobs.update(task.job_id, JobUpdate::checkpoint(stage, progress)).await? {
            Ok(())
        } else {
            Err(PipelineError::Superseded)
        }
    }

    async fn execute(&self, task: &DetectionTask, started: Instant) -> Result<DetectionResult, PipelineError> {
        self.checkpoint(task, JobStage::Accepted, 10).await?;
        let image = self.storage.download(&task.image_key).await?;

        let spines = if self.detector.uses_ocr() {
            self.checkpoint(task, JobStage::Ocr, 20).await?;
            self.detector.read_spines(&image).await
        } else {
            None
        };
        let strategy = if spines.is_some() {
            DetectionStrategy::Hybrid
        } else {
            DetectionStrategy::AiOnly
        };

        self.checkpoint(task, JobStage::Detecting, 30).await?;
        let guesses = self.detector.identify(&image, spines.as_deref()).await?;
        if guesses.is_empty() {
            return Err(PipelineError::NoBooksDetected);
        }

        self.checkpoint(task, JobStage::Enriching, 50).await?;
        let mut books = self.merger.enrich_all(guesses).await;

        self.checkpoint(task, JobStage::Ownership, 80).await?;
        let owned = self.owned_keys(task).await;
        tag_owned(&mut books, &owned);
        rank(&mut books);

        self.checkpoint(task, JobStage::Saving, 90).await?;
        Ok(DetectionResult::new(
            books,
            strategy,
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Ownership lookup failures are not fatal; nothing is tagged as owned.
    async fn owned_keys(&self, task: &DetectionTask) -> HashSet<String> {
        let Some(household_id) = task.household_id.as_deref() else {
            return HashSet::new();
        };

        match self.catalog.owned_books(household_id).await {
            Ok(books) => ownership_keys(&books),
            Err(e) => {
                warn!(job_id = %task.job_id, household_id, error = %e, "Ownership lookup failed");
                HashSet::new()
            }
        }
    }

    async fn complete(&self, task: &DetectionTask, result: DetectionResult) -> JobOutcome {
        let books = result.count;
        match self.jobs.update(task.job_id, JobUpdate::completed(result)).await {
            Ok(true) => {
                metrics::counter!("detection_jobs_completed").increment(1);
                info!(job_id = %task.job_id, books, "Detection job completed");
                JobOutcome::Completed { books }
            }
            Ok(false) => {
                warn!(job_id = %task.job_id, "Job already terminal, dropping result");
                JobOutcome::Superseded
            }
            Err(e) => self.fail(task, PipelineError::Store(e)).await,
        }
    }

    async fn fail(&self, task: &DetectionTask, err: PipelineError) -> JobOutcome {
        if matches!(err, PipelineError::Superseded) {
            warn!(job_id = %task.job_id, "Job left processing during run, stopping");
            return JobOutcome::Superseded;
        }

        let code = err.code();
        error!(job_id = %task.job_id, code = %code, error = %err, "Detection job failed");

        let message = format!("{} ({})", code.user_message(), err);
        match self
            .jobs
            .update(task.job_id, JobUpdate::failed(JobStage::Failed, code, message))
            .await
        {
            Ok(true) => {
                metrics::counter!("detection_jobs_failed", "code" => code.to_string()).increment(1);
                JobOutcome::Failed { code }
            }
            Ok(false) => JobOutcome::Superseded,
            Err(e) => {
                // Left in processing; the timeout sweep will fail it.
                error!(job_id = %task.job_id, error = %e, "Could not record job failure");
                JobOutcome::Failed { code }
            }
        }
    }
}
