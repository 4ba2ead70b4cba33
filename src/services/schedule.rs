//! In-process cron schedule for the maintenance sweeps, for deployments
//! without an external scheduler hitting the maintenance endpoints.

use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::info;

use crate::config::MaintenanceSettings;
use crate::db::JobStore;
use crate::services::{reaper, retention, storage::BlobStore};

/// Start the timeout and retention sweeps on their cron expressions.
pub async fn start_maintenance_scheduler(
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn BlobStore>,
    settings: MaintenanceSettings,
    timeout_cron: &str,
    retention_cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let sweep_jobs = jobs.clone();
    let sweep_settings = settings.clone();
    let timeout_job = Job::new_async(timeout_cron, move |_uuid, _l| {
        let jobs = sweep_jobs.clone();
        let settings = sweep_settings.clone();
        Box::pin(async move {
            let report = reaper::sweep_timeouts(jobs.as_ref(), &settings, Utc::now()).await;
            info!(checked = report.checked, marked = report.marked, "Scheduled timeout sweep finished");
        })
    })?;
    scheduler.add(timeout_job).await?;

    let retention_job = Job::new_async(retention_cron, move |_uuid, _l| {
        let jobs = jobs.clone();
        let storage = storage.clone();
        let settings = settings.clone();
        Box::pin(async move {
            retention::sweep_retention(jobs.as_ref(), storage.as_ref(), &settings, Utc::now()).await;
        })
    })?;
    scheduler.add(retention_job).await?;

    scheduler.start().await?;
    Ok(scheduler)
}
