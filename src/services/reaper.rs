use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::MaintenanceSettings;
use crate::db::JobStore;
use crate::models::detection::TimeoutSweepReport;
use crate::models::error_code::ErrorCode;
use crate::models::job::{JobStage, JobUpdate};

/// Fail every job that has sat in `processing` past the staleness threshold.
///
/// Re-running is harmless: failed jobs no longer match the query. A job that
/// finishes between the query and the write is left alone by the conditional
/// update and not counted.
pub async fn sweep_timeouts(
    store: &dyn JobStore,
    settings: &MaintenanceSettings,
    now: DateTime<Utc>,
) -> TimeoutSweepReport {
    let mut report = TimeoutSweepReport::default();
    let cutoff = now - settings.stale_after;

    let stale = match store
        .find_stale_processing(cutoff, settings.timeout_sweep_batch)
        .await
    {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "Timeout sweep query failed");
            report.errors.push(format!("query: {}", e));
            return report;
        }
    };

    report.checked = stale.len();

    for job in stale {
        let elapsed = (now - job.created_at).num_minutes();
        let message = format!(
            "Job timed out after {} minutes (stuck at stage '{}')",
            elapsed, job.stage
        );
        let update = JobUpdate {
            progress: Some(0),
            ..JobUpdate::failed(JobStage::FailedTimeout, ErrorCode::Timeout, message)
        };

        match store.update(job.id, update).await {
            Ok(true) => {
                report.marked += 1;
                metrics::counter!("detection_jobs_timed_out").increment(1);
                info!(job_id = %job.id, stage = %job.stage, elapsed_minutes = elapsed, "Marked stale job as timed out");
            }
            Ok(false) => {
                info!(job_id = %job.id, "Job left processing before timeout write");
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to mark job as timed out");
                report.errors.push(format!("{}: {}", job.id, e));
            }
        }
    }

    report
}
