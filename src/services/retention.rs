use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::MaintenanceSettings;
use crate::db::JobStore;
use crate::models::detection::CleanupReport;
use crate::models::job::AuditEntry;
use crate::services::storage::{BlobStore, StorageError};

const ACTOR: &str = "retention-cleaner";
const REASON: &str = "retention_policy";

/// Remove images of terminal jobs older than the retention window and
/// soft-delete their rows.
///
/// A blob that cannot be deleted is logged and counted, but the row is still
/// soft-deleted so it never becomes eligible again.
pub async fn sweep_retention(
    store: &dyn JobStore,
    blobs: &dyn BlobStore,
    settings: &MaintenanceSettings,
    now: DateTime<Utc>,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let cutoff = now - settings.retention;

    let expired = match store.find_expired(cutoff, settings.retention_batch).await {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "Retention sweep query failed");
            report.errors.push(format!("query: {}", e));
            return report;
        }
    };

    for job in expired {
        report.processed += 1;

        if let Some(key) = job.image_ref.as_deref() {
            match blobs.delete(key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    warn!(job_id = %job.id, key, error = %e, "Failed to delete job image");
                    report.errors.push(format!("{} storage: {}", job.id, e));
                }
            }
        }

        if let Err(e) = store.soft_delete(job.id).await {
            warn!(job_id = %job.id, error = %e, "Failed to soft-delete job");
            report.errors.push(format!("{}: {}", job.id, e));
            continue;
        }

        let entry = AuditEntry {
            job_id: job.id,
            bucket: blobs.bucket_name().to_string(),
            path: job.image_ref.clone(),
            actor: ACTOR.to_string(),
            reason: REASON.to_string(),
            created_at: now,
        };
        if let Err(e) = store.record_audit(entry).await {
            warn!(job_id = %job.id, error = %e, "Failed to write audit entry");
            report.errors.push(format!("{} audit: {}", job.id, e));
        }

        report.deleted += 1;
        metrics::counter!("detection_jobs_cleaned").increment(1);
    }

    info!(
        processed = report.processed,
        deleted = report.deleted,
        errors = report.errors.len(),
        "Retention sweep finished"
    );
    report
}
