use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::app_state::AppState;
use crate::auth::CronAuth;
use crate::models::detection::{CleanupReport, TimeoutSweepReport};
use crate::services::{reaper, retention};

/// GET|POST /api/v1/maintenance/timeout-sweep: fail jobs stuck in processing.
pub async fn timeout_sweep(_: CronAuth, State(state): State<AppState>) -> Json<TimeoutSweepReport> {
    let report = reaper::sweep_timeouts(state.jobs.as_ref(), &state.maintenance, Utc::now()).await;
    tracing::info!(
        checked = report.checked,
        marked = report.marked,
        errors = report.errors.len(),
        "Timeout sweep finished"
    );
    Json(report)
}

/// GET|POST /api/v1/maintenance/retention-cleanup: remove expired job images.
pub async fn retention_cleanup(_: CronAuth, State(state): State<AppState>) -> Json<CleanupReport> {
    Json(
        retention::sweep_retention(
            state.jobs.as_ref(),
            state.storage.as_ref(),
            &state.maintenance,
            Utc::now(),
        )
        .await,
    )
}
