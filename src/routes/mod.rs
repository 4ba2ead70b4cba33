use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod detect;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod metrics;

/// Room for multipart framing around the image part.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// API routes without the metrics endpoint or transport layers.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.max_image_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/detections",
            post(detect::submit_detection).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/v1/detections/{job_id}", get(detect::get_detection))
        .route(
            "/api/v1/maintenance/timeout-sweep",
            get(maintenance::timeout_sweep).post(maintenance::timeout_sweep),
        )
        .route(
            "/api/v1/maintenance/retention-cleanup",
            get(maintenance::retention_cleanup).post(maintenance::retention_cleanup),
        )
        .with_state(state)
}
