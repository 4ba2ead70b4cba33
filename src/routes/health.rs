use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_probe<E>(started: Instant, probe: Result<(), E>) -> Self {
        match probe {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: dependency status for the job store and the task queue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = Instant::now();
    let database = ComponentHealth::from_probe(db_start, state.jobs.ping().await);

    let queue_start = Instant::now();
    let queue = ComponentHealth::from_probe(queue_start, state.dispatcher.health_check().await);

    let all_healthy = database.is_ok() && queue.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { database, queue },
    };

    (status_code, Json(response))
}
