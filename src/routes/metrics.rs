use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the server and worker emit.
pub fn describe_metrics() {
    metrics::describe_counter!("detection_jobs_total", "Total detection jobs submitted");
    metrics::describe_counter!("detection_jobs_completed", "Total detection jobs completed");
    metrics::describe_counter!("detection_jobs_failed", "Detection jobs that failed, by error code");
    metrics::describe_histogram!(
        "detection_processing_seconds",
        "Wall-clock time of one detection pipeline run"
    );
    metrics::describe_counter!("detection_jobs_timed_out", "Jobs failed by the timeout sweep");
    metrics::describe_counter!("detection_jobs_cleaned", "Jobs removed by the retention sweep");
    metrics::describe_gauge!("detection_queue_depth", "Detection tasks waiting in the queue");
}
