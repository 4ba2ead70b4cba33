use metrics_exporter_prometheus::PrometheusBuilder;
use shelf_scan::{
    config::AppConfig,
    db::{self, catalog_queries::PgHouseholdCatalog, queries::PgJobStore},
    routes::metrics::describe_metrics,
    services::{
        detector::BookDetector,
        enricher::{MetadataEnricher, OpenLibraryClient},
        merger::ResultMerger,
        ocr::{CloudVisionOcrClient, TextExtractor},
        orchestrator::{JobOrchestrator, JobOutcome},
        queue::JobQueue,
        schedule::start_maintenance_scheduler,
        storage::R2Client,
        vision::WorkersAiClient,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let pipeline = config.pipeline_settings();

    let jobs = Arc::new(PgJobStore::new(db_pool.clone()));
    let catalog = Arc::new(PgHouseholdCatalog::new(db_pool));
    let storage = Arc::new(
        R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )
        .expect("Failed to initialize R2 client"),
    );
    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    let model = WorkersAiClient::new(
        &config.cf_api_base,
        &config.cf_account_id,
        &config.cf_api_token,
        &config.vision_model,
        pipeline.model_timeout,
    )
    .expect("Failed to initialize Workers AI client");

    let ocr: Option<Arc<dyn TextExtractor>> = match config.ocr_api_key.as_deref() {
        Some(key) => {
            let client = CloudVisionOcrClient::new(&config.ocr_endpoint, key, pipeline.ocr_timeout)
                .expect("Failed to initialize OCR client");
            Some(Arc::new(client) as Arc<dyn TextExtractor>)
        }
        None => {
            tracing::info!(strategy = %pipeline.strategy, "No OCR key configured, detection runs AI-only");
            None
        }
    };

    let enricher: Arc<dyn MetadataEnricher> = Arc::new(
        OpenLibraryClient::new(&config.book_search_url, pipeline.enrich_timeout)
            .expect("Failed to initialize book search client"),
    );

    let orchestrator = Arc::new(JobOrchestrator::new(
        jobs.clone(),
        storage.clone(),
        BookDetector::new(Arc::new(model), ocr, &pipeline),
        ResultMerger::new(enricher, &pipeline),
        catalog,
        &pipeline,
    ));

    let _scheduler = if config.maintenance_schedule_enabled {
        tracing::info!(
            timeout_cron = %config.timeout_sweep_cron,
            retention_cron = %config.retention_cron,
            "Starting in-process maintenance schedule"
        );
        Some(
            start_maintenance_scheduler(
                jobs,
                storage,
                config.maintenance_settings(),
                &config.timeout_sweep_cron,
                &config.retention_cron,
            )
            .await
            .expect("Failed to start maintenance scheduler"),
        )
    } else {
        None
    };

    tracing::info!(concurrency = config.worker_concurrency, "Worker ready, starting job processing loops");

    let mut loops = Vec::new();
    for slot in 0..config.worker_concurrency.max(1) {
        let queue = queue.clone();
        let orchestrator = orchestrator.clone();
        loops.push(tokio::spawn(async move {
            process_loop(slot, &queue, &orchestrator).await;
        }));
    }

    futures::future::join_all(loops).await;
}

async fn process_loop(slot: usize, queue: &JobQueue, orchestrator: &JobOrchestrator) {
    loop {
        match process_next_job(queue, orchestrator).await {
            Ok(true) => {
                tracing::debug!(slot, "Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!(slot, "No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Queue error, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next task from the queue.
/// Returns Ok(true) if a task was processed, Ok(false) if none was waiting.
async fn process_next_job(
    queue: &JobQueue,
    orchestrator: &JobOrchestrator,
) -> Result<bool, shelf_scan::services::queue::QueueError> {
    if let Ok(depth) = queue.queue_depth().await {
        metrics::gauge!("detection_queue_depth").set(depth as f64);
    }

    let task = match queue.dequeue().await? {
        Some(task) => task,
        None => return Ok(false),
    };

    // Failures are recorded on the job itself; a task is never re-queued.
    match orchestrator.run(&task).await {
        JobOutcome::Completed { books } => {
            tracing::info!(job_id = %task.job_id, books, "Task finished");
        }
        JobOutcome::Failed { code } => {
            tracing::info!(job_id = %task.job_id, code = %code, "Task finished with failure");
        }
        JobOutcome::Superseded => {
            tracing::info!(job_id = %task.job_id, "Task superseded");
        }
    }

    Ok(true)
}
