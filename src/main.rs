use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use shelf_scan::{
    app_state::AppState,
    auth::AuthKeys,
    config::AppConfig,
    db::{self, queries::PgJobStore},
    routes,
    services::{queue::JobQueue, storage::R2Client},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing shelf-scan server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing R2 storage client");
    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let state = AppState::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(r2_client),
        Arc::new(queue),
        AuthKeys::new(&config.jwt_secret, &config.cron_secret),
    )
    .with_max_image_bytes(config.max_image_bytes)
    .with_maintenance(config.maintenance_settings());

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting shelf-scan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
