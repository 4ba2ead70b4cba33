use serde::Deserialize;
use std::time::Duration;

use crate::models::book::DetectionStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the detection queue
    pub redis_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    #[serde(default = "default_cf_api_base")]
    pub cf_api_base: String,

    /// Workers AI vision model used to read spines
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// `ai_only` or `hybrid` (OCR pass before the model call)
    #[serde(default = "default_detection_strategy")]
    pub detection_strategy: DetectionStrategy,

    /// Google Cloud Vision API key; hybrid detection falls back to AI-only without it
    #[serde(default)]
    pub ocr_api_key: Option<String>,

    #[serde(default = "default_ocr_endpoint")]
    pub ocr_endpoint: String,

    /// Max vertical distance (px) between fragments read as one spine
    #[serde(default = "default_spine_group_threshold_px")]
    pub spine_group_threshold_px: f32,

    /// Base URL of the book search provider
    #[serde(default = "default_book_search_url")]
    pub book_search_url: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// HS256 secret used to verify session tokens
    pub jwt_secret: String,

    /// Shared secret expected on maintenance endpoints
    pub cron_secret: String,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_high_confidence")]
    pub high_confidence_threshold: u8,

    #[serde(default = "default_medium_confidence")]
    pub medium_confidence_threshold: u8,

    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_enrich_timeout_secs")]
    pub enrich_timeout_secs: u64,

    /// Wall-clock budget for one orchestration run
    #[serde(default = "default_job_budget_secs")]
    pub job_budget_secs: u64,

    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,

    #[serde(default = "default_timeout_sweep_batch")]
    pub timeout_sweep_batch: i64,

    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    #[serde(default = "default_retention_batch")]
    pub retention_batch: i64,

    /// Run the sweeps inside the worker instead of relying on an external scheduler
    #[serde(default)]
    pub maintenance_schedule_enabled: bool,

    #[serde(default = "default_timeout_sweep_cron")]
    pub timeout_sweep_cron: String,

    #[serde(default = "default_retention_cron")]
    pub retention_cron: String,

    /// Detection tasks processed in parallel by one worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Prometheus scrape address exposed by the worker
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cf_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_vision_model() -> String {
    "@cf/meta/llama-3.2-11b-vision-instruct".to_string()
}

fn default_detection_strategy() -> DetectionStrategy {
    DetectionStrategy::AiOnly
}

fn default_ocr_endpoint() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}

fn default_spine_group_threshold_px() -> f32 {
    30.0
}

fn default_book_search_url() -> String {
    "https://openlibrary.org".to_string()
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_high_confidence() -> u8 {
    70
}

fn default_medium_confidence() -> u8 {
    40
}

fn default_ocr_timeout_secs() -> u64 {
    45
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_enrich_timeout_secs() -> u64 {
    15
}

fn default_job_budget_secs() -> u64 {
    145
}

fn default_stale_after_minutes() -> i64 {
    10
}

fn default_timeout_sweep_batch() -> i64 {
    50
}

fn default_retention_days() -> i64 {
    7
}

fn default_retention_batch() -> i64 {
    100
}

fn default_timeout_sweep_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_retention_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            strategy: self.detection_strategy,
            spine_group_threshold_px: self.spine_group_threshold_px,
            high_confidence_threshold: self.high_confidence_threshold,
            medium_confidence_threshold: self.medium_confidence_threshold,
            ocr_timeout: Duration::from_secs(self.ocr_timeout_secs),
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            enrich_timeout: Duration::from_secs(self.enrich_timeout_secs),
            job_budget: Duration::from_secs(self.job_budget_secs),
        }
    }

    pub fn maintenance_settings(&self) -> MaintenanceSettings {
        MaintenanceSettings {
            stale_after: chrono::Duration::minutes(self.stale_after_minutes),
            timeout_sweep_batch: self.timeout_sweep_batch,
            retention: chrono::Duration::days(self.retention_days),
            retention_batch: self.retention_batch,
        }
    }
}

/// Tuning for one orchestration run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub strategy: DetectionStrategy,
    pub spine_group_threshold_px: f32,
    pub high_confidence_threshold: u8,
    pub medium_confidence_threshold: u8,
    pub ocr_timeout: Duration,
    pub model_timeout: Duration,
    pub enrich_timeout: Duration,
    pub job_budget: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            strategy: default_detection_strategy(),
            spine_group_threshold_px: default_spine_group_threshold_px(),
            high_confidence_threshold: default_high_confidence(),
            medium_confidence_threshold: default_medium_confidence(),
            ocr_timeout: Duration::from_secs(default_ocr_timeout_secs()),
            model_timeout: Duration::from_secs(default_model_timeout_secs()),
            enrich_timeout: Duration::from_secs(default_enrich_timeout_secs()),
            job_budget: Duration::from_secs(default_job_budget_secs()),
        }
    }
}

/// Windows and batch sizes for the timeout and retention sweeps.
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub stale_after: chrono::Duration,
    pub timeout_sweep_batch: i64,
    pub retention: chrono::Duration,
    pub retention_batch: i64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            stale_after: chrono::Duration::minutes(default_stale_after_minutes()),
            timeout_sweep_batch: default_timeout_sweep_batch(),
            retention: chrono::Duration::days(default_retention_days()),
            retention_batch: default_retention_batch(),
        }
    }
}
