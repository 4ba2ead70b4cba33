//! Orchestration runs end to end against in-memory stores and scripted providers.

mod helpers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helpers::*;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use shelf_scan::config::{MaintenanceSettings, PipelineSettings};
use shelf_scan::db::memory::{MemoryCatalog, MemoryJobStore};
use shelf_scan::db::{HouseholdCatalog, JobStore, OwnedBook, StoreError};
use shelf_scan::models::book::{ConfidenceTier, DetectionResult, DetectionStrategy};
use shelf_scan::models::error_code::ErrorCode;
use shelf_scan::models::job::{AuditEntry, DetectionJob, JobStatus, JobUpdate, NewJob};
use shelf_scan::services::detector::BookDetector;
use shelf_scan::services::enricher::MetadataEnricher;
use shelf_scan::services::merger::ResultMerger;
use shelf_scan::services::ocr::{TextExtractor, TextFragment};
use shelf_scan::services::orchestrator::{JobOrchestrator, JobOutcome};
use shelf_scan::services::queue::DetectionTask;
use shelf_scan::services::reaper::sweep_timeouts;
use shelf_scan::services::storage::{BlobStore, MemoryBlobStore};
use shelf_scan::services::vision::VisionModel;

const IMAGE_KEY: &str = "detections/reader/shelf.png";

/// Job store that remembers every progress value it actually wrote.
struct ProgressLog {
    inner: Arc<MemoryJobStore>,
    written: Mutex<Vec<i32>>,
}

impl ProgressLog {
    fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            written: Mutex::new(Vec::new()),
        }
    }

    fn written(&self) -> Vec<i32> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for ProgressLog {
    async fn create(&self, job: NewJob) -> Result<DetectionJob, StoreError> {
        self.inner.create(job).await
    }

    async fn get(&self, job_id: Uuid, owner_id: &str) -> Result<Option<DetectionJob>, StoreError> {
        self.inner.get(job_id, owner_id).await
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<bool, StoreError> {
        let progress = update.progress;
        let applied = self.inner.update(job_id, update).await?;
        if let (true, Some(progress)) = (applied, progress) {
            self.written.lock().unwrap().push(progress);
        }
        Ok(applied)
    }

    async fn soft_delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.inner.soft_delete(job_id).await
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError> {
        self.inner.find_stale_processing(cutoff, limit).await
    }

    async fn find_expired(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DetectionJob>, StoreError> {
        self.inner.find_expired(cutoff, limit).await
    }

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.inner.record_audit(entry).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

struct Pipeline {
    jobs: Arc<MemoryJobStore>,
    progress: Arc<ProgressLog>,
    blobs: Arc<MemoryBlobStore>,
    model: Arc<ScriptedModel>,
    orchestrator: JobOrchestrator,
}

struct PipelineBuilder {
    model: ScriptedModel,
    enricher: CatalogEnricher,
    ocr: Option<Arc<dyn TextExtractor>>,
    catalog: Arc<dyn HouseholdCatalog>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    fn new(model: ScriptedModel) -> Self {
        Self {
            model,
            enricher: CatalogEnricher::new(),
            ocr: None,
            catalog: Arc::new(MemoryCatalog::new()),
            settings: PipelineSettings::default(),
        }
    }

    fn enricher(mut self, enricher: CatalogEnricher) -> Self {
        self.enricher = enricher;
        self
    }

    fn hybrid(mut self, ocr: Arc<dyn TextExtractor>) -> Self {
        self.ocr = Some(ocr);
        self.settings.strategy = DetectionStrategy::Hybrid;
        self
    }

    fn catalog(mut self, catalog: Arc<dyn HouseholdCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    fn settings(mut self, f: impl FnOnce(&mut PipelineSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    async fn build(self) -> Pipeline {
        let jobs = Arc::new(MemoryJobStore::new());
        let progress = Arc::new(ProgressLog::new(jobs.clone()));
        let blobs = Arc::new(MemoryBlobStore::new("shelf-photos"));
        blobs.upload(IMAGE_KEY, &png_bytes(), "image/png").await.unwrap();

        let model = Arc::new(self.model);
        let vision: Arc<dyn VisionModel> = model.clone();
        let enricher: Arc<dyn MetadataEnricher> = Arc::new(self.enricher);

        let orchestrator = JobOrchestrator::new(
            progress.clone(),
            blobs.clone(),
            BookDetector::new(vision, self.ocr, &self.settings),
            ResultMerger::new(enricher, &self.settings),
            self.catalog,
            &self.settings,
        );

        Pipeline {
            jobs,
            progress,
            blobs,
            model,
            orchestrator,
        }
    }
}

impl Pipeline {
    async fn submit(&self, household: Option<&str>) -> DetectionTask {
        let job = self
            .jobs
            .create(NewJob {
                owner_id: "reader".to_string(),
                image_ref: IMAGE_KEY.to_string(),
            })
            .await
            .unwrap();

        DetectionTask {
            job_id: job.id,
            owner_id: "reader".to_string(),
            household_id: household.map(str::to_string),
            image_key: IMAGE_KEY.to_string(),
            content_type: "image/png".to_string(),
        }
    }

    async fn job(&self, task: &DetectionTask) -> DetectionJob {
        self.jobs.snapshot(task.job_id).await.unwrap()
    }
}

fn completed_result(job: &DetectionJob) -> &DetectionResult {
    assert_eq!(job.status, JobStatus::Completed, "job error: {:?}", job.error);
    let result = job.result.as_ref().unwrap();
    assert_eq!(result.count, result.books.len());
    assert!(job.error.is_none());
    assert_eq!(job.progress, 100);
    result
}

#[tokio::test]
async fn test_single_book_enriched_with_high_confidence() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(
        r#"[{"title": "Xanadu", "author": "Ann Author", "genre": "fantasy"}]"#,
    ))
    .enricher(CatalogEnricher::new().with("Xanadu", Lookup::Match(enriched("Xanadu", "Ann Author", 85))))
    .build()
    .await;
    let task = pipeline.submit(None).await;

    let outcome = pipeline.orchestrator.run(&task).await;
    assert_eq!(outcome, JobOutcome::Completed { books: 1 });

    let job = pipeline.job(&task).await;
    let result = completed_result(&job);
    assert_eq!(result.strategy, DetectionStrategy::AiOnly);

    let book = &result.books[0];
    assert_eq!(book.title, "Xanadu");
    assert_eq!(book.confidence_tier, ConfidenceTier::High);
    assert_eq!(book.confidence_score, 85);
    assert_eq!(book.publisher.as_deref(), Some("Allen & Unwin"));
    assert_eq!(book.isbn.as_deref(), Some("9780261102217"));
    assert_eq!(book.genre.as_deref(), Some("Fantasy"));
    assert!(!book.already_owned);
    assert_eq!(job.stage, "completed");
}

#[tokio::test]
async fn test_duplicate_guesses_from_grouped_spines_collapse() {
    let ocr = Arc::new(FixedOcr::returning(vec![
        TextFragment {
            text: "THE HOBBIT".to_string(),
            x: 10.0,
            y: 100.0,
            width: 20.0,
            height: 120.0,
        },
        TextFragment {
            text: "TOLKIEN".to_string(),
            x: 12.0,
            y: 110.0,
            width: 18.0,
            height: 80.0,
        },
    ]));
    let reply = r#"```json
[
  {"title": "The Hobbit", "author": "J.R.R. Tolkien", "series": null},
  {"title": "The Hobbit", "author": "J.R.R. Tolkien", "series": null}
]
```"#;
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(reply))
        .hybrid(ocr.clone())
        .build()
        .await;
    let task = pipeline.submit(None).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    let result = completed_result(&job);
    assert_eq!(result.count, 1);
    assert_eq!(result.strategy, DetectionStrategy::Hybrid);
    assert_eq!(result.books[0].confidence_tier, ConfidenceTier::Low);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert!(pipeline.model.last_prompt().unwrap().contains("THE HOBBIT"));
}

#[tokio::test]
async fn test_progress_steps_through_every_stage_in_order() {
    let ocr = Arc::new(FixedOcr::returning(vec![TextFragment {
        text: "HOLES".to_string(),
        x: 10.0,
        y: 100.0,
        width: 20.0,
        height: 120.0,
    }]));
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(r#"[{"title": "Holes", "author": "Louis Sachar"}]"#))
        .hybrid(ocr)
        .build()
        .await;
    let task = pipeline.submit(Some("family-1")).await;

    pipeline.orchestrator.run(&task).await;

    completed_result(&pipeline.job(&task).await);
    assert_eq!(pipeline.progress.written(), vec![10, 20, 30, 50, 80, 90, 100]);
}

#[tokio::test]
async fn test_failed_run_keeps_progress_where_it_stopped() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying("I could not find any JSON for you."))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    let outcome = pipeline.orchestrator.run(&task).await;
    assert_eq!(outcome, JobOutcome::Failed { code: ErrorCode::AiFailed });

    let written = pipeline.progress.written();
    assert_eq!(written, vec![10, 30]);
    assert!(written.windows(2).all(|w| w[0] <= w[1]));

    let job = pipeline.job(&task).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 30);
}

#[tokio::test]
async fn test_enrichment_timeout_downgrades_only_that_book() {
    let reply = r#"[
        {"title": "Matilda", "author": "Roald Dahl"},
        {"title": "Holes", "author": "Louis Sachar"},
        {"title": "Wonder", "author": "R. J. Palacio"}
    ]"#;
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(reply))
        .enricher(
            CatalogEnricher::new()
                .with("Matilda", Lookup::Match(enriched("Matilda", "Roald Dahl", 90)))
                .with("Holes", Lookup::Hang)
                .with("Wonder", Lookup::Match(enriched("Wonder", "R. J. Palacio", 55))),
        )
        .settings(|s| s.enrich_timeout = Duration::from_millis(50))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    let result = completed_result(&job);
    assert_eq!(result.count, 3);

    let tiers: Vec<_> = result.books.iter().map(|b| (b.title.as_str(), b.confidence_tier, b.confidence_score)).collect();
    assert_eq!(
        tiers,
        vec![
            ("Matilda", ConfidenceTier::High, 90),
            ("Wonder", ConfidenceTier::Medium, 55),
            ("Holes", ConfidenceTier::Low, 0),
        ]
    );
}

#[tokio::test]
async fn test_enrichment_errors_do_not_fail_job() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(r#"[{"title": "Dune"}]"#))
        .enricher(CatalogEnricher::new().with("Dune", Lookup::Fail))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    let result = completed_result(&job);
    assert_eq!(result.books[0].confidence_tier, ConfidenceTier::Low);
    assert_eq!(result.books[0].confidence_score, 0);
}

#[tokio::test]
async fn test_household_books_are_tagged_owned() {
    let catalog = MemoryCatalog::new().with_household(
        "family-1",
        vec![OwnedBook {
            title: " matilda ".to_string(),
            author: Some("Roald Dahl".to_string()),
            series: None,
        }],
    );
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(
        r#"[{"title": "Matilda", "author": "Roald Dahl"}, {"title": "Holes", "author": "Louis Sachar"}]"#,
    ))
    .catalog(Arc::new(catalog))
    .build()
    .await;
    let task = pipeline.submit(Some("family-1")).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    let result = completed_result(&job);
    let owned: Vec<_> = result.books.iter().map(|b| (b.title.as_str(), b.already_owned)).collect();
    assert!(owned.contains(&("Matilda", true)));
    assert!(owned.contains(&("Holes", false)));
}

#[tokio::test]
async fn test_catalog_failure_is_not_fatal() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(r#"[{"title": "Matilda"}]"#))
        .catalog(Arc::new(UnreachableCatalog))
        .build()
        .await;
    let task = pipeline.submit(Some("family-1")).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    assert!(!completed_result(&job).books[0].already_owned);
}

#[tokio::test]
async fn test_ocr_failure_falls_back_to_ai_only() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(r#"[{"title": "Matilda"}]"#))
        .hybrid(Arc::new(FixedOcr::failing()))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    assert_eq!(completed_result(&job).strategy, DetectionStrategy::AiOnly);
}

#[tokio::test]
async fn test_empty_detection_fails_with_retryable_code() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying("[]")).build().await;
    let task = pipeline.submit(None).await;

    let outcome = pipeline.orchestrator.run(&task).await;
    assert_eq!(outcome, JobOutcome::Failed { code: ErrorCode::NoBooksDetected });

    let job = pipeline.job(&task).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code, Some(ErrorCode::NoBooksDetected));
    assert_eq!(job.can_retry(), Some(true));
    assert!(job.result.is_none());
    assert!(job.error.is_some());
    assert_eq!(job.progress, 30);
}

#[tokio::test]
async fn test_model_failures_map_to_error_codes() {
    let cases = [
        (ScriptedModel::replying("I see some books but cannot list them."), ErrorCode::AiFailed),
        (ScriptedModel::new(ModelScript::RateLimited), ErrorCode::RateLimited),
    ];

    for (model, expected) in cases {
        let pipeline = PipelineBuilder::new(model).build().await;
        let task = pipeline.submit(None).await;

        pipeline.orchestrator.run(&task).await;

        let job = pipeline.job(&task).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code, Some(expected));
    }
}

#[tokio::test]
async fn test_model_timeout_fails_job() {
    let pipeline = PipelineBuilder::new(ScriptedModel::new(ModelScript::Hang))
        .settings(|s| s.model_timeout = Duration::from_millis(50))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    assert_eq!(job.error_code, Some(ErrorCode::Timeout));
}

#[tokio::test]
async fn test_job_budget_bounds_whole_run() {
    let pipeline = PipelineBuilder::new(ScriptedModel::new(ModelScript::Hang))
        .settings(|s| s.job_budget = Duration::from_millis(100))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    let outcome = pipeline.orchestrator.run(&task).await;
    assert_eq!(outcome, JobOutcome::Failed { code: ErrorCode::Timeout });
    assert_eq!(pipeline.job(&task).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_missing_image_fails_job() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying("[]")).build().await;
    let task = pipeline.submit(None).await;
    pipeline.blobs.delete(IMAGE_KEY).await.unwrap();

    pipeline.orchestrator.run(&task).await;

    let job = pipeline.job(&task).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code, Some(ErrorCode::UnexpectedError));
}

#[tokio::test]
async fn test_reaped_job_is_not_overwritten() {
    let pipeline = PipelineBuilder::new(ScriptedModel::replying(r#"[{"title": "Matilda"}]"#))
        .build()
        .await;
    let task = pipeline.submit(None).await;

    let later = chrono::Utc::now() + chrono::Duration::minutes(11);
    let report = sweep_timeouts(pipeline.jobs.as_ref(), &MaintenanceSettings::default(), later).await;
    assert_eq!(report.marked, 1);

    let outcome = pipeline.orchestrator.run(&task).await;
    assert_eq!(outcome, JobOutcome::Superseded);

    let job = pipeline.job(&task).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stage, "failed_timeout");
    assert!(job.result.is_none());
}
