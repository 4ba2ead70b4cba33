//! Test doubles and request builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Request;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shelf_scan::auth::{AuthKeys, Claims};
use shelf_scan::db::{HouseholdCatalog, OwnedBook, StoreError};
use shelf_scan::models::book::EnrichedRecord;
use shelf_scan::services::enricher::{EnrichError, MetadataEnricher};
use shelf_scan::services::ocr::{OcrError, TextExtractor, TextFragment};
use shelf_scan::services::queue::{DetectionTask, JobDispatcher, QueueError};
use shelf_scan::services::vision::{VisionError, VisionModel};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const BOUNDARY: &str = "shelfscanboundary";

pub fn auth_keys() -> AuthKeys {
    AuthKeys::new(JWT_SECRET, CRON_SECRET)
}

/// Signed access token for `owner`, valid for an hour.
pub fn token_for(owner: &str, household: Option<&str>) -> String {
    token_with_expiry(owner, household, chrono::Utc::now().timestamp() + 3600)
}

pub fn token_with_expiry(owner: &str, household: Option<&str>, exp: i64) -> String {
    let claims = Claims {
        sub: owner.to_string(),
        household_id: household.map(str::to_string),
        exp,
    };
    auth_keys().issue_token(&claims).unwrap()
}

/// A small valid PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([(x * 30) as u8, (y * 30) as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Multipart body with a single file part.
pub fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"shelf\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/detections")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY));
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", bearer));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Dispatcher that records tasks and optionally refuses them.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub tasks: Mutex<Vec<DetectionTask>>,
    pub refuse: bool,
}

impl RecordingDispatcher {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<DetectionTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: &DetectionTask) -> Result<(), QueueError> {
        self.tasks.lock().unwrap().push(task.clone());
        if self.refuse {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// What the scripted vision model does when called.
#[derive(Clone)]
pub enum ModelScript {
    Reply(String),
    RateLimited,
    Hang,
}

pub struct ScriptedModel {
    script: ModelScript,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(script: ModelScript) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(ModelScript::Reply(text.to_string()))
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn complete(&self, _image_bytes: &[u8], prompt: &str) -> Result<String, VisionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.script {
            ModelScript::Reply(text) => Ok(text.clone()),
            ModelScript::RateLimited => Err(VisionError::RateLimited),
            ModelScript::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(VisionError::EmptyResponse)
            }
        }
    }
}

/// OCR double returning fixed fragments, or failing.
pub struct FixedOcr {
    fragments: Option<Vec<TextFragment>>,
    pub calls: AtomicUsize,
}

impl FixedOcr {
    pub fn returning(fragments: Vec<TextFragment>) -> Self {
        Self {
            fragments: Some(fragments),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fragments: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextExtractor for FixedOcr {
    async fn extract_text(&self, _image_bytes: &[u8]) -> Result<Vec<TextFragment>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fragments
            .clone()
            .ok_or_else(|| OcrError::Provider("quota exceeded".to_string()))
    }
}

/// What the catalog double answers for a title.
#[derive(Clone)]
pub enum Lookup {
    Match(EnrichedRecord),
    Hang,
    Fail,
}

/// Enricher keyed by guess title; unknown titles have no match.
#[derive(Default)]
pub struct CatalogEnricher {
    answers: HashMap<String, Lookup>,
}

impl CatalogEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, title: &str, lookup: Lookup) -> Self {
        self.answers.insert(title.to_string(), lookup);
        self
    }
}

#[async_trait]
impl MetadataEnricher for CatalogEnricher {
    async fn enrich(
        &self,
        title: &str,
        _author: Option<&str>,
    ) -> Result<Option<EnrichedRecord>, EnrichError> {
        match self.answers.get(title) {
            Some(Lookup::Match(record)) => Ok(Some(record.clone())),
            Some(Lookup::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(None)
            }
            Some(Lookup::Fail) => Err(EnrichError::Config("search index offline".to_string())),
            None => Ok(None),
        }
    }
}

/// Catalog that cannot be reached.
pub struct UnreachableCatalog;

#[async_trait]
impl HouseholdCatalog for UnreachableCatalog {
    async fn owned_books(&self, _household_id: &str) -> Result<Vec<OwnedBook>, StoreError> {
        Err(StoreError::Unavailable("catalog offline".to_string()))
    }
}

pub fn enriched(title: &str, author: &str, confidence: u8) -> EnrichedRecord {
    EnrichedRecord {
        title: title.to_string(),
        author: author.to_string(),
        publisher: Some("Allen & Unwin".to_string()),
        published_year: Some(1937),
        page_count: Some(310),
        isbn: Some("9780261102217".to_string()),
        cover_url: Some("https://covers.openlibrary.org/b/id/1-L.jpg".to_string()),
        confidence,
        ..EnrichedRecord::default()
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
