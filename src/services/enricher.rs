//! Book metadata lookup against the Open Library search API.
//!
//! A lookup never fails for "not found": no match, a non-2xx response, or an
//! unparseable body all yield `Ok(None)`. Only transport failures are errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use strsim::jaro_winkler;
use tracing::{debug, warn};
use url::Url;

use crate::models::book::{canonical_label, EnrichedRecord, GENRES};

/// Documents considered per lookup.
const CANDIDATE_DOCS: usize = 5;

const TITLE_WEIGHT: f64 = 0.7;
const AUTHOR_WEIGHT: f64 = 0.3;

const COVERS_BASE: &str = "https://covers.openlibrary.org";

/// Best-match catalog lookup for a detected title.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, title: &str, author: Option<&str>)
        -> Result<Option<EnrichedRecord>, EnrichError>;
}

pub struct OpenLibraryClient {
    http: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    series: Vec<String>,
    first_publish_year: Option<i32>,
    #[serde(default)]
    publisher: Vec<String>,
    number_of_pages_median: Option<u32>,
    #[serde(default)]
    first_sentence: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    cover_i: Option<i64>,
    cover_url: Option<String>,
    #[serde(default)]
    subject: Vec<String>,
}

impl OpenLibraryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnrichError> {
        let base_url = Url::parse(base_url).map_err(|e| EnrichError::Config(e.to_string()))?;
        let http = Client::builder()
            .user_agent(concat!("shelf-scan/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl MetadataEnricher for OpenLibraryClient {
    async fn enrich(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<EnrichedRecord>, EnrichError> {
        let query = match author.map(str::trim).filter(|a| !a.is_empty()) {
            Some(author) => format!("{} {}", title.trim(), author),
            None => title.trim().to_string(),
        };

        let url = self
            .base_url
            .join("search.json")
            .map_err(|e| EnrichError::Config(e.to_string()))?;

        let response = self
            .http
            .get(url)
            .query(&[("q", query.as_str()), ("limit", "5")])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), query = %query, "Book search returned non-success status");
            return Ok(None);
        }

        let body: SearchResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, query = %query, "Could not parse book search response");
                return Ok(None);
            }
        };

        let record = best_match(title, author, body.docs, &self.base_url);
        debug!(
            query = %query,
            confidence = record.as_ref().map(|r| r.confidence),
            "Book search complete"
        );
        Ok(record)
    }
}

fn normalize_for_match(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spines often show only a surname, so surnames are compared on their own too.
fn author_similarity(a: &str, b: &str) -> f64 {
    let surname = |s: &str| s.rsplit(' ').next().unwrap_or("").to_string();
    jaro_winkler(a, b).max(jaro_winkler(&surname(a), &surname(b)))
}

/// Similarity between a guess and a catalog entry, 0-100.
pub fn match_confidence(
    guess_title: &str,
    guess_author: Option<&str>,
    doc_title: &str,
    doc_authors: &[String],
) -> u8 {
    let title_score = jaro_winkler(&normalize_for_match(guess_title), &normalize_for_match(doc_title));

    let score = match guess_author.map(normalize_for_match).filter(|a| !a.is_empty()) {
        Some(author) => {
            let author_score = doc_authors
                .iter()
                .map(|candidate| author_similarity(&author, &normalize_for_match(candidate)))
                .fold(0.0, f64::max);
            TITLE_WEIGHT * title_score + AUTHOR_WEIGHT * author_score
        }
        None => title_score,
    };

    (score * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Make a provider cover reference absolute.
///
/// Handles protocol-relative and root-relative paths, and references that
/// carry the real location in a `file`, `filename` or `url` query parameter.
pub fn normalize_cover_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some((_, query)) = raw.split_once('?') {
        let encoded = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| matches!(key.as_ref(), "file" | "filename" | "url") && !value.is_empty())
            .map(|(_, value)| value.into_owned());
        if let Some(target) = encoded {
            return resolve_url(&target, base);
        }
    }

    resolve_url(raw, base)
}

fn resolve_url(raw: &str, base: &Url) -> Option<String> {
    let mut url = if let Some(rest) = raw.strip_prefix("//") {
        Url::parse(&format!("https://{}", rest)).ok()?
    } else {
        match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => base.join(raw).ok()?,
            Err(_) => return None,
        }
    };

    if url.scheme() == "http" {
        url.set_scheme("https").ok()?;
    }
    (url.scheme() == "https").then(|| url.to_string())
}

fn pick_isbn(isbns: &[String]) -> Option<String> {
    isbns
        .iter()
        .find(|isbn| isbn.len() == 13)
        .or_else(|| isbns.first())
        .cloned()
}

fn record_from_doc(doc: SearchDoc, confidence: u8, base: &Url) -> EnrichedRecord {
    let cover_url = match doc.cover_i {
        Some(id) if id > 0 => Some(format!("{}/b/id/{}-L.jpg", COVERS_BASE, id)),
        _ => doc
            .cover_url
            .as_deref()
            .and_then(|raw| normalize_cover_url(raw, base)),
    };

    EnrichedRecord {
        title: doc.title.unwrap_or_default(),
        author: doc.author_name.first().cloned().unwrap_or_default(),
        series: doc.series.first().cloned(),
        series_number: None,
        genre: doc
            .subject
            .iter()
            .find_map(|subject| canonical_label(subject, GENRES)),
        age_range: None,
        publisher: doc.publisher.first().cloned(),
        published_year: doc.first_publish_year,
        page_count: doc.number_of_pages_median,
        description: doc.first_sentence.first().cloned(),
        cover_url,
        isbn: pick_isbn(&doc.isbn),
        confidence,
    }
}

/// Score the first few documents and keep the best; earlier documents win ties.
fn best_match(
    title: &str,
    author: Option<&str>,
    docs: Vec<SearchDoc>,
    base: &Url,
) -> Option<EnrichedRecord> {
    let mut best: Option<(u8, SearchDoc)> = None;

    for doc in docs.into_iter().take(CANDIDATE_DOCS) {
        let Some(doc_title) = doc.title.as_deref() else {
            continue;
        };
        let confidence = match_confidence(title, author, doc_title, &doc.author_name);
        if best.as_ref().map_or(true, |(score, _)| confidence > *score) {
            best = Some((confidence, doc));
        }
    }

    best.map(|(confidence, doc)| record_from_doc(doc, confidence, base))
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("Book search timed out")]
    Timeout,

    #[error("Book search request failed: {0}")]
    Http(reqwest::Error),

    #[error("Book search configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EnrichError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EnrichError::Timeout
        } else {
            EnrichError::Http(err)
        }
    }
}
