use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PipelineSettings;
use crate::db::OwnedBook;
use crate::models::book::{BookCandidate, ConfidenceTier, EnrichedRecord, RawGuess};
use crate::services::enricher::{EnrichError, MetadataEnricher};

/// Score thresholds separating the confidence tiers.
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub high: u8,
    pub medium: u8,
}

impl TierThresholds {
    pub fn tier_for(&self, score: u8) -> ConfidenceTier {
        if score >= self.high {
            ConfidenceTier::High
        } else if score >= self.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self { high: 70, medium: 40 }
    }
}

fn norm(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_lowercase()).unwrap_or_default()
}

/// `title|author|series|seriesNumber`, lowercased and trimmed.
pub fn dedup_key(candidate: &BookCandidate) -> String {
    format!(
        "{}|{}",
        ownership_key(
            &candidate.title,
            Some(candidate.author.as_str()),
            candidate.series.as_deref()
        ),
        candidate
            .series_number
            .map(|n| n.to_string())
            .unwrap_or_default()
    )
}

/// `title|author|series`, lowercased and trimmed.
pub fn ownership_key(title: &str, author: Option<&str>, series: Option<&str>) -> String {
    format!("{}|{}|{}", norm(Some(title)), norm(author), norm(series))
}

pub fn ownership_keys(owned: &[OwnedBook]) -> HashSet<String> {
    owned
        .iter()
        .map(|book| ownership_key(&book.title, book.author.as_deref(), book.series.as_deref()))
        .collect()
}

fn low_confidence(guess: RawGuess) -> BookCandidate {
    BookCandidate {
        title: guess.title,
        author: guess.author.unwrap_or_default(),
        series: guess.series,
        series_number: guess.series_number,
        genre: guess.genre,
        age_range: guess.age_range,
        publisher: None,
        published_year: None,
        page_count: None,
        description: None,
        cover_url: None,
        isbn: None,
        confidence_tier: ConfidenceTier::Low,
        confidence_score: 0,
        already_owned: false,
    }
}

/// Combine a guess with its enrichment result.
///
/// - high: the catalog record wins; the guess only fills a missing genre or age range
/// - medium: the guess keeps title and author, the catalog supplies the rest
/// - low (or no match): the guess as read, score 0
pub fn classify(
    guess: RawGuess,
    enrichment: Option<EnrichedRecord>,
    thresholds: TierThresholds,
) -> BookCandidate {
    let Some(record) = enrichment else {
        return low_confidence(guess);
    };

    match thresholds.tier_for(record.confidence) {
        ConfidenceTier::High => BookCandidate {
            genre: record.genre.or(guess.genre),
            age_range: record.age_range.or(guess.age_range),
            title: record.title,
            author: record.author,
            series: record.series,
            series_number: record.series_number,
            publisher: record.publisher,
            published_year: record.published_year,
            page_count: record.page_count,
            description: record.description,
            cover_url: record.cover_url,
            isbn: record.isbn,
            confidence_tier: ConfidenceTier::High,
            confidence_score: record.confidence,
            already_owned: false,
        },
        ConfidenceTier::Medium => BookCandidate {
            title: guess.title,
            author: guess.author.unwrap_or_default(),
            series: guess.series.or(record.series),
            series_number: guess.series_number.or(record.series_number),
            genre: guess.genre.or(record.genre),
            age_range: guess.age_range.or(record.age_range),
            publisher: record.publisher,
            published_year: record.published_year,
            page_count: record.page_count,
            description: record.description,
            cover_url: record.cover_url,
            isbn: record.isbn,
            confidence_tier: ConfidenceTier::Medium,
            confidence_score: record.confidence,
            already_owned: false,
        },
        ConfidenceTier::Low => low_confidence(guess),
    }
}

/// Keep the first candidate for each dedup key.
pub fn dedupe(candidates: Vec<BookCandidate>) -> Vec<BookCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(dedup_key(candidate)))
        .collect()
}

pub fn tag_owned(candidates: &mut [BookCandidate], owned_keys: &HashSet<String>) {
    for candidate in candidates.iter_mut() {
        candidate.already_owned = owned_keys.contains(&ownership_key(
            &candidate.title,
            Some(candidate.author.as_str()),
            candidate.series.as_deref(),
        ));
    }
}

/// Stable sort: tier descending, then score descending.
pub fn rank(candidates: &mut [BookCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence_tier
            .cmp(&a.confidence_tier)
            .then(b.confidence_score.cmp(&a.confidence_score))
    });
}

/// Enrichment, classification, deduplication, ownership tagging and ranking.
pub struct ResultMerger {
    enricher: Arc<dyn MetadataEnricher>,
    thresholds: TierThresholds,
    enrich_timeout: Duration,
}

impl ResultMerger {
    pub fn new(enricher: Arc<dyn MetadataEnricher>, settings: &PipelineSettings) -> Self {
        Self {
            enricher,
            thresholds: TierThresholds {
                high: settings.high_confidence_threshold,
                medium: settings.medium_confidence_threshold,
            },
            enrich_timeout: settings.enrich_timeout,
        }
    }

    async fn lookup(&self, guess: &RawGuess) -> Result<Option<EnrichedRecord>, EnrichError> {
        tokio::time::timeout(
            self.enrich_timeout,
            self.enricher.enrich(&guess.title, guess.author.as_deref()),
        )
        .await
        .map_err(|_| EnrichError::Timeout)?
    }

    /// Enrich every guess concurrently, then classify and deduplicate.
    ///
    /// A failed or timed-out lookup downgrades that one guess to low confidence.
    pub async fn enrich_all(&self, guesses: Vec<RawGuess>) -> Vec<BookCandidate> {
        let lookups = guesses.into_iter().map(|guess| async move {
            let enrichment = match self.lookup(&guess).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(title = %guess.title, error = %e, "Enrichment failed, keeping raw guess");
                    None
                }
            };
            classify(guess, enrichment, self.thresholds)
        });

        let candidates = join_all(lookups).await;
        let total = candidates.len();
        let unique = dedupe(candidates);
        debug!(total, unique = unique.len(), "Enrichment complete");
        unique
    }

    /// `enrich_all`, then tag against `owned_keys` and rank, in one step.
    ///
    /// The job orchestrator runs these pieces itself so the ownership lookup
    /// gets its own checkpoint after enrichment.
    pub async fn merge(
        &self,
        guesses: Vec<RawGuess>,
        owned_keys: &HashSet<String>,
    ) -> Vec<BookCandidate> {
        let mut candidates = self.enrich_all(guesses).await;
        tag_owned(&mut candidates, owned_keys);
        rank(&mut candidates);
        candidates
    }
}
