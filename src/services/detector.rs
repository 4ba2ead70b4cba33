//! Book detection from a single bookshelf photo.
//!
//! Two strategies:
//! - **AI-only**: the photo and a fixed instruction go straight to the vision model.
//! - **Hybrid**: an OCR pass runs first; fragments are grouped into likely spines
//!   and passed to the model alongside the photo. Any OCR failure, or an OCR pass
//!   that finds no text, degrades to AI-only.

use garde::Validate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::models::book::{
    canonical_label, coerce_series_number, DetectionStrategy, RawGuess, AGE_RANGES, GENRES,
};
use crate::services::ocr::{describe_groups, group_fragments, OcrError, SpineGroup, TextExtractor};
use crate::services::vision::{VisionError, VisionModel};

/// Guesses from one detection run and the strategy that produced them.
#[derive(Debug, Clone)]
pub struct Detection {
    pub guesses: Vec<RawGuess>,
    pub strategy: DetectionStrategy,
}

pub struct BookDetector {
    model: Arc<dyn VisionModel>,
    ocr: Option<Arc<dyn TextExtractor>>,
    strategy: DetectionStrategy,
    spine_group_threshold_px: f32,
    ocr_timeout: Duration,
    model_timeout: Duration,
}

impl BookDetector {
    pub fn new(
        model: Arc<dyn VisionModel>,
        ocr: Option<Arc<dyn TextExtractor>>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            model,
            ocr,
            strategy: settings.strategy,
            spine_group_threshold_px: settings.spine_group_threshold_px,
            ocr_timeout: settings.ocr_timeout,
            model_timeout: settings.model_timeout,
        }
    }

    /// Whether an OCR pass runs before the model call.
    pub fn uses_ocr(&self) -> bool {
        self.strategy == DetectionStrategy::Hybrid && self.ocr.is_some()
    }

    /// Run OCR and group the fragments into spines.
    ///
    /// Returns `None` when OCR is disabled, fails, or finds no text.
    pub async fn read_spines(&self, image_bytes: &[u8]) -> Option<Vec<SpineGroup>> {
        if !self.uses_ocr() {
            return None;
        }
        let ocr = self.ocr.as_ref()?;

        let fragments = match tokio::time::timeout(self.ocr_timeout, ocr.extract_text(image_bytes)).await {
            Ok(Ok(fragments)) => fragments,
            Ok(Err(e)) => {
                warn!(error = %e, "OCR pass failed, falling back to AI-only detection");
                return None;
            }
            Err(_) => {
                warn!(error = %OcrError::Timeout, "OCR pass timed out, falling back to AI-only detection");
                return None;
            }
        };

        if fragments.is_empty() {
            info!("OCR found no text, falling back to AI-only detection");
            return None;
        }

        let groups = group_fragments(&fragments, self.spine_group_threshold_px);
        debug!(fragments = fragments.len(), groups = groups.len(), "Grouped OCR fragments");
        Some(groups)
    }

    /// Ask the vision model for the books on the shelf.
    pub async fn identify(
        &self,
        image_bytes: &[u8],
        spines: Option<&[SpineGroup]>,
    ) -> Result<Vec<RawGuess>, DetectError> {
        let prompt = build_prompt(spines);

        let text = tokio::time::timeout(self.model_timeout, self.model.complete(image_bytes, &prompt))
            .await
            .map_err(|_| DetectError::Vision(VisionError::Timeout))??;

        let guesses = parse_guesses(&text)?;
        info!(guesses = guesses.len(), with_ocr = spines.is_some(), "Vision model detection complete");
        Ok(guesses)
    }

    /// OCR (when enabled) followed by the model call, in one step.
    ///
    /// For callers that need no progress between the two passes. The job
    /// orchestrator calls [`Self::read_spines`] and [`Self::identify`]
    /// separately so it can checkpoint between them.
    pub async fn detect(&self, image_bytes: &[u8]) -> Result<Detection, DetectError> {
        let spines = self.read_spines(image_bytes).await;
        let guesses = self.identify(image_bytes, spines.as_deref()).await?;
        Ok(Detection {
            guesses,
            strategy: if spines.is_some() {
                DetectionStrategy::Hybrid
            } else {
                DetectionStrategy::AiOnly
            },
        })
    }
}

/// Instruction sent with the photo. Enumerates the closed label sets.
pub fn build_prompt(spines: Option<&[SpineGroup]>) -> String {
    let mut prompt = format!(
        concat!(
            "You are looking at a photo of a bookshelf. Identify every book whose spine or cover is visible. ",
            "Return ONLY a JSON array. Each element is an object with the fields: ",
            "\"title\" (string, required), \"author\" (string or null), \"series\" (string or null), ",
            "\"seriesNumber\" (number or null), \"genre\" (one of: {}; or null), ",
            "\"ageRange\" (one of: {}; or null). ",
            "Do not invent books you cannot read. If no books are visible return []."
        ),
        GENRES.join(", "),
        AGE_RANGES.join(", "),
    );

    if let Some(groups) = spines.filter(|g| !g.is_empty()) {
        prompt.push_str(
            "\n\nText read from the photo by OCR, grouped by position (each group is likely one spine):\n",
        );
        prompt.push_str(&describe_groups(groups));
        prompt.push_str("\nUse this text to anchor titles and authors to the spines you can see.");
    }

    prompt
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Language tag, e.g. ```json, with or without a newline after it.
    let body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()).trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn extract_array(text: &str) -> Result<Vec<Value>, DetectError> {
    let body = strip_code_fences(text);

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match value {
            Value::Array(items) => return Ok(items),
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.remove("books") {
                    return Ok(items);
                }
            }
            _ => {}
        }
    }

    // Model wrapped the array in prose.
    let start = body.find('[');
    let end = body.rfind(']');
    match (start, end) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end])
            .map_err(|e| DetectError::MalformedResponse(e.to_string())),
        _ => Err(DetectError::MalformedResponse(
            "no JSON array in model response".to_string(),
        )),
    }
}

fn text_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn guess_from_value(item: &Value) -> Option<RawGuess> {
    let guess = RawGuess {
        title: text_field(item, &["title"])?,
        author: text_field(item, &["author"]),
        series: text_field(item, &["series"]),
        series_number: ["seriesNumber", "series_number"]
            .iter()
            .filter_map(|key| item.get(*key))
            .find_map(coerce_series_number),
        genre: text_field(item, &["genre"]).and_then(|g| canonical_label(&g, GENRES)),
        age_range: text_field(item, &["ageRange", "age_range"])
            .and_then(|a| canonical_label(&a, AGE_RANGES)),
    };

    match guess.validate() {
        Ok(()) => Some(guess),
        Err(report) => {
            debug!(title = %guess.title, error = %report, "Dropping unusable guess");
            None
        }
    }
}

/// Parse the model's answer into guesses, dropping entries without a usable title.
pub fn parse_guesses(text: &str) -> Result<Vec<RawGuess>, DetectError> {
    Ok(extract_array(text)?
        .iter()
        .filter_map(guess_from_value)
        .collect())
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("Could not parse model response: {0}")]
    MalformedResponse(String),
}
