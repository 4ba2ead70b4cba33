use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Closed genre label set offered to the vision model.
pub const GENRES: &[&str] = &[
    "Picture Book",
    "Early Reader",
    "Chapter Book",
    "Fantasy",
    "Science Fiction",
    "Mystery",
    "Adventure",
    "Historical Fiction",
    "Realistic Fiction",
    "Romance",
    "Horror",
    "Graphic Novel",
    "Poetry",
    "Biography",
    "History",
    "Science",
    "Reference",
    "Non-Fiction",
];

/// Closed age-range label set offered to the vision model.
pub const AGE_RANGES: &[&str] = &["0-3", "4-7", "8-12", "13-17", "Adult"];

/// Match a free-form label against a closed set, case-insensitively.
pub fn canonical_label(value: &str, allowed: &[&'static str]) -> Option<String> {
    let needle = value.trim();
    allowed
        .iter()
        .find(|label| label.eq_ignore_ascii_case(needle))
        .map(|label| label.to_string())
}

/// Coerce a series number from a JSON number or the first digit run of a string.
pub fn coerce_series_number(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => first_digit_run(s),
        _ => None,
    }
}

fn first_digit_run(s: &str) -> Option<u32> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Which detection path produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectionStrategy {
    AiOnly,
    Hybrid,
}

/// A book as read off the photo by the vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RawGuess {
    #[garde(length(chars, min = 2, max = 500))]
    pub title: String,

    #[garde(skip)]
    pub author: Option<String>,

    #[garde(skip)]
    pub series: Option<String>,

    #[garde(skip)]
    pub series_number: Option<u32>,

    #[garde(skip)]
    pub genre: Option<String>,

    #[garde(skip)]
    pub age_range: Option<String>,
}

impl RawGuess {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: None,
            series: None,
            series_number: None,
            genre: None,
            age_range: None,
        }
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Best catalog match returned by the metadata provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    pub title: String,
    pub author: String,
    pub series: Option<String>,
    pub series_number: Option<u32>,
    pub genre: Option<String>,
    pub age_range: Option<String>,
    pub publisher: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<u32>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub isbn: Option<String>,
    /// Match confidence, 0-100.
    pub confidence: u8,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

/// A classified, deduplicated book candidate. Lives only inside a job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookCandidate {
    pub title: String,
    pub author: String,
    pub series: Option<String>,
    pub series_number: Option<u32>,
    pub genre: Option<String>,
    pub age_range: Option<String>,
    pub publisher: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<u32>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub isbn: Option<String>,
    pub confidence_tier: ConfidenceTier,
    pub confidence_score: u8,
    pub already_owned: bool,
}

/// Terminal payload of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub books: Vec<BookCandidate>,
    pub count: usize,
    pub strategy: DetectionStrategy,
    pub duration_ms: u64,
}

impl DetectionResult {
    pub fn new(books: Vec<BookCandidate>, strategy: DetectionStrategy, duration_ms: u64) -> Self {
        Self {
            count: books.len(),
            books,
            strategy,
            duration_ms,
        }
    }
}
