use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Reading direction of a text fragment on the photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    fn label(self) -> &'static str {
        match self {
            Orientation::Horizontal => "horizontal",
            Orientation::Vertical => "vertical",
        }
    }
}

/// A word or line of text found by OCR, with its bounding box in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl TextFragment {
    pub fn orientation(&self) -> Orientation {
        if self.height > self.width {
            Orientation::Vertical
        } else {
            Orientation::Horizontal
        }
    }

    fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// Fragments that sit close enough vertically to be read as one spine.
#[derive(Debug, Clone, PartialEq)]
pub struct SpineGroup {
    pub text: String,
    pub top: f32,
    pub left: f32,
    pub orientation: Orientation,
}

/// Cluster fragments by vertical proximity.
///
/// Fragments are ordered by their vertical center; a new group starts whenever
/// the next center is more than `threshold_px` below the current group's anchor.
/// This is a positional heuristic, not a spine segmentation.
pub fn group_fragments(fragments: &[TextFragment], threshold_px: f32) -> Vec<SpineGroup> {
    let mut sorted: Vec<&TextFragment> = fragments
        .iter()
        .filter(|f| !f.text.trim().is_empty())
        .collect();
    sorted.sort_by(|a, b| a.center_y().total_cmp(&b.center_y()));

    let mut clusters: Vec<Vec<&TextFragment>> = Vec::new();
    for fragment in sorted {
        let starts_new = clusters.last().map_or(true, |cluster| {
            (fragment.center_y() - cluster[0].center_y()).abs() > threshold_px
        });
        if starts_new {
            clusters.push(vec![fragment]);
        } else if let Some(cluster) = clusters.last_mut() {
            cluster.push(fragment);
        }
    }

    clusters
        .into_iter()
        .map(|mut cluster| {
            cluster.sort_by(|a, b| a.x.total_cmp(&b.x));
            let vertical = cluster
                .iter()
                .filter(|f| f.orientation() == Orientation::Vertical)
                .count();
            SpineGroup {
                text: cluster
                    .iter()
                    .map(|f| f.text.trim())
                    .collect::<Vec<_>>()
                    .join(" "),
                top: cluster.iter().map(|f| f.y).fold(f32::MAX, f32::min),
                left: cluster.iter().map(|f| f.x).fold(f32::MAX, f32::min),
                orientation: if vertical * 2 > cluster.len() {
                    Orientation::Vertical
                } else {
                    Orientation::Horizontal
                },
            }
        })
        .collect()
}

/// Render grouped text as prompt context for the vision model.
pub fn describe_groups(groups: &[SpineGroup]) -> String {
    groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            format!(
                "Group {} (y={:.0}, x={:.0}, {}): {}",
                i + 1,
                g.top,
                g.left,
                g.orientation.label(),
                g.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text extraction pass run before the vision model in hybrid mode.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image_bytes: &[u8]) -> Result<Vec<TextFragment>, OcrError>;
}

/// Client for Google Cloud Vision text detection.
pub struct CloudVisionOcrClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<AnnotateError>,
}

#[derive(Deserialize)]
struct AnnotateError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextAnnotation {
    description: String,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

#[derive(Deserialize)]
struct Vertex {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

impl CloudVisionOcrClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, OcrError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

fn fragments_from_response(body: AnnotateResponse) -> Result<Vec<TextFragment>, OcrError> {
    let Some(first) = body.responses.into_iter().next() else {
        return Ok(Vec::new());
    };
    if let Some(err) = first.error {
        return Err(OcrError::Provider(err.message));
    }

    // The first annotation is the full text block; the rest are individual words.
    let words = first.text_annotations.into_iter().skip(1);
    Ok(words
        .filter_map(|annotation| {
            let vertices = annotation.bounding_poly?.vertices;
            if vertices.is_empty() {
                return None;
            }
            let min_x = vertices.iter().map(|v| v.x).fold(f32::MAX, f32::min);
            let max_x = vertices.iter().map(|v| v.x).fold(f32::MIN, f32::max);
            let min_y = vertices.iter().map(|v| v.y).fold(f32::MAX, f32::min);
            let max_y = vertices.iter().map(|v| v.y).fold(f32::MIN, f32::max);
            Some(TextFragment {
                text: annotation.description,
                x: min_x,
                y: min_y,
                width: max_x - min_x,
                height: max_y - min_y,
            })
        })
        .collect())
}

#[async_trait]
impl TextExtractor for CloudVisionOcrClient {
    async fn extract_text(&self, image_bytes: &[u8]) -> Result<Vec<TextFragment>, OcrError> {
        let request_body = serde_json::json!({
            "requests": [{
                "image": { "content": base64::engine::general_purpose::STANDARD.encode(image_bytes) },
                "features": [{ "type": "TEXT_DETECTION" }]
            }]
        });

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Status(status));
        }

        let body: AnnotateResponse = response.json().await?;
        fragments_from_response(body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR request timed out")]
    Timeout,

    #[error("OCR request failed: {0}")]
    Http(reqwest::Error),

    #[error("OCR service returned HTTP {0}")]
    Status(StatusCode),

    #[error("OCR provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for OcrError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OcrError::Timeout
        } else {
            OcrError::Http(err)
        }
    }
}
