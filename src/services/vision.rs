use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// A vision-capable language model: image plus instruction in, text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, image_bytes: &[u8], prompt: &str) -> Result<String, VisionError>;
}

/// Client for a Cloudflare Workers AI vision model.
pub struct WorkersAiClient {
    http: Client,
    api_base: String,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct WorkersAiResponse {
    result: WorkersAiResult,
}

#[derive(Deserialize)]
struct WorkersAiResult {
    #[serde(alias = "description")]
    response: String,
}

impl WorkersAiClient {
    pub fn new(
        api_base: &str,
        account_id: &str,
        api_token: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl VisionModel for WorkersAiClient {
    async fn complete(&self, image_bytes: &[u8], prompt: &str) -> Result<String, VisionError> {
        let url = format!(
            "{}/accounts/{}/ai/run/{}",
            self.api_base, self.account_id, self.model
        );

        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image_bytes),
            "prompt": prompt,
            "max_tokens": 2048
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VisionError::RateLimited);
        }
        if status.is_server_error() {
            return Err(VisionError::Unavailable(status));
        }
        if !status.is_success() {
            return Err(VisionError::Status(status));
        }

        let body: WorkersAiResponse = response.json().await?;
        if body.result.response.trim().is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(body.result.response)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Vision model request timed out")]
    Timeout,

    #[error("Vision model request failed: {0}")]
    Http(reqwest::Error),

    #[error("Vision model rate limited")]
    RateLimited,

    #[error("Vision model unavailable (HTTP {0})")]
    Unavailable(StatusCode),

    #[error("Vision model returned HTTP {0}")]
    Status(StatusCode),

    #[error("Vision model returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for VisionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VisionError::Timeout
        } else {
            VisionError::Http(err)
        }
    }
}
