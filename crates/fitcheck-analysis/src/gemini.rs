//! Gemini AI client for workout video analysis.
//!
//! This module provides the [`ExternalAnalysisClient`] contract and its
//! implementation against Google's Gemini `generateContent` REST API. The
//! video travels inline (base64) next to the instruction text; the reply is
//! returned verbatim for the extractor to parse.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use fitcheck_models::MediaPayload;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, AnalysisResult};

/// Gemini's cap on an inline `generateContent` request body.
pub const INLINE_REQUEST_LIMIT: usize = 20 * 1024 * 1024;

/// Generation service contract: `(media, instructions) -> raw text`.
///
/// Implementations perform exactly one request per call and never retry;
/// retry policy belongs to the orchestrator.
#[async_trait]
pub trait ExternalAnalysisClient: Send + Sync {
    /// Send the media with the instructions and return the raw reply text.
    async fn analyze(&self, media: &MediaPayload, instructions: &str) -> AnalysisResult<String>;
}

/// Gemini client configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Model name (e.g. `gemini-2.0-flash-lite`)
    pub model: String,
    pub base_url: String,
    /// Bounded wait for one request
    pub timeout: Duration,
    pub temperature: f32,
    /// Requested response MIME type; `None` lets the model choose
    pub response_mime_type: Option<String>,
    /// Largest encoded payload (base64 video plus instructions) sent inline
    pub max_inline_bytes: usize,
}

impl GeminiConfig {
    /// Create a config with defaults for everything but the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.0-flash-lite".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout: Duration::from_secs(120),
            temperature: 0.0,
            response_mime_type: Some("application/json".to_string()),
            max_inline_bytes: INLINE_REQUEST_LIMIT,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> AnalysisResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AnalysisError::config_error("GEMINI_API_KEY not set"))?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(temperature) = std::env::var("GEMINI_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.temperature = temperature;
        }
        if let Some(limit) = std::env::var("GEMINI_MAX_INLINE_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_inline_bytes = limit;
        }
        Ok(config)
    }
}

/// Gemini API client.
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    /// Create a new Gemini client.
    pub fn new(config: GeminiConfig) -> AnalysisResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnalysisError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> AnalysisResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request(&self, media: &MediaPayload, instructions: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(instructions.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: media.media_type().mime_type().to_string(),
                            data: BASE64.encode(media.data()),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: self.config.response_mime_type.clone(),
            },
        }
    }

    /// Reject media whose encoded request would exceed the inline limit.
    fn check_inline_size(&self, media: &MediaPayload, instructions: &str) -> AnalysisResult<()> {
        let encoded = base64::encoded_len(media.len(), true)
            .unwrap_or(usize::MAX)
            .saturating_add(instructions.len());
        if encoded > self.config.max_inline_bytes {
            return Err(AnalysisError::invalid_input(format!(
                "Video too large for analysis: {} bytes encoded, limit is {}",
                encoded, self.config.max_inline_bytes
            )));
        }
        Ok(())
    }

    fn transport_error(&self, error: reqwest::Error) -> AnalysisError {
        if error.is_timeout() {
            AnalysisError::ServiceTimeout(self.config.timeout.as_secs())
        } else {
            AnalysisError::service_unavailable(format!(
                "Gemini API request failed: {}",
                error.without_url()
            ))
        }
    }
}

#[async_trait]
impl ExternalAnalysisClient for GeminiClient {
    async fn analyze(&self, media: &MediaPayload, instructions: &str) -> AnalysisResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        self.check_inline_size(media, instructions)?;
        let request = self.build_request(media, instructions);

        debug!(
            model = %self.config.model,
            bytes = media.len(),
            media_type = %media.media_type(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %error_text, "Gemini API error response");
            return Err(status_error(status));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::ServiceTimeout(self.config.timeout.as_secs())
            } else {
                AnalysisError::service_unavailable(format!("Failed to decode Gemini response: {}", e))
            }
        })?;

        let text: String = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AnalysisError::service_unavailable("No content in Gemini response"))?;

        info!(model = %self.config.model, chars = text.len(), "Received Gemini response");
        Ok(text)
    }
}

/// Map a non-2xx status. Quota, timeout and server errors are transient;
/// any other client error means the request itself was rejected.
fn status_error(status: StatusCode) -> AnalysisError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            AnalysisError::service_unavailable(format!("Gemini API returned {}", status))
        }
        s if s.is_client_error() => {
            AnalysisError::invalid_input(format!("Gemini API rejected the request ({})", status))
        }
        _ => AnalysisError::service_unavailable(format!("Gemini API returned {}", status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitcheck_models::MediaType;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout: Duration) -> GeminiClient {
        let mut config = GeminiConfig::new("test-key");
        config.base_url = server.uri();
        config.timeout = timeout;
        GeminiClient::new(config).unwrap()
    }

    fn media() -> MediaPayload {
        MediaPayload::new(b"video".to_vec(), MediaType::Mp4)
    }

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    #[test]
    fn test_request_shape() {
        let client = GeminiClient::new(GeminiConfig::new("k")).unwrap();
        let request = client.build_request(&media(), "instructions");
        let json = serde_json::to_value(&request).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "instructions");
        assert!(parts[0].get("inlineData").is_none());
        assert_eq!(parts[1]["inlineData"]["mimeType"], "video/mp4");
        assert_eq!(parts[1]["inlineData"]["data"], BASE64.encode(b"video"));
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn test_returns_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash-lite:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("```json\n{}\n```")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, Duration::from_secs(5))
            .analyze(&media(), "prompt")
            .await
            .unwrap();
        assert_eq!(text, "```json\n{}\n```");
    }

    #[tokio::test]
    async fn test_quota_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, Duration::from_secs(5))
            .analyze(&media(), "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceUnavailable(ref m) if m.contains("429")));
        assert!(!err.to_string().contains("RESOURCE_EXHAUSTED"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejected_request_is_invalid_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "status": "INVALID_ARGUMENT",
                    "message": "Request payload size exceeds the limit: 20971520 bytes."
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, Duration::from_secs(5))
            .analyze(&media(), "prompt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(!err.is_retryable());
        assert!(!err.to_string().contains("payload size"));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend stack trace"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, Duration::from_secs(5))
            .analyze(&media(), "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceUnavailable(_)));
        assert!(!err.to_string().contains("stack trace"));
    }

    #[tokio::test]
    async fn test_oversized_media_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("{}")))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = GeminiConfig::new("test-key");
        config.base_url = server.uri();
        config.max_inline_bytes = 64;
        let client = GeminiClient::new(config).unwrap();

        let err = client
            .analyze(&MediaPayload::new(vec![0u8; 60], MediaType::Mp4), "prompt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_slow_reply_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("{}"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, Duration::from_millis(200))
            .analyze(&media(), "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceTimeout(_)));
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, Duration::from_secs(5))
            .analyze(&media(), "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceUnavailable(_)));
    }
}
