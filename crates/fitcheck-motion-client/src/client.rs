//! Motion service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use fitcheck_models::{MediaPayload, MotionResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::counter::MotionCounter;
use crate::error::{MotionClientResult, MotionError};
use crate::types::{CountResponse, HealthResponse, ServiceErrorBody};

/// First retry delay; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Upper bound on a single retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Configuration for the motion client.
#[derive(Debug, Clone)]
pub struct MotionClientConfig {
    /// Base URL of the motion service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries on connection failures
    pub max_retries: u32,
    /// Timeout for the `/health` probe
    pub health_timeout: Duration,
}

impl Default for MotionClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(300), // 5 minutes for landmark tracking
            max_retries: 1,
            health_timeout: Duration::from_secs(5),
        }
    }
}

impl MotionClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("MOTION_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("MOTION_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_retries: std::env::var("MOTION_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            health_timeout: Duration::from_secs(
                std::env::var("MOTION_SERVICE_HEALTH_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

/// Client for the motion-tracking service.
pub struct MotionServiceClient {
    http: Client,
    config: MotionClientConfig,
}

impl MotionServiceClient {
    /// Create a new motion client.
    pub fn new(config: MotionClientConfig) -> MotionClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MotionError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MotionClientResult<Self> {
        Self::new(MotionClientConfig::from_env())
    }

    pub fn config(&self) -> &MotionClientConfig {
        &self.config
    }

    /// Check if the motion service is healthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);

        match self
            .http
            .get(&url)
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthResponse>().await {
                    Ok(health) => health.status == "healthy" || health.status == "ok",
                    Err(e) => {
                        warn!("Motion service health response invalid: {}", e);
                        false
                    }
                }
            }
            Ok(response) => {
                warn!("Motion service health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Motion service health check error: {}", e);
                false
            }
        }
    }

    /// Submit the media once and decode the count.
    async fn request_count(&self, media: &MediaPayload) -> MotionClientResult<MotionResult> {
        let url = format!("{}/count", self.config.base_url);
        let filename = format!("upload.{}", media.media_type().extension());

        let part = Part::bytes(media.data().to_vec())
            .file_name(filename)
            .mime_str(media.media_type().mime_type())
            .map_err(|e| MotionError::RequestFailed(format!("Invalid media type: {}", e)))?;
        let form = Form::new().part("video", part);

        debug!(bytes = media.len(), "Sending repetition count request to {}", url);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let count: CountResponse = response
            .json()
            .await
            .map_err(|e| MotionError::InvalidResponse(format!("Failed to decode count: {}", e)))?;

        Ok(count.into())
    }

    fn transport_error(&self, error: reqwest::Error) -> MotionError {
        if error.is_timeout() {
            MotionError::Timeout(self.config.timeout.as_secs())
        } else {
            MotionError::ServiceUnavailable(error.to_string())
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MotionClientResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MotionClientResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = retry_delay(attempt);
                    warn!(
                        "Motion request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| MotionError::RequestFailed("Unknown error".to_string())))
    }
}

#[async_trait]
impl MotionCounter for MotionServiceClient {
    async fn count(&self, media: &MediaPayload) -> MotionClientResult<MotionResult> {
        self.with_retry(|| self.request_count(media)).await
    }
}

/// Exponential backoff for the given zero-based attempt, capped.
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY)
}

/// Map a non-2xx response to an error, preferring the service's own message.
fn status_error(status: StatusCode, body: &str) -> MotionError {
    let message = serde_json::from_str::<ServiceErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| format!("Motion service returned {}: {}", status, body));

    match status {
        StatusCode::UNSUPPORTED_MEDIA_TYPE => MotionError::UnsupportedFormat(message),
        StatusCode::UNPROCESSABLE_ENTITY => MotionError::UnanalyzableMedia(message),
        s if s.is_server_error() => MotionError::ServiceUnavailable(message),
        _ => MotionError::RequestFailed(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitcheck_models::MediaType;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MotionServiceClient {
        MotionServiceClient::new(MotionClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries: 1,
            health_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn media() -> MediaPayload {
        MediaPayload::new(b"fake mp4 bytes".to_vec(), MediaType::Mp4)
    }

    #[test]
    fn test_config_defaults() {
        let config = MotionClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.health_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(5), RETRY_MAX_DELAY);
        assert_eq!(retry_delay(54), RETRY_MAX_DELAY);
        assert_eq!(retry_delay(u32::MAX), RETRY_MAX_DELAY);
    }

    #[tokio::test]
    async fn test_count_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "repetition_count": 12,
                "duration_seconds": 30.0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).count(&media()).await.unwrap();
        assert_eq!(result, MotionResult::new(12, 30.0));
    }

    #[tokio::test]
    async fn test_unprocessable_maps_to_unanalyzable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/count"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"error": "no person detected"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).count(&media()).await.unwrap_err();
        match err {
            MotionError::UnanalyzableMedia(msg) => assert_eq!(msg, "no person detected"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_media_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/count"))
            .respond_with(ResponseTemplate::new(415).set_body_string("cannot decode"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).count(&media()).await.unwrap_err();
        assert!(matches!(err, MotionError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_server_error_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/count"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = client_for(&server).count(&media()).await.unwrap_err();
        assert!(matches!(err, MotionError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/count"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).count(&media()).await.unwrap_err();
        assert!(matches!(err, MotionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "version": "1.2.0"
            })))
            .mount(&server)
            .await;

        assert!(client_for(&server).health_check().await);
    }

    #[tokio::test]
    async fn test_stalled_health_check_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "ok"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = MotionServiceClient::new(MotionClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(300),
            max_retries: 1,
            health_timeout: Duration::from_millis(200),
        })
        .unwrap();

        let started = std::time::Instant::now();
        assert!(!client.health_check().await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
