//! Motion service request/response types.

use fitcheck_models::MotionResult;
use serde::{Deserialize, Serialize};

/// Successful count response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub repetition_count: u32,
    pub duration_seconds: f64,
}

impl From<CountResponse> for MotionResult {
    fn from(response: CountResponse) -> Self {
        MotionResult::new(response.repetition_count, response.duration_seconds)
    }
}

/// Error body returned by the service on 4xx/5xx.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceErrorBody {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}
