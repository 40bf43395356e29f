//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fitcheck_analysis::AnalysisError;
use fitcheck_models::{ErrorBody, MediaTypeError};
use fitcheck_motion_client::MotionError;
use thiserror::Error;
use tracing::{error, warn};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    /// Internal failure with details withheld from the client.
    #[error("An internal error occurred")]
    Internal,

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

impl ApiError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Hide internal error details in production. The original error is
    /// logged before it is dropped.
    pub fn redact_internal(self, production: bool) -> Self {
        if production && self.is_internal() {
            error!(error = %self, "Internal error details withheld from response");
            ApiError::Internal
        } else {
            self
        }
    }

    /// Stable error kind for the error document.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::Internal => "internal",
            ApiError::Analysis(e) => e.kind(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Analysis(e) => match e {
                AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AnalysisError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                AnalysisError::ServiceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                AnalysisError::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
                AnalysisError::Motion(m) => match m {
                    MotionError::UnanalyzableMedia(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    MotionError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    MotionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    MotionError::ServiceUnavailable(_)
                    | MotionError::RequestFailed(_)
                    | MotionError::InvalidResponse(_) => StatusCode::SERVICE_UNAVAILABLE,
                },
                AnalysisError::CacheCorruption(_)
                | AnalysisError::ConfigError(_)
                | AnalysisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<MediaTypeError> for ApiError {
    fn from(e: MediaTypeError) -> Self {
        ApiError::InvalidInput(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ApiError::Analysis(e) = &self {
            if let Some(raw) = e.raw_response() {
                warn!(raw = %raw, "Returning malformed_response; raw model text withheld");
            }
        }
        if self.is_internal() {
            error!(error = %self, "Request failed with internal error");
        }

        (status, Json(ErrorBody::new(self.kind(), self.to_string()))).into_response()
    }
}
