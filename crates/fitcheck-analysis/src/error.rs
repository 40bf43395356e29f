//! Analysis pipeline error types.

use fitcheck_motion_client::MotionError;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Pipeline failure.
///
/// `Clone` so one failure can be handed to every caller waiting on the same
/// in-flight computation.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Analysis service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Analysis service timed out after {0} seconds")]
    ServiceTimeout(u64),

    #[error("Malformed analysis response: {message}")]
    MalformedResponse {
        message: String,
        /// Raw model text, kept for diagnostics.
        raw: String,
    },

    #[error(transparent)]
    Motion(#[from] MotionError),

    #[error("Cache entry corrupted: {0}")]
    CacheCorruption(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn malformed_response(msg: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: msg.into(),
            raw: raw.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error kind for error documents and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidInput(_) => "invalid_input",
            AnalysisError::ServiceUnavailable(_) => "service_unavailable",
            AnalysisError::ServiceTimeout(_) => "service_timeout",
            AnalysisError::MalformedResponse { .. } => "malformed_response",
            AnalysisError::Motion(e) => e.kind(),
            AnalysisError::CacheCorruption(_) => "cache_corruption",
            AnalysisError::ConfigError(_) | AnalysisError::Internal(_) => "internal",
        }
    }

    /// Check if error is retryable.
    ///
    /// Only transport failures of the generation service qualify; a response
    /// that arrived but could not be parsed is not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::ServiceUnavailable(_) | AnalysisError::ServiceTimeout(_)
        )
    }

    /// Raw model text attached to a malformed response.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AnalysisError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
