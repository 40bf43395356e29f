//! Motion client error types.

use thiserror::Error;

pub type MotionClientResult<T> = Result<T, MotionError>;

#[derive(Debug, Clone, Error)]
pub enum MotionError {
    /// No landmark sequence could be extracted (corrupt file, no visible subject).
    #[error("Media could not be analyzed: {0}")]
    UnanalyzableMedia(String),

    /// Container or codec cannot be decoded.
    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("Motion analysis timed out after {0} seconds")]
    Timeout(u64),

    #[error("Motion service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl MotionError {
    /// Stable kind string used in error documents.
    pub fn kind(&self) -> &'static str {
        match self {
            MotionError::UnanalyzableMedia(_) => "unanalyzable_media",
            MotionError::UnsupportedFormat(_) => "unsupported_format",
            MotionError::Timeout(_) => "motion_timeout",
            MotionError::ServiceUnavailable(_)
            | MotionError::RequestFailed(_)
            | MotionError::InvalidResponse(_) => "motion_unavailable",
        }
    }

    /// Check if error is retryable (connection-level failures only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, MotionError::ServiceUnavailable(_))
    }
}
