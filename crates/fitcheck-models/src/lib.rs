//! Shared data models for the FitCheck backend.
//!
//! This crate provides Serde-serializable types for:
//! - Uploaded media and its content identity
//! - Workout analysis reports
//! - Motion-tracking results
//! - Error documents

pub mod analysis;
pub mod error_body;
pub mod media;
pub mod motion;

// Re-export common types
pub use analysis::{
    EncouragementAndTips, FormAnalysis, RepCountStatus, StructuredAnalysis, MAX_PERFORMANCE_SCORE,
};
pub use error_body::ErrorBody;
pub use media::{AnalysisRequest, ContentIdentity, MediaPayload, MediaType, MediaTypeError};
pub use motion::MotionResult;
