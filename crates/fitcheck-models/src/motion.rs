//! Motion-tracking result.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Deterministic repetition count from body-landmark tracking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MotionResult {
    pub repetition_count: u32,
    /// Analyzed media length in seconds
    pub duration_seconds: f64,
}

impl MotionResult {
    pub fn new(repetition_count: u32, duration_seconds: f64) -> Self {
        Self {
            repetition_count,
            duration_seconds: duration_seconds.max(0.0),
        }
    }
}
