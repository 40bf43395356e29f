//! Workout analysis report models.
//!
//! [`StructuredAnalysis`] is the record returned to callers and stored in the
//! cache. It is produced by response extraction with an estimated rep count,
//! then reconciled once against the motion-tracking count.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Upper bound of `performance_score`.
pub const MAX_PERFORMANCE_SCORE: f64 = 10.0;

/// Where the `repetitions` value of a report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepCountStatus {
    /// Model estimate, not yet reconciled
    #[default]
    Estimated,
    /// Overridden by the deterministic motion-tracking count
    Verified,
    /// Motion tracking failed; the model estimate was kept
    Unverified,
}

impl RepCountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimated => "estimated",
            Self::Verified => "verified",
            Self::Unverified => "unverified",
        }
    }
}

/// Form commentary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FormAnalysis {
    pub posture: String,
    pub range_of_motion: String,
    pub tempo: String,
    pub common_mistakes: Vec<String>,
}

/// Coaching feedback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct EncouragementAndTips {
    pub positive_feedback: Vec<String>,
    pub improvement_tips: Vec<String>,
    pub context: String,
}

/// Validated workout report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StructuredAnalysis {
    /// Detected exercise (e.g. "squat")
    pub exercise_name: String,
    /// Complete repetitions
    pub repetitions: u32,
    /// Estimated energy expenditure (kcal, non-negative)
    pub calories_burned: f64,
    pub form_analysis: FormAnalysis,
    /// Form and consistency score in `0..=10`
    pub performance_score: f64,
    pub encouragement_and_tips: EncouragementAndTips,
    /// Provenance of `repetitions`
    #[serde(default)]
    pub rep_count_status: RepCountStatus,
}

impl StructuredAnalysis {
    /// True when `repetitions` comes from motion tracking.
    pub fn is_rep_count_verified(&self) -> bool {
        self.rep_count_status == RepCountStatus::Verified
    }
}
