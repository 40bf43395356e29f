//! Reconciliation of the model record with the motion count.

use fitcheck_models::{MotionResult, RepCountStatus, StructuredAnalysis};
use tracing::debug;

/// Merges motion tracking output into a model record.
///
/// The motion count is deterministic and always wins over the model's
/// estimate. Calories are left as the model estimated them, even when the
/// repetition count changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultReconciler;

impl ResultReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Overwrite `repetitions` with the motion count and mark it verified.
    pub fn reconcile(
        &self,
        mut structured: StructuredAnalysis,
        motion: &MotionResult,
    ) -> StructuredAnalysis {
        if structured.repetitions != motion.repetition_count {
            debug!(
                model_estimate = structured.repetitions,
                motion_count = motion.repetition_count,
                duration_seconds = motion.duration_seconds,
                "Overriding model repetition estimate"
            );
        }

        structured.repetitions = motion.repetition_count;
        structured.rep_count_status = RepCountStatus::Verified;
        structured
    }

    /// Keep the model estimate, flagged as unverified.
    pub fn mark_unverified(&self, mut structured: StructuredAnalysis) -> StructuredAnalysis {
        structured.rep_count_status = RepCountStatus::Unverified;
        structured
    }
}
