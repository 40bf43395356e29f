//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_LOOKUPS_TOTAL: &str = "fitcheck_cache_lookups_total";
    pub const CACHE_CORRUPTIONS_TOTAL: &str = "fitcheck_cache_corruptions_total";
    pub const PIPELINE_RUNS_TOTAL: &str = "fitcheck_pipeline_runs_total";
    pub const PIPELINE_DURATION_SECONDS: &str = "fitcheck_pipeline_duration_seconds";
    pub const MODEL_CALLS_TOTAL: &str = "fitcheck_model_calls_total";
    pub const MOTION_FALLBACKS_TOTAL: &str = "fitcheck_motion_fallbacks_total";
}

/// Record a cache lookup (`hit`, `miss` or `coalesced`).
pub fn record_cache_lookup(outcome: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a corrupted cache entry.
pub fn record_cache_corruption() {
    counter!(names::CACHE_CORRUPTIONS_TOTAL).increment(1);
}

/// Record a finished pipeline run (`ok` or an error kind).
pub fn record_pipeline_run(outcome: &'static str, duration_secs: f64) {
    counter!(names::PIPELINE_RUNS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::PIPELINE_DURATION_SECONDS).record(duration_secs);
}

/// Record one generation service attempt.
pub fn record_model_call(outcome: &'static str) {
    counter!(names::MODEL_CALLS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a motion failure downgraded to the model estimate.
pub fn record_motion_fallback(kind: &'static str) {
    counter!(names::MOTION_FALLBACKS_TOTAL, "kind" => kind).increment(1);
}
