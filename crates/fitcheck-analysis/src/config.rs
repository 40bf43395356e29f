//! Pipeline configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// What the orchestrator does when motion tracking fails.
///
/// There is no silent default: [`AnalysisConfig::from_env`] logs a warning
/// when `MOTION_FAILURE_POLICY` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionFailurePolicy {
    /// Fail the whole request.
    Fail,
    /// Keep the model's rep estimate and mark it unverified.
    FallbackToEstimate,
}

impl MotionFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::FallbackToEstimate => "fallback",
        }
    }
}

impl fmt::Display for MotionFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" | "strict" => Ok(Self::Fail),
            "fallback" | "fallback_to_estimate" | "degrade" => Ok(Self::FallbackToEstimate),
            other => Err(format!("unknown motion failure policy '{}'", other)),
        }
    }
}

/// Cache bounds.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached reports
    pub max_entries: u64,
    /// Lifetime of a cached report
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            ttl: Duration::from_secs(6 * 3600),
        }
    }
}

/// Analysis pipeline configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Upper bound on one generation service call
    pub model_timeout: Duration,
    /// Retries after a transient generation service failure
    pub model_max_retries: u32,
    /// Base delay for exponential backoff between model attempts
    pub model_retry_base_delay: Duration,
    /// Upper bound on motion tracking
    pub motion_timeout: Duration,
    /// Behavior when motion tracking fails
    pub motion_failure_policy: MotionFailurePolicy,
    pub cache: CacheConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(120),
            model_max_retries: 1,
            model_retry_base_delay: Duration::from_millis(500),
            motion_timeout: Duration::from_secs(300),
            motion_failure_policy: MotionFailurePolicy::Fail,
            cache: CacheConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let motion_failure_policy = match std::env::var("MOTION_FAILURE_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}; using 'fail'", e);
                MotionFailurePolicy::Fail
            }),
            Err(_) => {
                warn!("MOTION_FAILURE_POLICY not set; motion tracking failures will fail the request");
                MotionFailurePolicy::Fail
            }
        };

        Self {
            model_timeout: Duration::from_secs(
                std::env::var("MODEL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            model_max_retries: std::env::var("MODEL_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            model_retry_base_delay: Duration::from_millis(
                std::env::var("MODEL_RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            motion_timeout: Duration::from_secs(
                std::env::var("MOTION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            motion_failure_policy,
            cache: CacheConfig {
                max_entries: std::env::var("CACHE_MAX_ENTRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(256),
                ttl: Duration::from_secs(
                    std::env::var("CACHE_TTL_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(6 * 3600),
                ),
            },
        }
    }

    /// Set the motion failure policy.
    pub fn with_motion_failure_policy(mut self, policy: MotionFailurePolicy) -> Self {
        self.motion_failure_policy = policy;
        self
    }
}
