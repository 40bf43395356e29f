//! Application state.

use std::sync::Arc;

use fitcheck_analysis::{AnalysisConfig, AnalysisOrchestrator, GeminiClient};
use fitcheck_motion_client::MotionServiceClient;
use tracing::info;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    /// Motion service probed by the readiness check
    pub motion_service: Option<Arc<MotionServiceClient>>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let analysis_config = AnalysisConfig::from_env();
        let gemini = GeminiClient::from_env()?;
        let motion = Arc::new(MotionServiceClient::from_env()?);

        info!(
            model = gemini.model(),
            motion_url = %motion.config().base_url,
            motion_policy = %analysis_config.motion_failure_policy,
            "Analysis pipeline configured"
        );

        let orchestrator =
            AnalysisOrchestrator::new(analysis_config, Arc::new(gemini), motion.clone());

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            motion_service: Some(motion),
        })
    }

    /// Create state around an existing orchestrator.
    pub fn with_orchestrator(config: ApiConfig, orchestrator: Arc<AnalysisOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
            motion_service: None,
        }
    }
}
