//! Structured analysis logging utilities.
//!
//! Provides consistent, structured logging for pipeline runs with tracing
//! spans and contextual information.

use fitcheck_models::ContentIdentity;
use tracing::{error, info, warn, Span};

use crate::orchestrator::PipelineStage;

/// Logger for one pipeline run.
///
/// Attaches the (shortened) content identity and the operation name to every
/// event so a run can be followed across the concurrent branches.
#[derive(Debug, Clone)]
pub struct AnalysisLogger {
    identity: String,
    operation: String,
}

impl AnalysisLogger {
    /// Create a new logger for a content identity and operation.
    pub fn new(identity: &ContentIdentity, operation: &str) -> Self {
        Self {
            identity: identity.short().to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a pipeline run.
    pub fn log_start(&self, message: &str) {
        info!(
            identity = %self.identity,
            operation = %self.operation,
            "Analysis started: {}", message
        );
    }

    /// Log a stage transition.
    pub fn log_stage(&self, stage: PipelineStage) {
        info!(
            identity = %self.identity,
            operation = %self.operation,
            stage = stage.as_str(),
            "Analysis stage"
        );
    }

    /// Log a warning during the run.
    pub fn log_warning(&self, stage: PipelineStage, message: &str) {
        warn!(
            identity = %self.identity,
            operation = %self.operation,
            stage = stage.as_str(),
            "Analysis warning: {}", message
        );
    }

    /// Log a fatal error for this run.
    pub fn log_error(&self, stage: PipelineStage, message: &str) {
        error!(
            identity = %self.identity,
            operation = %self.operation,
            stage = stage.as_str(),
            "Analysis error: {}", message
        );
    }

    /// Log the completion of a pipeline run.
    pub fn log_completion(&self, message: &str) {
        info!(
            identity = %self.identity,
            operation = %self.operation,
            "Analysis completed: {}", message
        );
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "analysis",
            identity = %self.identity,
            operation = %self.operation
        )
    }
}
