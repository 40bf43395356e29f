//! Workout video analysis pipeline.
//!
//! This crate provides:
//! - The generation service contract and its Gemini implementation
//! - Layered extraction of the structured record from model output
//! - Reconciliation with the deterministic motion count
//! - An identity-keyed cache with single-flight computation
//! - The orchestrator tying the two branches together

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod prompt;
pub mod reconcile;
pub mod retry;

pub use cache::{AnalysisCache, CacheStats, LookupOutcome};
pub use config::{AnalysisConfig, CacheConfig, MotionFailurePolicy};
pub use error::{AnalysisError, AnalysisResult};
pub use extract::ResponseExtractor;
pub use gemini::{ExternalAnalysisClient, GeminiClient, GeminiConfig};
pub use logging::AnalysisLogger;
pub use orchestrator::{AnalysisOrchestrator, PipelineStage};
pub use reconcile::ResultReconciler;
