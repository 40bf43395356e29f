//! Repetition counting contract.

use async_trait::async_trait;
use fitcheck_models::{MediaPayload, MotionResult};

use crate::error::MotionClientResult;

/// Deterministic repetition counter.
///
/// Implementations must be pure functions of the media bytes: the same bytes
/// always yield the same count. That determinism is what makes this source
/// authoritative over the model's estimate.
#[async_trait]
pub trait MotionCounter: Send + Sync {
    /// Count repetitions in the given media.
    async fn count(&self, media: &MediaPayload) -> MotionClientResult<MotionResult>;
}
