//! Analysis orchestration.
//!
//! One run per uploaded video:
//!
//! ```text
//! CacheCheck ──► CacheHit
//!     │
//!     ▼
//! Dispatch ──┬─► ExternalCallInFlight ──► ExtractionPending ──┐
//!            └─► motion count (concurrently) ─────────────────┤
//!                                                             ▼
//!                                  MotionPending ──► Reconciling ──► Cached
//! ```
//!
//! The model call and the motion count run concurrently and reconciliation
//! waits for both. Uncached work runs through [`AnalysisCache::get_or_compute`],
//! so concurrent uploads of the same bytes share one computation.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use fitcheck_models::{AnalysisRequest, MediaPayload, MotionResult, StructuredAnalysis};
use fitcheck_motion_client::{MotionCounter, MotionError};
use tracing::{warn, Instrument};

use crate::cache::{AnalysisCache, LookupOutcome};
use crate::config::{AnalysisConfig, MotionFailurePolicy};
use crate::error::{AnalysisError, AnalysisResult};
use crate::extract::ResponseExtractor;
use crate::gemini::ExternalAnalysisClient;
use crate::logging::AnalysisLogger;
use crate::metrics;
use crate::prompt::WORKOUT_ANALYSIS_PROMPT;
use crate::reconcile::ResultReconciler;
use crate::retry::{retry_async, RetryConfig};

const OPERATION: &str = "workout_analysis";

/// Pipeline stages, recorded in logs and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    CacheCheck,
    CacheHit,
    Dispatch,
    ExternalCallInFlight,
    ExternalFailed,
    ExtractionPending,
    ExtractionFailed,
    MotionPending,
    MotionFailed,
    Reconciling,
    Cached,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheCheck => "cache_check",
            Self::CacheHit => "cache_hit",
            Self::Dispatch => "dispatch",
            Self::ExternalCallInFlight => "external_call_in_flight",
            Self::ExternalFailed => "external_failed",
            Self::ExtractionPending => "extraction_pending",
            Self::ExtractionFailed => "extraction_failed",
            Self::MotionPending => "motion_pending",
            Self::MotionFailed => "motion_failed",
            Self::Reconciling => "reconciling",
            Self::Cached => "cached",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The uncached part of a run. Owned by an `Arc` so it can move onto the
/// cache's computation task.
struct Pipeline {
    config: AnalysisConfig,
    model: Arc<dyn ExternalAnalysisClient>,
    motion: Arc<dyn MotionCounter>,
    extractor: ResponseExtractor,
    reconciler: ResultReconciler,
}

impl Pipeline {
    async fn execute(
        self: Arc<Self>,
        request: AnalysisRequest,
        logger: AnalysisLogger,
    ) -> AnalysisResult<StructuredAnalysis> {
        logger.log_stage(PipelineStage::Dispatch);

        let (model, motion) = tokio::join!(
            self.model_branch(&request.media, &logger),
            self.motion_branch(&request.media),
        );

        // A model failure wins over a motion failure.
        let structured = model?;

        logger.log_stage(PipelineStage::MotionPending);
        match motion {
            Ok(motion) => {
                logger.log_stage(PipelineStage::Reconciling);
                Ok(self.reconciler.reconcile(structured, &motion))
            }
            Err(e) => match self.config.motion_failure_policy {
                MotionFailurePolicy::Fail => {
                    logger.log_error(PipelineStage::MotionFailed, &e.to_string());
                    Err(e.into())
                }
                MotionFailurePolicy::FallbackToEstimate => {
                    logger.log_warning(
                        PipelineStage::MotionFailed,
                        &format!("{}; keeping model estimate as unverified", e),
                    );
                    metrics::record_motion_fallback(e.kind());
                    Ok(self.reconciler.mark_unverified(structured))
                }
            },
        }
    }

    /// Model call with timeout and bounded retry, then extraction.
    async fn model_branch(
        &self,
        media: &MediaPayload,
        logger: &AnalysisLogger,
    ) -> AnalysisResult<StructuredAnalysis> {
        let retry = RetryConfig::new("gemini_analyze")
            .with_max_retries(self.config.model_max_retries)
            .with_base_delay(self.config.model_retry_base_delay);
        let timeout = self.config.model_timeout;
        let model = &self.model;

        let text = retry_async(&retry, AnalysisError::is_retryable, || async move {
            logger.log_stage(PipelineStage::ExternalCallInFlight);
            let result = match tokio::time::timeout(
                timeout,
                model.analyze(media, WORKOUT_ANALYSIS_PROMPT),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AnalysisError::ServiceTimeout(timeout.as_secs())),
            };
            metrics::record_model_call(match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            });
            result
        })
        .await
        .inspect_err(|e| logger.log_error(PipelineStage::ExternalFailed, &e.to_string()))?;

        logger.log_stage(PipelineStage::ExtractionPending);
        self.extractor.extract(&text).inspect_err(|e| {
            logger.log_error(PipelineStage::ExtractionFailed, &e.to_string());
            if let Some(raw) = e.raw_response() {
                warn!(identity = %logger.identity(), raw = %raw, "Unparseable model response");
            }
        })
    }

    /// Motion count bounded by the motion timeout.
    async fn motion_branch(&self, media: &MediaPayload) -> Result<MotionResult, MotionError> {
        let timeout = self.config.motion_timeout;
        match tokio::time::timeout(timeout, self.motion.count(media)).await {
            Ok(result) => result,
            Err(_) => Err(MotionError::Timeout(timeout.as_secs())),
        }
    }
}

/// Runs the analysis pipeline for uploaded videos.
///
/// Shared across requests; the cache inside is the only mutable state.
pub struct AnalysisOrchestrator {
    pipeline: Arc<Pipeline>,
    cache: AnalysisCache,
}

impl AnalysisOrchestrator {
    /// Create an orchestrator with a fresh cache sized from `config`.
    pub fn new(
        config: AnalysisConfig,
        model: Arc<dyn ExternalAnalysisClient>,
        motion: Arc<dyn MotionCounter>,
    ) -> Self {
        let cache = AnalysisCache::new(&config.cache);
        Self::with_cache(config, model, motion, cache)
    }

    /// Create an orchestrator around an existing cache.
    pub fn with_cache(
        config: AnalysisConfig,
        model: Arc<dyn ExternalAnalysisClient>,
        motion: Arc<dyn MotionCounter>,
        cache: AnalysisCache,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                config,
                model,
                motion,
                extractor: ResponseExtractor::new(),
                reconciler: ResultReconciler::new(),
            }),
            cache,
        }
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.pipeline.config
    }

    /// Analyze one video, serving repeated content from the cache.
    pub async fn run(&self, request: AnalysisRequest) -> AnalysisResult<StructuredAnalysis> {
        let started = Instant::now();
        let logger = AnalysisLogger::new(&request.identity, OPERATION);
        let span = logger.create_span();

        let result = self.run_inner(request, logger).instrument(span).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_pipeline_run(outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn run_inner(
        &self,
        request: AnalysisRequest,
        logger: AnalysisLogger,
    ) -> AnalysisResult<StructuredAnalysis> {
        logger.log_start(&format!(
            "{} bytes, {}, file {}",
            request.media.len(),
            request.media.media_type(),
            request.filename.as_deref().unwrap_or("-")
        ));
        logger.log_stage(PipelineStage::CacheCheck);

        let identity = request.identity.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let task_logger = logger.clone();
        let task_span = logger.create_span();

        let (analysis, outcome) = self
            .cache
            .get_or_compute(&identity, move || {
                pipeline.execute(request, task_logger).instrument(task_span)
            })
            .await?;

        match outcome {
            LookupOutcome::Hit => logger.log_stage(PipelineStage::CacheHit),
            LookupOutcome::Leader => logger.log_stage(PipelineStage::Cached),
            LookupOutcome::Follower => {}
        }
        logger.log_completion(&format!(
            "{} x{} ({})",
            analysis.exercise_name,
            analysis.repetitions,
            analysis.rep_count_status.as_str()
        ));
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fitcheck_models::{MediaType, RepCountStatus};
    use fitcheck_motion_client::MotionClientResult;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SQUAT_REPLY: &str = r#"```json
{
  "exercise_name": "squat",
  "repetitions": 8,
  "calories_burned": 10.0,
  "form_analysis": {
    "posture": "Chest up",
    "range_of_motion": "Parallel",
    "tempo": "Even",
    "common_mistakes": []
  },
  "performance_score": 8.0,
  "encouragement_and_tips": {
    "positive_feedback": ["Consistent depth"],
    "improvement_tips": ["Pause at the bottom"],
    "context": "Strong set."
  }
}
```"#;

    /// Scripted generation service: pops scripted results, then repeats the
    /// default reply.
    struct FakeModel {
        script: Mutex<VecDeque<AnalysisResult<String>>>,
        reply: String,
        delay: Duration,
        calls: AtomicU32,
    }

    impl FakeModel {
        fn replying(reply: &str) -> Arc<Self> {
            Self::scripted(Vec::new(), reply, Duration::ZERO)
        }

        fn scripted(
            script: Vec<AnalysisResult<String>>,
            reply: &str,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                reply: reply.to_string(),
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExternalAnalysisClient for FakeModel {
        async fn analyze(&self, _media: &MediaPayload, instructions: &str) -> AnalysisResult<String> {
            assert_eq!(instructions, WORKOUT_ANALYSIS_PROMPT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(self.reply.clone()))
        }
    }

    struct FakeMotion {
        result: MotionClientResult<MotionResult>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl FakeMotion {
        fn counting(reps: u32) -> Arc<Self> {
            Self::with(Ok(MotionResult::new(reps, 20.0)), Duration::ZERO)
        }

        fn failing(error: MotionError) -> Arc<Self> {
            Self::with(Err(error), Duration::ZERO)
        }

        fn with(result: MotionClientResult<MotionResult>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result,
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MotionCounter for FakeMotion {
        async fn count(&self, _media: &MediaPayload) -> MotionClientResult<MotionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            model_retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn orchestrator(
        config: AnalysisConfig,
        model: &Arc<FakeModel>,
        motion: &Arc<FakeMotion>,
    ) -> AnalysisOrchestrator {
        AnalysisOrchestrator::new(config, model.clone(), motion.clone())
    }

    fn upload(bytes: &[u8]) -> AnalysisRequest {
        AnalysisRequest::new(bytes.to_vec(), MediaType::Mp4)
    }

    #[tokio::test]
    async fn test_motion_count_overrides_model_estimate() {
        let model = FakeModel::replying(SQUAT_REPLY);
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        let analysis = orchestrator.run(upload(b"squat video")).await.unwrap();

        assert_eq!(analysis.exercise_name, "squat");
        assert_eq!(analysis.repetitions, 12);
        assert_eq!(analysis.rep_count_status, RepCountStatus::Verified);
        assert_eq!(analysis.calories_burned, 10.0);
        assert_eq!(model.calls(), 1);
        assert_eq!(motion.calls(), 1);
    }

    #[tokio::test]
    async fn test_repeat_upload_served_from_cache() {
        let model = FakeModel::replying(SQUAT_REPLY);
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        let first = orchestrator
            .run(upload(b"same").with_filename("a.mp4"))
            .await
            .unwrap();
        let second = orchestrator
            .run(
                AnalysisRequest::new(b"same".to_vec(), MediaType::Mov).with_filename("renamed.mov"),
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(model.calls(), 1);
        assert_eq!(motion.calls(), 1);
        assert_eq!(orchestrator.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_different_bytes_are_analyzed_separately() {
        let model = FakeModel::replying(SQUAT_REPLY);
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        orchestrator.run(upload(b"video one")).await.unwrap();
        orchestrator.run(upload(b"video two")).await.unwrap();

        assert_eq!(model.calls(), 2);
        assert_eq!(orchestrator.cache().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_uploads_call_services_once() {
        let model = FakeModel::scripted(Vec::new(), SQUAT_REPLY, Duration::from_millis(100));
        let motion = FakeMotion::counting(12);
        let orchestrator = Arc::new(orchestrator(config(), &model, &motion));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::spawn(async move {
                orchestrator.run(upload(b"popular video")).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(model.calls(), 1);
        assert_eq!(motion.calls(), 1);
    }

    #[tokio::test]
    async fn test_motion_failure_fails_request_under_fail_policy() {
        let model = FakeModel::replying(SQUAT_REPLY);
        let motion = FakeMotion::failing(MotionError::UnanalyzableMedia("no person".into()));
        let orchestrator = orchestrator(config(), &model, &motion);

        let err = orchestrator.run(upload(b"empty room")).await.unwrap_err();
        assert_eq!(err.kind(), "unanalyzable_media");
        assert!(orchestrator.cache().is_empty());

        // Not cached: the next attempt recomputes.
        let _ = orchestrator.run(upload(b"empty room")).await;
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_motion_failure_falls_back_to_unverified_estimate() {
        let model = FakeModel::replying(SQUAT_REPLY);
        let motion = FakeMotion::failing(MotionError::ServiceUnavailable("down".into()));
        let orchestrator = orchestrator(
            config().with_motion_failure_policy(MotionFailurePolicy::FallbackToEstimate),
            &model,
            &motion,
        );

        let analysis = orchestrator.run(upload(b"squat video")).await.unwrap();
        assert_eq!(analysis.repetitions, 8);
        assert_eq!(analysis.rep_count_status, RepCountStatus::Unverified);
    }

    #[tokio::test]
    async fn test_motion_timeout() {
        let model = FakeModel::replying(SQUAT_REPLY);
        let motion = FakeMotion::with(Ok(MotionResult::new(12, 20.0)), Duration::from_secs(5));
        let orchestrator = orchestrator(
            AnalysisConfig {
                motion_timeout: Duration::from_millis(50),
                ..config()
            },
            &model,
            &motion,
        );

        let err = orchestrator.run(upload(b"long video")).await.unwrap_err();
        assert_eq!(err.kind(), "motion_timeout");
    }

    #[tokio::test]
    async fn test_transient_model_failure_retried_once() {
        let model = FakeModel::scripted(
            vec![Err(AnalysisError::service_unavailable("503"))],
            SQUAT_REPLY,
            Duration::ZERO,
        );
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        let analysis = orchestrator.run(upload(b"squat video")).await.unwrap();
        assert_eq!(analysis.repetitions, 12);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_persistent_model_failure_surfaces_after_one_retry() {
        let model = FakeModel::scripted(
            vec![
                Err(AnalysisError::service_unavailable("quota")),
                Err(AnalysisError::service_unavailable("quota")),
            ],
            SQUAT_REPLY,
            Duration::ZERO,
        );
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        let err = orchestrator.run(upload(b"squat video")).await.unwrap_err();
        assert_eq!(err.kind(), "service_unavailable");
        assert_eq!(model.calls(), 2);
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_response_not_retried() {
        let model = FakeModel::replying("I'm sorry, I can't analyze this video.");
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        let err = orchestrator.run(upload(b"squat video")).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
        assert_eq!(err.raw_response(), Some("I'm sorry, I can't analyze this video."));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_model_timeout() {
        let model = FakeModel::scripted(Vec::new(), SQUAT_REPLY, Duration::from_secs(5));
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(
            AnalysisConfig {
                model_timeout: Duration::from_millis(50),
                model_max_retries: 0,
                ..config()
            },
            &model,
            &motion,
        );

        let err = orchestrator.run(upload(b"squat video")).await.unwrap_err();
        assert_eq!(err.kind(), "service_timeout");
    }

    #[tokio::test]
    async fn test_rejected_model_request_not_retried() {
        use crate::gemini::{GeminiClient, GeminiConfig};
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "status": "INVALID_ARGUMENT",
                    "message": "Request payload size exceeds the limit: 20971520 bytes."
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut gemini = GeminiConfig::new("test-key");
        gemini.base_url = server.uri();
        let model = Arc::new(GeminiClient::new(gemini).unwrap());
        let motion = FakeMotion::counting(12);
        let orchestrator = AnalysisOrchestrator::new(config(), model, motion.clone());

        let err = orchestrator.run(upload(b"squat video")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_refusal_object_is_malformed_and_not_cached() {
        let refusal = r#"{"error": "No person or exercise is visible in this video."}"#;
        let model = FakeModel::replying(refusal);
        let motion = FakeMotion::counting(12);
        let orchestrator = orchestrator(config(), &model, &motion);

        let err = orchestrator.run(upload(b"empty room")).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
        assert_eq!(err.raw_response(), Some(refusal));
        assert_eq!(model.calls(), 1);
        assert!(orchestrator.cache().is_empty());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::ExternalCallInFlight.as_str(), "external_call_in_flight");
        assert_eq!(PipelineStage::Cached.to_string(), "cached");
    }
}
