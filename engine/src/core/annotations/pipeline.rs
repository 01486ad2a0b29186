//! Annotation Pipeline
//!
//! Drives one annotation attempt through validation, request preparation
//! and the remote inference call.
//!
//! The pipeline keeps at most one attempt. Every start bumps a generation
//! counter; anything that finishes under an older generation is discarded,
//! so a cancelled or superseded call can never write a result.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::models::*;
use super::provider::{Credentials, FrameDims, GenerationParams, InferenceRequest, VisionProvider};
use crate::core::cost::TokenCostModel;

/// Provider upload ceiling for a single video
pub const LARGE_VIDEO_BYTES: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Explicit configuration handed to the pipeline
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(skip)]
    pub credentials: Credentials,
    pub generation: GenerationParams,
    pub cost_model: TokenCostModel,
}

// =============================================================================
// State
// =============================================================================

#[derive(Default)]
struct PipelineState {
    /// Identifies the attempt allowed to mutate state
    generation: u64,
    attempt: Option<AnnotationAttempt>,
    /// Input replayed by `retry`
    frozen_input: Option<AttemptInput>,
    /// Fires when the in-flight attempt is cancelled
    cancel_token: Option<CancellationToken>,
}

impl PipelineState {
    /// Attempt owned by `generation`, if it is current and still running
    fn live_attempt(&mut self, generation: u64) -> Option<&mut AnnotationAttempt> {
        if self.generation != generation {
            return None;
        }
        self.attempt.as_mut().filter(|a| !a.is_done())
    }
}

// =============================================================================
// Annotation Pipeline
// =============================================================================

/// Staged, cancellable annotation controller
pub struct AnnotationPipeline {
    config: PipelineConfig,
    provider: Arc<dyn VisionProvider>,
    state: Mutex<PipelineState>,
    event_tx: mpsc::UnboundedSender<PipelineEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<PipelineEvent>>>,
}

impl AnnotationPipeline {
    /// Creates a new pipeline
    pub fn new(config: PipelineConfig, provider: Arc<dyn VisionProvider>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            provider,
            state: Mutex::new(PipelineState::default()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Takes the progress event receiver (only once)
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<PipelineEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Returns a copy of the current attempt
    pub fn snapshot(&self) -> Option<AnnotationAttempt> {
        self.lock_state().attempt.clone()
    }

    /// Returns the input `retry` would replay
    pub fn frozen_input(&self) -> Option<AttemptInput> {
        self.lock_state().frozen_input.clone()
    }

    /// Runs a new attempt to completion
    ///
    /// Any previous attempt is replaced; a call still pending for it is
    /// cancelled and its outcome ignored.
    pub async fn start(&self, input: AttemptInput) -> Result<AnnotationResult, ClassifiedError> {
        let (generation, token) = {
            let mut state = self.lock_state();
            if let Some(previous) = state.cancel_token.take() {
                previous.cancel();
            }
            state.generation += 1;

            let token = CancellationToken::new();
            let attempt = AnnotationAttempt::new(&input);
            tracing::info!(
                "Starting annotation attempt {} (generation {})",
                attempt.id,
                state.generation
            );

            state.cancel_token = Some(token.clone());
            state.frozen_input = Some(input.clone());
            state.attempt = Some(attempt);
            (state.generation, token)
        };

        self.run(generation, token, input).await
    }

    /// Cancels the running attempt
    ///
    /// Returns false if there is nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let Some(attempt) = state.attempt.as_mut().filter(|a| !a.is_done()) else {
            return false;
        };
        if let Some(token) = state.cancel_token.take() {
            token.cancel();
        }

        attempt.stage = PipelineStage::Cancelled;
        attempt.failure = Some(ClassifiedError::Cancelled);
        tracing::info!("Annotation attempt {} cancelled", attempt.id);
        self.emit(attempt, "Cancelled by operator");
        true
    }

    /// Replays the last attempt's frozen input
    pub async fn retry(&self) -> Result<AnnotationResult, ClassifiedError> {
        let input = self
            .frozen_input()
            .ok_or_else(|| ClassifiedError::missing_input("No previous attempt to retry"))?;
        tracing::info!("Retrying annotation");
        self.start(input).await
    }

    /// Discards the attempt and frozen input
    pub fn reset(&self) {
        let mut state = self.lock_state();
        if let Some(token) = state.cancel_token.take() {
            token.cancel();
        }
        state.generation += 1;
        state.attempt = None;
        state.frozen_input = None;
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn run(
        &self,
        generation: u64,
        token: CancellationToken,
        input: AttemptInput,
    ) -> Result<AnnotationResult, ClassifiedError> {
        self.advance(generation, PipelineStage::Validating, 0, "Checking inputs")?;

        let Some(video) = input.video.clone().filter(|v| !v.is_empty()) else {
            return Err(self.fail(
                generation,
                ClassifiedError::missing_input("No video selected"),
            ));
        };

        if !self.config.credentials.is_configured() {
            return Err(self.fail(
                generation,
                ClassifiedError::missing_input("DashScope API key is not configured"),
            ));
        }

        let params = &input.parameters;
        let validation =
            self.config
                .cost_model
                .validate(params.fps, params.resolution, input.duration_sec);
        if !validation.is_valid {
            return Err(self.fail(
                generation,
                ClassifiedError::ValidationFailed {
                    violations: validation.errors,
                },
            ));
        }
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }

        self.advance(
            generation,
            PipelineStage::Preparing,
            PROGRESS_PREPARING,
            &format!("Preparing {}", video.display_name()),
        )?;

        if let Some(path) = video.local_path() {
            let metadata = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ClassifiedError::Cancelled),
                metadata = tokio::fs::metadata(path) => metadata,
            };
            match metadata {
                Ok(meta) if meta.len() > LARGE_VIDEO_BYTES => {
                    tracing::warn!(
                        "Video is {:.2} GB; the provider may refuse files above 1 GB",
                        meta.len() as f64 / LARGE_VIDEO_BYTES as f64
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Cannot read video {}: {}", path.display(), e);
                    return Err(self.fail(
                        generation,
                        ClassifiedError::missing_input(&format!(
                            "Video not found: {}",
                            path.display()
                        )),
                    ));
                }
            }
        }

        self.advance(
            generation,
            PipelineStage::Encoding,
            PROGRESS_ENCODING_LOAD,
            "Loading video",
        )?;
        self.advance(
            generation,
            PipelineStage::Encoding,
            PROGRESS_ENCODING_SAMPLE,
            &format!(
                "Sampling {} frames at {} fps",
                validation.estimate.frame_count, params.fps
            ),
        )?;

        let request = InferenceRequest {
            media: video,
            fps: params.fps,
            frame_dims: FrameDims::from(params),
            prompt: input.prompt.clone(),
            model: input.model.clone(),
            credentials: self.config.credentials.clone(),
            generation: self.config.generation,
        };

        self.advance(
            generation,
            PipelineStage::Uploading,
            PROGRESS_UPLOADING,
            "Sending request",
        )?;
        self.advance(
            generation,
            PipelineStage::AwaitingModel,
            PROGRESS_AWAITING_MODEL,
            &format!("Waiting for {}", input.model),
        )?;

        tracing::info!(
            "Calling {} (model={}, ~{} tokens)",
            self.provider.name(),
            input.model,
            validation.estimate.total_tokens
        );
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ClassifiedError::Cancelled),
            outcome = self.provider.infer(request) => outcome,
        };
        let elapsed = started.elapsed().as_secs_f64();

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Remote inference failed after {:.1}s: {}", elapsed, e);
                return Err(self.fail(generation, ClassifiedError::from_provider_error(e)));
            }
        };
        tracing::info!(
            "Remote inference finished in {:.1}s ({} tokens)",
            elapsed,
            response.usage.total_tokens
        );

        self.advance(
            generation,
            PipelineStage::ParsingResult,
            PROGRESS_PARSING,
            "Reading annotation",
        )?;

        let model = if response.model.is_empty() {
            input.model.clone()
        } else {
            response.model
        };
        let result = AnnotationResult {
            content: response.text,
            used_tokens: response.usage.total_tokens,
            processing_time_seconds: elapsed,
            model,
            estimated_frames: validation.estimate.frame_count,
        };

        self.complete(generation, result)
    }

    /// Moves the current attempt to `stage`; errs if it was cancelled or replaced
    fn advance(
        &self,
        generation: u64,
        stage: PipelineStage,
        progress: u8,
        message: &str,
    ) -> Result<(), ClassifiedError> {
        let mut state = self.lock_state();
        let attempt = state
            .live_attempt(generation)
            .ok_or(ClassifiedError::Cancelled)?;

        attempt.stage = stage;
        attempt.progress = progress;
        tracing::info!("[{}] {} ({}%)", attempt.id, message, progress);
        self.emit(attempt, message);
        Ok(())
    }

    /// Records a failure; stale attempts report `Cancelled` instead
    fn fail(&self, generation: u64, error: ClassifiedError) -> ClassifiedError {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let Some(attempt) = state.live_attempt(generation) else {
            return ClassifiedError::Cancelled;
        };
        attempt.stage = PipelineStage::Failed;
        attempt.failure = Some(error.clone());
        tracing::warn!("Annotation attempt {} failed: {}", attempt.id, error);
        self.emit(attempt, &error.to_string());
        state.cancel_token = None;
        error
    }

    fn complete(
        &self,
        generation: u64,
        result: AnnotationResult,
    ) -> Result<AnnotationResult, ClassifiedError> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let attempt = state
            .live_attempt(generation)
            .ok_or(ClassifiedError::Cancelled)?;
        attempt.stage = PipelineStage::Succeeded;
        attempt.progress = PROGRESS_DONE;
        attempt.result = Some(result.clone());
        self.emit(attempt, "Annotation complete");
        state.cancel_token = None;
        Ok(result)
    }

    fn emit(&self, attempt: &AnnotationAttempt, message: &str) {
        let _ = self.event_tx.send(PipelineEvent {
            attempt_id: attempt.id.clone(),
            stage: attempt.stage,
            progress: attempt.progress,
            message: message.to_string(),
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Tests
// =============================================================================
