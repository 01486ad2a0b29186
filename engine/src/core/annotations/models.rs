//! Annotation Data Models
//!
//! Types owned by the annotation pipeline: attempt inputs, stages,
//! results, classified errors and progress events.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::cost::EncodingParameters;
use crate::core::{AttemptId, CoreError, Resolution, TimeSec};

// =============================================================================
// Progress Milestones
// =============================================================================

pub const PROGRESS_PREPARING: u8 = 10;
pub const PROGRESS_ENCODING_LOAD: u8 = 20;
pub const PROGRESS_ENCODING_SAMPLE: u8 = 40;
pub const PROGRESS_UPLOADING: u8 = 60;
pub const PROGRESS_AWAITING_MODEL: u8 = 80;
pub const PROGRESS_PARSING: u8 = 90;
pub const PROGRESS_DONE: u8 = 100;

// =============================================================================
// Video Reference
// =============================================================================

/// Handle to the media being annotated
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum VideoRef {
    /// File on the local filesystem
    LocalFile(PathBuf),
    /// URL the provider can fetch directly
    RemoteUrl(String),
}

impl VideoRef {
    /// Interprets user input as a URL or a local path
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        let lower = trimmed.to_ascii_lowercase();
        if let Some(path) = trimmed.strip_prefix("file://") {
            return Some(VideoRef::LocalFile(PathBuf::from(path)));
        }
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("oss://")
        {
            return Some(VideoRef::RemoteUrl(trimmed.to_string()));
        }
        Some(VideoRef::LocalFile(PathBuf::from(trimmed)))
    }

    /// Returns true if the reference points nowhere
    pub fn is_empty(&self) -> bool {
        match self {
            VideoRef::LocalFile(path) => path.as_os_str().is_empty(),
            VideoRef::RemoteUrl(url) => url.trim().is_empty(),
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            VideoRef::LocalFile(path) => Some(path),
            VideoRef::RemoteUrl(_) => None,
        }
    }

    /// File name used for output naming
    pub fn display_name(&self) -> String {
        match self {
            VideoRef::LocalFile(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            VideoRef::RemoteUrl(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|u| u.rsplit('/').next())
                .filter(|n| !n.is_empty())
                .unwrap_or("remote_video")
                .to_string(),
        }
    }
}

// =============================================================================
// Attempt Input
// =============================================================================

/// Everything needed to start an attempt, frozen at start time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInput {
    pub video: Option<VideoRef>,
    pub duration_sec: TimeSec,
    pub parameters: EncodingParameters,
    pub prompt: String,
    pub model: String,
}

impl AttemptInput {
    /// Creates a new attempt input
    pub fn new(
        video: Option<VideoRef>,
        duration_sec: TimeSec,
        parameters: EncodingParameters,
        prompt: &str,
        model: &str,
    ) -> Self {
        Self {
            video,
            duration_sec,
            parameters,
            prompt: prompt.to_string(),
            model: model.to_string(),
        }
    }
}

// =============================================================================
// Pipeline Stage
// =============================================================================

/// Stage of an annotation attempt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStage {
    #[default]
    Idle,
    Validating,
    Preparing,
    Encoding,
    Uploading,
    AwaitingModel,
    ParsingResult,
    Succeeded,
    Cancelled,
    Failed,
}

impl PipelineStage {
    /// Succeeded, cancelled or failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Succeeded | PipelineStage::Cancelled | PipelineStage::Failed
        )
    }

    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "Idle",
            PipelineStage::Validating => "Validating parameters",
            PipelineStage::Preparing => "Preparing request",
            PipelineStage::Encoding => "Encoding video",
            PipelineStage::Uploading => "Uploading",
            PipelineStage::AwaitingModel => "Waiting for model",
            PipelineStage::ParsingResult => "Parsing result",
            PipelineStage::Succeeded => "Done",
            PipelineStage::Cancelled => "Cancelled",
            PipelineStage::Failed => "Failed",
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Successful annotation output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationResult {
    pub content: String,
    /// Tokens reported by the provider
    pub used_tokens: u64,
    pub processing_time_seconds: f64,
    pub model: String,
    /// Frame count from the cost model
    pub estimated_frames: u64,
}

/// Terminal failure of an attempt
#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClassifiedError {
    /// No media or no credential; needs operator action
    #[error("Missing input: {message}")]
    MissingInput { message: String },

    /// Parameters violate hard limits
    #[error("Parameter validation failed: {}", .violations.join("; "))]
    ValidationFailed { violations: Vec<String> },

    /// Network unreachable or timed out
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Provider answered with an error, passed through verbatim
    #[error("Remote model rejected the request{}: {message}", status_suffix(.status_code, .code))]
    #[serde(rename_all = "camelCase")]
    RemoteRejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },

    /// Stopped by the operator
    #[error("Cancelled by operator")]
    Cancelled,
}

fn status_suffix(status_code: &Option<u16>, code: &Option<String>) -> String {
    match (status_code, code) {
        (Some(status), Some(code)) => format!(" ({}, {})", status, code),
        (Some(status), None) => format!(" ({})", status),
        (None, Some(code)) => format!(" ({})", code),
        (None, None) => String::new(),
    }
}

impl ClassifiedError {
    pub fn missing_input(message: &str) -> Self {
        ClassifiedError::MissingInput {
            message: message.to_string(),
        }
    }

    /// Transport and remote rejections can be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassifiedError::Transport { .. } | ClassifiedError::RemoteRejected { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ClassifiedError::Cancelled)
    }

    /// Maps a provider error onto the pipeline taxonomy
    pub fn from_provider_error(error: CoreError) -> Self {
        match error {
            CoreError::Transport(message) | CoreError::Timeout(message) => {
                ClassifiedError::Transport { message }
            }
            CoreError::RemoteRejected {
                status_code,
                code,
                message,
            } => ClassifiedError::RemoteRejected {
                status_code: Some(status_code),
                code,
                message,
            },
            CoreError::AIRequestFailed(message) => ClassifiedError::RemoteRejected {
                status_code: None,
                code: None,
                message,
            },
            CoreError::JsonError(e) => ClassifiedError::RemoteRejected {
                status_code: None,
                code: None,
                message: format!("Malformed provider response: {}", e),
            },
            CoreError::FileNotFound(path) => ClassifiedError::MissingInput {
                message: format!("Video not found: {}", path),
            },
            CoreError::MissingInput(message) => ClassifiedError::MissingInput { message },
            CoreError::ValidationError(message) => ClassifiedError::ValidationFailed {
                violations: vec![message],
            },
            CoreError::IoError(e) => ClassifiedError::MissingInput {
                message: format!("Video could not be read: {}", e),
            },
            other => ClassifiedError::Transport {
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Attempt
// =============================================================================

/// One end-to-end execution of the pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationAttempt {
    pub id: AttemptId,
    pub video: Option<VideoRef>,
    /// Snapshot taken at start; later edits do not reach it
    pub parameters: EncodingParameters,
    pub prompt: String,
    pub model: String,
    pub stage: PipelineStage,
    /// 0..=100
    pub progress: u8,
    pub result: Option<AnnotationResult>,
    pub failure: Option<ClassifiedError>,
    pub started_at: String,
}

impl AnnotationAttempt {
    /// Creates an idle attempt from frozen input
    pub fn new(input: &AttemptInput) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            video: input.video.clone(),
            parameters: input.parameters.clone(),
            prompt: input.prompt.clone(),
            model: input.model.clone(),
            stage: PipelineStage::Idle,
            progress: 0,
            result: None,
            failure: None,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage.is_terminal()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Progress notification emitted on every stage change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub attempt_id: AttemptId,
    pub stage: PipelineStage,
    pub progress: u8,
    pub message: String,
}

// =============================================================================
// Persisted Record
// =============================================================================

/// Saved form of a successful annotation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub video: String,
    pub model: String,
    pub fps: f64,
    pub resolution: Resolution,
    pub processing_time: f64,
    pub used_tokens: u64,
    pub estimated_frames: u64,
    /// `YYYYmmdd_HHMMSS`
    pub timestamp: String,
    pub annotation: String,
}

impl AnnotationRecord {
    /// Builds a record from a finished attempt's parts
    pub fn new(
        video: &str,
        parameters: &EncodingParameters,
        result: &AnnotationResult,
        timestamp: &str,
    ) -> Self {
        Self {
            video: video.to_string(),
            model: result.model.clone(),
            fps: parameters.fps,
            resolution: parameters.resolution,
            processing_time: result.processing_time_seconds,
            used_tokens: result.used_tokens,
            estimated_frames: result.estimated_frames,
            timestamp: timestamp.to_string(),
            annotation: result.content.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
