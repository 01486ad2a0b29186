//! Vision Provider Trait
//!
//! Defines the interface to the remote vision-language model.
//! The pipeline issues exactly one `infer` call per attempt.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::core::cost::{EncodingParameters, SizeMode};
use crate::core::{CoreError, CoreResult};

use super::VideoRef;

// =============================================================================
// Credentials
// =============================================================================

/// DashScope deployment region
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Mainland China (cn-beijing)
    #[default]
    Beijing,
    /// International (ap-southeast-1)
    Singapore,
}

impl Region {
    /// API base URL for the region
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Beijing => "https://dashscope.aliyuncs.com",
            Region::Singapore => "https://dashscope-intl.aliyuncs.com",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Beijing => write!(f, "beijing"),
            Region::Singapore => write!(f, "singapore"),
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beijing" | "cn" | "cn-beijing" => Ok(Region::Beijing),
            "singapore" | "intl" | "ap-southeast-1" => Ok(Region::Singapore),
            _ => Err(format!("Unknown region: {}", s)),
        }
    }
}

/// API credential plus region, passed explicitly to each request
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    api_key: Option<String>,
    pub region: Region,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: Option<String>, region: Region) -> Self {
        Self { api_key, region }
    }

    /// Returns the key if one is set and non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }

    /// First characters of the key, safe for logs
    pub fn key_preview(&self) -> String {
        match self.api_key() {
            Some(key) => format!("{}...", key.chars().take(6).collect::<String>()),
            None => "<none>".to_string(),
        }
    }
}

// =============================================================================
// Inference Request
// =============================================================================

/// Frame size hint sent with the video
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FrameDims {
    Fixed {
        height: u32,
        width: u32,
    },
    #[serde(rename_all = "camelCase")]
    PixelBudget {
        min_pixels: u32,
        max_pixels: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_pixels: Option<u32>,
    },
}

impl From<&EncodingParameters> for FrameDims {
    fn from(params: &EncodingParameters) -> Self {
        match params.mode {
            SizeMode::FixedDimensions => FrameDims::Fixed {
                height: params.resolution.height,
                width: params.resolution.width,
            },
            SizeMode::PixelBudget {
                min_pixels,
                max_pixels,
                total_pixels,
            } => FrameDims::PixelBudget {
                min_pixels,
                max_pixels,
                total_pixels,
            },
        }
    }
}

/// Sampling parameters for text generation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Low for precise annotation (0.0 - 1.0)
    pub temperature: f32,
    /// Maximum tokens in the answer
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 4000,
            top_p: 0.9,
        }
    }
}

/// Single remote inference call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub media: VideoRef,
    pub fps: f64,
    pub frame_dims: FrameDims,
    pub prompt: String,
    pub model: String,
    #[serde(skip)]
    pub credentials: Credentials,
    pub generation: GenerationParams,
}

// =============================================================================
// Inference Response
// =============================================================================

/// Token accounting reported by the provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }
}

/// Text answer from the provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// =============================================================================
// Vision Provider Trait
// =============================================================================

/// Remote vision-language model
///
/// Implementations:
/// - `DashScopeProvider`: Qwen-VL over the DashScope REST API
/// - `MockVisionProvider`: scripted responses for tests
///
/// Errors must use `CoreError::Transport`/`Timeout` for network failures and
/// `CoreError::RemoteRejected` for provider error responses so the pipeline
/// can classify them.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Returns the provider name
    fn name(&self) -> &str;

    /// Runs one inference; dropping the future aborts the request
    async fn infer(&self, request: InferenceRequest) -> CoreResult<InferenceResponse>;

    /// Checks if the provider can be used
    fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Mock Provider
// =============================================================================

#[derive(Clone, Debug)]
enum MockOutcome {
    Respond { text: String, usage: TokenUsage },
    Transport(String),
    Rejected { status_code: u16, message: String },
}

/// Scripted vision provider that counts its calls
pub struct MockVisionProvider {
    outcome: MockOutcome,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<InferenceRequest>>,
}

impl MockVisionProvider {
    /// Creates a provider that answers with a fixed annotation
    pub fn new() -> Self {
        Self {
            outcome: MockOutcome::Respond {
                text: "Mock annotation".to_string(),
                usage: TokenUsage::new(5000, 160),
            },
            gate: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Sets the response text and usage
    pub fn with_response(mut self, text: &str, usage: TokenUsage) -> Self {
        self.outcome = MockOutcome::Respond {
            text: text.to_string(),
            usage,
        };
        self
    }

    /// Fails every call with a transport error
    pub fn with_transport_error(mut self, message: &str) -> Self {
        self.outcome = MockOutcome::Transport(message.to_string());
        self
    }

    /// Fails every call with a provider rejection
    pub fn with_rejection(mut self, status_code: u16, message: &str) -> Self {
        self.outcome = MockOutcome::Rejected {
            status_code,
            message: message.to_string(),
        };
        self
    }

    /// Holds every answer until the gate is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of `infer` calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<InferenceRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockVisionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn infer(&self, request: InferenceRequest) -> CoreResult<InferenceResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let model = request.model.clone();
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.outcome {
            MockOutcome::Respond { text, usage } => Ok(InferenceResponse {
                text: text.clone(),
                usage: *usage,
                model,
                request_id: Some("mock-request".to_string()),
            }),
            MockOutcome::Transport(message) => Err(CoreError::Transport(message.clone())),
            MockOutcome::Rejected {
                status_code,
                message,
            } => Err(CoreError::RemoteRejected {
                status_code: *status_code,
                code: None,
                message: message.clone(),
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
