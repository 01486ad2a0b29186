//! DashScope Provider Implementation
//!
//! Implements the VisionProvider trait for Qwen-VL models served by
//! Alibaba Cloud DashScope (multimodal-generation endpoint).
//!
//! Small local videos are inlined as base64 data URLs. Larger ones go to
//! DashScope's temporary OSS storage first and are referenced as `oss://`.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::annotations::provider::{
    FrameDims, InferenceRequest, InferenceResponse, TokenUsage, VisionProvider,
};
use crate::core::annotations::VideoRef;
use crate::core::fs::sanitize_file_stem;
use crate::core::{CoreError, CoreResult};

/// Largest local video sent inline as a data URL (base64 grows it by a third)
pub const INLINE_MEDIA_MAX_BYTES: u64 = 7 * 1024 * 1024;

const MIB: f64 = 1024.0 * 1024.0;

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the DashScope provider
#[derive(Clone, Debug, Default)]
pub struct DashScopeConfig {
    /// Overrides the region's base URL
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl DashScopeConfig {
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// =============================================================================
// DashScope Provider
// =============================================================================

/// Qwen-VL over the DashScope REST API
pub struct DashScopeProvider {
    base_url: Option<String>,
    #[cfg(feature = "ai-providers")]
    client: reqwest::Client,
}

impl DashScopeProvider {
    /// Generation endpoint path
    pub const GENERATION_PATH: &'static str =
        "/api/v1/services/aigc/multimodal-generation/generation";

    /// Temporary upload policy endpoint path
    pub const UPLOADS_PATH: &'static str = "/api/v1/uploads";

    /// Tells the generation endpoint to resolve `oss://` references
    pub const OSS_RESOLVE_HEADER: &'static str = "X-DashScope-OssResourceResolve";

    /// Default model
    pub const DEFAULT_MODEL: &'static str = "qwen-vl-max-latest";

    /// Video-capable Qwen-VL models
    pub const AVAILABLE_MODELS: &'static [&'static str] = &[
        "qwen-vl-max-latest",
        "qwen-vl-plus-latest",
        "qwen3-vl-plus",
        "qwen3-vl-flash",
    ];

    /// Default request timeout; long videos take minutes
    pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

    /// Creates a new DashScope provider
    pub fn new(config: DashScopeConfig) -> CoreResult<Self> {
        let timeout_secs = config.timeout_secs.unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(CoreError::ValidationError(
                "Request timeout must be at least one second".to_string(),
            ));
        }

        #[cfg(feature = "ai-providers")]
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url,
            #[cfg(feature = "ai-providers")]
            client,
        })
    }

    /// Returns the list of available models
    pub fn available_models() -> Vec<String> {
        Self::AVAILABLE_MODELS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn base_url<'a>(&'a self, request: &'a InferenceRequest) -> &'a str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| request.credentials.region.base_url())
    }

    /// Full endpoint URL for a request
    fn endpoint(&self, request: &InferenceRequest) -> String {
        format!("{}{}", self.base_url(request), Self::GENERATION_PATH)
    }

    /// Upload policy URL for a request
    fn uploads_endpoint(&self, request: &InferenceRequest) -> String {
        format!("{}{}", self.base_url(request), Self::UPLOADS_PATH)
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct GenerationRequest {
    model: String,
    input: GenerationInput,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationInput {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Video(VideoPart),
    Text { text: String },
}

#[derive(Debug, Default, Serialize)]
struct VideoPart {
    video: String,
    fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    resized_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resized_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_pixels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_pixels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_pixels: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    output: GenerationOutput,
    #[serde(default)]
    usage: Option<UsageInfo>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationOutput {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ResponsePart>),
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UploadPolicyResponse {
    data: UploadPolicy,
}

/// Signed form fields for a direct OSS PostObject upload
#[derive(Debug, Deserialize)]
struct UploadPolicy {
    policy: String,
    signature: String,
    upload_dir: String,
    upload_host: String,
    oss_access_key_id: String,
    #[serde(default)]
    x_oss_object_acl: Option<serde_json::Value>,
    #[serde(default)]
    x_oss_forbid_overwrite: Option<serde_json::Value>,
    #[serde(default)]
    max_file_size_mb: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

// =============================================================================
// Request / Response Mapping
// =============================================================================

/// Builds the wire body; `video` is the URL or data URL to send
fn build_request_body(request: &InferenceRequest, video: String) -> GenerationRequest {
    let mut part = VideoPart {
        video,
        fps: request.fps,
        ..Default::default()
    };
    match request.frame_dims {
        FrameDims::Fixed { height, width } => {
            part.resized_height = Some(height);
            part.resized_width = Some(width);
        }
        FrameDims::PixelBudget {
            min_pixels,
            max_pixels,
            total_pixels,
        } => {
            part.min_pixels = Some(min_pixels);
            part.max_pixels = Some(max_pixels);
            part.total_pixels = total_pixels;
        }
    }

    GenerationRequest {
        model: request.model.clone(),
        input: GenerationInput {
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Video(part),
                    ContentPart::Text {
                        text: request.prompt.clone(),
                    },
                ],
            }],
        },
        parameters: GenerationParameters {
            temperature: request.generation.temperature,
            max_tokens: request.generation.max_tokens,
            top_p: request.generation.top_p,
        },
    }
}

/// Parses a successful response body
fn parse_response(body: &str, model: &str) -> CoreResult<InferenceResponse> {
    let response: GenerationResponse = serde_json::from_str(body)?;

    let choice = response.output.choices.into_iter().next().ok_or_else(|| {
        CoreError::AIRequestFailed("No choices returned by the model".to_string())
    })?;

    let text = match choice.message.content {
        Some(MessageContent::Text(text)) => text,
        Some(MessageContent::Parts(parts)) => parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.total_tokens.unwrap_or(u.input_tokens + u.output_tokens),
        })
        .unwrap_or_default();

    Ok(InferenceResponse {
        text,
        usage,
        model: model.to_string(),
        request_id: response.request_id,
    })
}

/// Maps a non-success response onto `RemoteRejected`, keeping the provider's text
fn parse_api_error(status_code: u16, body: &str) -> CoreError {
    match serde_json::from_str::<ApiError>(body) {
        Ok(error) => {
            let mut message = error
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| body.to_string());
            if let Some(request_id) = error.request_id {
                message = format!("{} (request_id: {})", message, request_id);
            }
            CoreError::RemoteRejected {
                status_code,
                code: error.code,
                message,
            }
        }
        Err(_) => CoreError::RemoteRejected {
            status_code,
            code: None,
            message: body.to_string(),
        },
    }
}

/// MIME type for a video file extension
fn video_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("flv") => "video/x-flv",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        _ => "video/mp4",
    }
}

// =============================================================================
// Media Resolution
// =============================================================================

/// How a local video reaches the endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LocalTransfer {
    /// base64 data URL inside the request body
    Inline,
    /// Temporary OSS upload, referenced as `oss://`
    Upload,
}

fn local_transfer(size: u64) -> LocalTransfer {
    if size <= INLINE_MEDIA_MAX_BYTES {
        LocalTransfer::Inline
    } else {
        LocalTransfer::Upload
    }
}

/// Video reference ready for the request body
#[derive(Debug, PartialEq)]
struct ResolvedMedia {
    url: String,
    /// Needs the OSS resolve header
    uploaded: bool,
}

impl ResolvedMedia {
    fn direct(url: String) -> Self {
        Self {
            url,
            uploaded: false,
        }
    }
}

fn read_error(path: &Path, error: std::io::Error) -> CoreError {
    if error.kind() == std::io::ErrorKind::NotFound {
        CoreError::FileNotFound(path.display().to_string())
    } else {
        CoreError::IoError(error)
    }
}

/// Parses the `getPolicy` response
fn parse_upload_policy(body: &str) -> CoreResult<UploadPolicy> {
    let response: UploadPolicyResponse = serde_json::from_str(body)?;
    Ok(response.data)
}

/// Rejects files above the policy's size limit before any bytes are sent
fn check_upload_size(policy: &UploadPolicy, size: u64) -> CoreResult<()> {
    match policy.max_file_size_mb {
        Some(limit_mb) if size > limit_mb.saturating_mul(1024 * 1024) => {
            Err(CoreError::ValidationError(format!(
                "Video is {:.1} MB; the upload limit is {} MB",
                size as f64 / MIB,
                limit_mb
            )))
        }
        _ => Ok(()),
    }
}

/// File name used for the uploaded object
fn upload_file_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_file_stem(&name)
}

fn oss_object_key(upload_dir: &str, file_name: &str) -> String {
    format!("{}/{}", upload_dir.trim_end_matches('/'), file_name)
}

/// Form fields arrive as strings or booleans depending on the region
fn form_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads a small local video into a data URL
#[cfg(feature = "ai-providers")]
async fn inline_data_url(path: &Path) -> CoreResult<String> {
    use base64::Engine;

    let bytes = tokio::fs::read(path).await.map_err(|e| read_error(path, e))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{};base64,{}", video_mime_type(path), encoded))
}

#[cfg(feature = "ai-providers")]
fn map_transport_error(error: reqwest::Error) -> CoreError {
    if error.is_timeout() {
        CoreError::Timeout(format!("DashScope request timed out: {}", error))
    } else {
        CoreError::Transport(format!("DashScope request failed: {}", error))
    }
}

// =============================================================================
// Media Upload
// =============================================================================

#[cfg(feature = "ai-providers")]
impl DashScopeProvider {
    /// Turns the request's media into a URL the endpoint accepts
    async fn resolve_media(
        &self,
        request: &InferenceRequest,
        api_key: &str,
    ) -> CoreResult<ResolvedMedia> {
        let path = match &request.media {
            VideoRef::RemoteUrl(url) => return Ok(ResolvedMedia::direct(url.clone())),
            VideoRef::LocalFile(path) => path,
        };

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| read_error(path, e))?
            .len();
        match local_transfer(size) {
            LocalTransfer::Inline => Ok(ResolvedMedia::direct(inline_data_url(path).await?)),
            LocalTransfer::Upload => {
                let policy = self.fetch_upload_policy(request, api_key).await?;
                let url = self.upload_file(&policy, path, size).await?;
                Ok(ResolvedMedia {
                    url,
                    uploaded: true,
                })
            }
        }
    }

    async fn fetch_upload_policy(
        &self,
        request: &InferenceRequest,
        api_key: &str,
    ) -> CoreResult<UploadPolicy> {
        let response = self
            .client
            .get(self.uploads_endpoint(request))
            .header("Authorization", format!("Bearer {}", api_key))
            .query(&[("action", "getPolicy"), ("model", request.model.as_str())])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &text));
        }
        parse_upload_policy(&text)
    }

    /// Streams the file to OSS and returns its `oss://` reference
    async fn upload_file(
        &self,
        policy: &UploadPolicy,
        path: &Path,
        size: u64,
    ) -> CoreResult<String> {
        use reqwest::multipart::{Form, Part};

        check_upload_size(policy, size)?;

        let file_name = upload_file_name(path);
        let key = oss_object_key(&policy.upload_dir, &file_name);

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| read_error(path, e))?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
        let file_part = Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str(video_mime_type(path))
            .map_err(|e| CoreError::Internal(format!("Failed to create upload part: {}", e)))?;

        let mut form = Form::new()
            .text("OSSAccessKeyId", policy.oss_access_key_id.clone())
            .text("Signature", policy.signature.clone())
            .text("policy", policy.policy.clone());
        if let Some(acl) = &policy.x_oss_object_acl {
            form = form.text("x-oss-object-acl", form_value(acl));
        }
        if let Some(forbid) = &policy.x_oss_forbid_overwrite {
            form = form.text("x-oss-forbid-overwrite", form_value(forbid));
        }
        // OSS ignores fields after the file
        let form = form
            .text("key", key.clone())
            .text("success_action_status", "200")
            .part("file", file_part);

        tracing::info!(
            "Uploading {} ({:.1} MB) to temporary storage",
            path.display(),
            size as f64 / MIB
        );
        let response = self
            .client
            .post(&policy.upload_host)
            .multipart(form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::RemoteRejected {
                status_code: status.as_u16(),
                code: None,
                message: format!("Temporary upload failed: {}", text),
            });
        }
        Ok(format!("oss://{}", key))
    }
}

// =============================================================================
// VisionProvider Implementation
// =============================================================================

#[async_trait]
impl VisionProvider for DashScopeProvider {
    fn name(&self) -> &str {
        "dashscope"
    }

    #[cfg(feature = "ai-providers")]
    async fn infer(&self, request: InferenceRequest) -> CoreResult<InferenceResponse> {
        let api_key = request
            .credentials
            .api_key()
            .ok_or_else(|| CoreError::MissingInput("DashScope API key is not set".to_string()))?
            .to_string();

        let media = self.resolve_media(&request, &api_key).await?;
        let body = build_request_body(&request, media.url);
        let url = self.endpoint(&request);

        tracing::debug!(
            "DashScope request: model={}, fps={}, key={}",
            request.model,
            request.fps,
            request.credentials.key_preview()
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        if media.uploaded {
            builder = builder.header(Self::OSS_RESOLVE_HEADER, "enable");
        }
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &text));
        }

        parse_response(&text, &request.model)
    }

    #[cfg(not(feature = "ai-providers"))]
    async fn infer(&self, _request: InferenceRequest) -> CoreResult<InferenceResponse> {
        Err(CoreError::NotSupported(
            "DashScope provider requires the 'ai-providers' feature".to_string(),
        ))
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "ai-providers")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::annotations::provider::{Credentials, GenerationParams, Region};
    use crate::core::cost::EncodingParameters;
    use crate::core::Resolution;

    fn request(params: &EncodingParameters) -> InferenceRequest {
        InferenceRequest {
            media: VideoRef::RemoteUrl("https://example.com/pov.mp4".to_string()),
            fps: params.fps,
            frame_dims: FrameDims::from(params),
            prompt: "Describe the actions".to_string(),
            model: "qwen-vl-max-latest".to_string(),
            credentials: Credentials::new(Some("sk-test".to_string()), Region::Singapore),
            generation: GenerationParams::default(),
        }
    }

    #[test]
    fn test_provider_creation() {
        let provider = DashScopeProvider::new(DashScopeConfig::default()).unwrap();
        assert_eq!(provider.name(), "dashscope");
        assert_eq!(provider.is_available(), cfg!(feature = "ai-providers"));
    }

    #[test]
    fn test_provider_rejects_zero_timeout() {
        let result = DashScopeProvider::new(DashScopeConfig::default().with_timeout(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_follows_region_and_override() {
        let params = EncodingParameters::fixed(1.0, Resolution::square(448));
        let req = request(&params);

        let provider = DashScopeProvider::new(DashScopeConfig::default()).unwrap();
        assert_eq!(
            provider.endpoint(&req),
            "https://dashscope-intl.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation"
        );

        let provider =
            DashScopeProvider::new(DashScopeConfig::default().with_base_url("http://localhost:8080/"))
                .unwrap();
        assert!(provider.endpoint(&req).starts_with("http://localhost:8080/api/v1/"));
        assert_eq!(
            provider.uploads_endpoint(&req),
            "http://localhost:8080/api/v1/uploads"
        );
    }

    #[test]
    fn test_available_models() {
        let models = DashScopeProvider::available_models();
        assert!(models.contains(&DashScopeProvider::DEFAULT_MODEL.to_string()));
        assert_eq!(models.len(), 4);
    }

    #[test]
    fn test_request_body_fixed_dimensions() {
        let params = EncodingParameters::fixed(2.0, Resolution::new(280, 504));
        let body = build_request_body(&request(&params), "https://example.com/pov.mp4".into());
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "qwen-vl-max-latest");
        let content = &json["input"]["messages"][0]["content"];
        assert_eq!(json["input"]["messages"][0]["role"], "user");
        assert_eq!(content[0]["video"], "https://example.com/pov.mp4");
        assert_eq!(content[0]["fps"], 2.0);
        assert_eq!(content[0]["resized_height"], 280);
        assert_eq!(content[0]["resized_width"], 504);
        assert!(content[0].get("max_pixels").is_none());
        assert_eq!(content[1]["text"], "Describe the actions");
        assert_eq!(json["parameters"]["max_tokens"], 4000);
    }

    #[test]
    fn test_request_body_pixel_budget() {
        let params =
            EncodingParameters::pixel_budget(1.0, Resolution::square(448), 3136, 200_704, None);
        let body = build_request_body(&request(&params), "x".into());
        let json = serde_json::to_value(&body).unwrap();
        let video = &json["input"]["messages"][0]["content"][0];

        assert_eq!(video["min_pixels"], 3136);
        assert_eq!(video["max_pixels"], 200_704);
        assert!(video.get("total_pixels").is_none());
        assert!(video.get("resized_height").is_none());
    }

    #[test]
    fn test_parse_response_parts() {
        let body = r#"{
            "output": {"choices": [{"finish_reason": "stop", "message": {"role": "assistant",
                "content": [{"text": "00:01 picks up cup"}, {"text": "00:04 drinks"}]}}]},
            "usage": {"input_tokens": 5200, "output_tokens": 48, "video_tokens": 4900},
            "request_id": "req-123"
        }"#;
        let response = parse_response(body, "qwen-vl-max-latest").unwrap();

        assert_eq!(response.text, "00:01 picks up cup\n00:04 drinks");
        assert_eq!(response.usage.total_tokens, 5248);
        assert_eq!(response.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn test_parse_response_string_content() {
        let body = r#"{"output": {"choices": [{"message": {"content": "plain"}}]},
            "usage": {"input_tokens": 1, "output_tokens": 2, "total_tokens": 10}}"#;
        let response = parse_response(body, "m").unwrap();
        assert_eq!(response.text, "plain");
        assert_eq!(response.usage.total_tokens, 10);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = parse_response(r#"{"output": {"choices": []}}"#, "m").unwrap_err();
        assert!(matches!(err, CoreError::AIRequestFailed(_)));

        let err = parse_response("not json", "m").unwrap_err();
        assert!(matches!(err, CoreError::JsonError(_)));
    }

    #[test]
    fn test_parse_api_error_verbatim() {
        let body = r#"{"code": "InvalidParameter", "message": "The video is too long", "request_id": "abc"}"#;
        match parse_api_error(400, body) {
            CoreError::RemoteRejected {
                status_code,
                code,
                message,
            } => {
                assert_eq!(status_code, 400);
                assert_eq!(code.as_deref(), Some("InvalidParameter"));
                assert!(message.starts_with("The video is too long"));
                assert!(message.contains("abc"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        match parse_api_error(502, "Bad Gateway") {
            CoreError::RemoteRejected { code, message, .. } => {
                assert!(code.is_none());
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_video_mime_type() {
        assert_eq!(video_mime_type(Path::new("a.MOV")), "video/quicktime");
        assert_eq!(video_mime_type(Path::new("a.webm")), "video/webm");
        assert_eq!(video_mime_type(Path::new("a")), "video/mp4");
    }

    // -------------------------------------------------------------------------
    // Media Resolution
    // -------------------------------------------------------------------------

    #[test]
    fn test_local_transfer_threshold() {
        assert_eq!(local_transfer(0), LocalTransfer::Inline);
        assert_eq!(local_transfer(INLINE_MEDIA_MAX_BYTES), LocalTransfer::Inline);
        assert_eq!(local_transfer(INLINE_MEDIA_MAX_BYTES + 1), LocalTransfer::Upload);
        assert_eq!(local_transfer(900 * 1024 * 1024), LocalTransfer::Upload);
    }

    fn policy_body() -> &'static str {
        r#"{
            "request_id": "req-9",
            "data": {
                "policy": "eyJleHBpcmF0aW9uIjoi",
                "signature": "c2lnbmF0dXJl",
                "upload_dir": "dashscope-instant/abc123/2025-01-01/",
                "upload_host": "https://dashscope-file-mgr.oss-cn-beijing.aliyuncs.com",
                "expire_in_seconds": 300,
                "max_file_size_mb": 1024,
                "capacity_limit_mb": 999999999,
                "oss_access_key_id": "LTAI-test",
                "x_oss_object_acl": "private",
                "x_oss_forbid_overwrite": "true"
            }
        }"#
    }

    #[test]
    fn test_parse_upload_policy() {
        let policy = parse_upload_policy(policy_body()).unwrap();
        assert_eq!(policy.oss_access_key_id, "LTAI-test");
        assert_eq!(policy.upload_dir, "dashscope-instant/abc123/2025-01-01/");
        assert_eq!(policy.max_file_size_mb, Some(1024));
        assert_eq!(form_value(policy.x_oss_object_acl.as_ref().unwrap()), "private");
        assert_eq!(form_value(&serde_json::json!(true)), "true");

        assert!(parse_upload_policy(r#"{"code": "InvalidApiKey"}"#).is_err());
    }

    #[test]
    fn test_upload_size_limit() {
        let policy = parse_upload_policy(policy_body()).unwrap();
        assert!(check_upload_size(&policy, 1024 * 1024 * 1024).is_ok());

        let err = check_upload_size(&policy, 1024 * 1024 * 1024 + 1).unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[test]
    fn test_oss_object_key() {
        let name = upload_file_name(Path::new("/videos/pov: kitchen.mp4"));
        assert_eq!(name, "pov_ kitchen.mp4");
        assert_eq!(
            oss_object_key("dashscope-instant/abc123/", &name),
            "dashscope-instant/abc123/pov_ kitchen.mp4"
        );
    }

    #[cfg(feature = "ai-providers")]
    #[tokio::test]
    async fn test_small_local_file_is_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.webm");
        std::fs::write(&path, b"abc").unwrap();

        let provider = DashScopeProvider::new(DashScopeConfig::default()).unwrap();
        let params = EncodingParameters::fixed(1.0, Resolution::square(448));
        let mut req = request(&params);
        req.media = VideoRef::LocalFile(path);

        let media = provider.resolve_media(&req, "sk-test").await.unwrap();
        assert_eq!(
            media,
            ResolvedMedia::direct("data:video/webm;base64,YWJj".to_string())
        );

        req.media = VideoRef::LocalFile(dir.path().join("none.mp4"));
        let missing = provider.resolve_media(&req, "sk-test").await;
        assert!(matches!(missing, Err(CoreError::FileNotFound(_))));
    }

    #[cfg(feature = "ai-providers")]
    #[tokio::test]
    async fn test_remote_url_is_passed_through() {
        let provider = DashScopeProvider::new(DashScopeConfig::default()).unwrap();
        let params = EncodingParameters::fixed(1.0, Resolution::square(448));

        let media = provider
            .resolve_media(&request(&params), "sk-test")
            .await
            .unwrap();
        assert_eq!(media.url, "https://example.com/pov.mp4");
        assert!(!media.uploaded);
    }

    #[cfg(not(feature = "ai-providers"))]
    #[tokio::test]
    async fn test_infer_requires_feature() {
        let provider = DashScopeProvider::new(DashScopeConfig::default()).unwrap();
        let params = EncodingParameters::fixed(1.0, Resolution::square(448));
        let err = provider.infer(request(&params)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotSupported(_)));
    }
}
