//! Video Annotation
//!
//! Sends a video and a task prompt to a remote vision-language model and
//! drives the request through a staged, cancellable pipeline.
//!
//! ## Layout
//!
//! - **models.rs**: attempts, stages, results and the error taxonomy
//! - **provider.rs**: `VisionProvider` trait and the mock provider
//! - **providers/**: concrete backends (DashScope)
//! - **pipeline.rs**: the `AnnotationPipeline` state machine
//! - **store.rs**: saved results under the outputs directory
//! - **prompt.rs**: prompt files

pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod store;

pub use models::*;
pub use pipeline::{AnnotationPipeline, PipelineConfig};
pub use prompt::PromptLibrary;
pub use provider::{
    Credentials, FrameDims, GenerationParams, InferenceRequest, InferenceResponse,
    MockVisionProvider, Region, TokenUsage, VisionProvider,
};
pub use providers::{DashScopeConfig, DashScopeProvider};
pub use store::{AnnotationStore, SavedAnnotation, StoredAnnotation};
