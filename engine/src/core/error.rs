//! ClipScribe Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    // =========================================================================
    // Remote Inference Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Remote rejected request (status {status_code}): {message}")]
    RemoteRejected {
        status_code: u16,
        code: Option<String>,
        message: String,
    },

    #[error("AI request failed: {0}")]
    AIRequestFailed(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;
