//! Model client interface
//!
//! A narrow trait over the hosted model plus the Gemini REST implementation.

/// Google Gemini provider
pub mod gemini;
mod http_utils;

use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::assembler::ContentBlock;
use crate::conversation::{Attachment, Source};

pub use gemini::GeminiClient;

/// Errors that can occur during model calls
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// The response contained no usable content
    #[error("Empty response: {0}")]
    EmptyResponse(String),
    /// The operation is not supported by this client
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Any other unexpected error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Output modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Text output
    Text,
    /// Image output
    Image,
    /// Audio output
    Audio,
}

/// Opaque generation settings passed through to the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOptions {
    /// System instruction
    pub system_instruction: Option<String>,
    /// Aspect ratio for image or video output (e.g. "1:1", "16:9")
    pub aspect_ratio: Option<String>,
    /// Image size (e.g. "1K")
    pub image_size: Option<String>,
    /// Video resolution (e.g. "720p")
    pub resolution: Option<String>,
    /// Prebuilt voice for speech output
    pub voice: Option<String>,
    /// Thinking budget in tokens
    pub thinking_budget: Option<u32>,
    /// Requested output modalities; empty means provider default
    pub response_modalities: Vec<Modality>,
    /// Enable Google Maps grounding
    pub maps_grounding: bool,
}

/// A single model call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Model id
    pub model: String,
    /// Assembled conversation payload
    pub contents: Vec<ContentBlock>,
    /// Generation settings
    pub options: GenerationOptions,
}

/// Result of a batch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    /// Generated text
    pub text: Option<String>,
    /// Generated image, audio or video
    pub attachment: Option<Attachment>,
    /// Grounding sources
    pub sources: Vec<Source>,
}

impl GenerationResult {
    /// Text-only result
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Whether the result has neither non-empty text nor attachment
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
            && self.attachment.as_ref().map_or(true, Attachment::is_empty)
    }
}

/// Cumulative state of a streaming reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Full text received so far
    pub text: String,
    /// Grounding sources received so far
    pub sources: Vec<Source>,
}

impl From<String> for Snapshot {
    fn from(text: String) -> Self {
        Self {
            text,
            sources: Vec::new(),
        }
    }
}

/// Lazy stream of cumulative snapshots; each item is the full reply so far
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, LlmError>>;

/// Interface to the hosted model
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Run a batch generation
    async fn generate(&self, request: GenerateRequest) -> Result<GenerationResult, LlmError>;

    /// Start a streaming generation
    async fn generate_stream(&self, request: GenerateRequest) -> Result<SnapshotStream, LlmError>;

    /// Run a long-running video generation and return the video.
    ///
    /// Default implementation returns an error indicating video generation is not supported.
    async fn generate_video(&self, _request: GenerateRequest) -> Result<GenerationResult, LlmError> {
        Err(LlmError::Unsupported(
            "Video generation not supported by this client".to_string(),
        ))
    }
}
