//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! model constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Model used for interactive chat and thinking mode
pub const MODEL_CHAT: &str = "gemini-3-pro-preview";
/// Low-latency model for `/fast`
pub const MODEL_FAST: &str = "gemini-2.5-flash-lite";
/// Image synthesis model
pub const MODEL_IMAGE_GEN: &str = "gemini-3-pro-image-preview";
/// Image editing model
pub const MODEL_IMAGE_EDIT: &str = "gemini-2.5-flash-image";
/// Veo video generation model
pub const MODEL_VIDEO_GEN: &str = "veo-3.1-fast-generate-preview";
/// Audio transcription model
pub const MODEL_AUDIO_TRANSCRIPT: &str = "gemini-2.5-flash";
/// Text-to-speech model
pub const MODEL_TTS: &str = "gemini-2.5-flash-preview-tts";
/// Video understanding model
pub const MODEL_MULTIMODAL: &str = "gemini-3-pro-preview";

/// Default system instruction for chat
pub const SYSTEM_INSTRUCTION: &str = "You are Gobo Ai, a helpful, witty, and advanced AI assistant. \n\
You can analyze images, videos, and audio. You can also generate images and videos.\n\
Format your responses using Markdown.";

/// Maximum number of turns retained per conversation
pub const HISTORY_LIMIT: usize = 20;

/// Thinking budget (tokens) for `/think`
pub const THINKING_BUDGET: u32 = 32_768;
/// Prebuilt voice used for speech synthesis
pub const DEFAULT_SPEECH_VOICE: &str = "Kore";
/// Aspect ratio for generated and edited images
pub const IMAGE_ASPECT_RATIO: &str = "1:1";
/// Output size for generated images
pub const IMAGE_SIZE: &str = "1K";
/// Aspect ratio for generated videos
pub const VIDEO_ASPECT_RATIO: &str = "16:9";
/// Resolution for generated videos
pub const VIDEO_RESOLUTION: &str = "720p";
/// Interval between polls of a long-running video operation
pub const VIDEO_POLL_INTERVAL_SECS: u64 = 5;

/// Prompt sent along with audio for transcription
pub const TRANSCRIBE_PROMPT: &str = "Transcribe this audio.";
/// Prompt used for video analysis when the user gave no caption
pub const DESCRIBE_VIDEO_PROMPT: &str = "Describe this video.";

/// Default Gemini REST endpoint
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// Transport retry configuration (Telegram file downloads)
/// Maximum attempts for a Telegram API file operation
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Chat settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ChatSettings {
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Override for the Gemini REST endpoint
    pub gemini_api_base: Option<String>,
    /// Override for the default system instruction
    pub system_instruction: Option<String>,

    /// Chat model override
    pub chat_model: Option<String>,
    /// Fast model override
    pub fast_model: Option<String>,
    /// Image generation model override
    pub image_model: Option<String>,
    /// Image editing model override
    pub image_edit_model: Option<String>,
    /// Video generation model override
    pub video_model: Option<String>,
    /// Transcription model override
    pub transcription_model: Option<String>,
    /// Speech model override
    pub speech_model: Option<String>,
    /// Video understanding model override
    pub multimodal_model: Option<String>,

    /// Prebuilt voice override for speech synthesis
    pub speech_voice: Option<String>,
    /// Number of turns retained per conversation
    pub history_limit: Option<usize>,
    /// HTTP timeout for model calls; unset means no local timeout
    pub llm_http_timeout_secs: Option<u64>,
}

/// Build the layered configuration source.
///
/// Sources, lowest priority first: `config/default`, `config/{RUN_MODE}`,
/// `config/local`, `APP__*` variables, then plain environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain variables; UPPER_SNAKE_CASE maps to snake_case, empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

impl ChatSettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// System instruction for chat requests
    #[must_use]
    pub fn system_instruction(&self) -> String {
        non_empty(self.system_instruction.as_ref())
            .unwrap_or(SYSTEM_INSTRUCTION)
            .to_string()
    }

    /// Gemini REST endpoint without trailing slash
    #[must_use]
    pub fn gemini_api_base(&self) -> String {
        non_empty(self.gemini_api_base.as_ref())
            .unwrap_or(GEMINI_API_BASE)
            .trim_end_matches('/')
            .to_string()
    }

    /// Model used for chat
    #[must_use]
    pub fn chat_model(&self) -> String {
        non_empty(self.chat_model.as_ref()).unwrap_or(MODEL_CHAT).to_string()
    }

    /// Model used for `/fast`
    #[must_use]
    pub fn fast_model(&self) -> String {
        non_empty(self.fast_model.as_ref()).unwrap_or(MODEL_FAST).to_string()
    }

    /// Model used for image generation
    #[must_use]
    pub fn image_model(&self) -> String {
        non_empty(self.image_model.as_ref()).unwrap_or(MODEL_IMAGE_GEN).to_string()
    }

    /// Model used for image editing
    #[must_use]
    pub fn image_edit_model(&self) -> String {
        non_empty(self.image_edit_model.as_ref())
            .unwrap_or(MODEL_IMAGE_EDIT)
            .to_string()
    }

    /// Model used for video generation
    #[must_use]
    pub fn video_model(&self) -> String {
        non_empty(self.video_model.as_ref()).unwrap_or(MODEL_VIDEO_GEN).to_string()
    }

    /// Model used for audio transcription
    #[must_use]
    pub fn transcription_model(&self) -> String {
        non_empty(self.transcription_model.as_ref())
            .unwrap_or(MODEL_AUDIO_TRANSCRIPT)
            .to_string()
    }

    /// Model used for speech synthesis
    #[must_use]
    pub fn speech_model(&self) -> String {
        non_empty(self.speech_model.as_ref()).unwrap_or(MODEL_TTS).to_string()
    }

    /// Model used for video understanding
    #[must_use]
    pub fn multimodal_model(&self) -> String {
        non_empty(self.multimodal_model.as_ref())
            .unwrap_or(MODEL_MULTIMODAL)
            .to_string()
    }

    /// Prebuilt voice for speech synthesis
    #[must_use]
    pub fn speech_voice(&self) -> String {
        non_empty(self.speech_voice.as_ref())
            .unwrap_or(DEFAULT_SPEECH_VOICE)
            .to_string()
    }

    /// Number of turns retained per conversation (never zero)
    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.history_limit.filter(|n| *n > 0).unwrap_or(HISTORY_LIMIT)
    }
}
