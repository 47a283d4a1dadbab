//! Chat service
//!
//! The control flow shared by every front-end: read history, assemble the
//! request, call the model, relay the response and record the turns.

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::assembler::{assemble, InputError, UserInput};
use crate::config::{
    ChatSettings, DESCRIBE_VIDEO_PROMPT, IMAGE_ASPECT_RATIO, IMAGE_SIZE, THINKING_BUDGET,
    TRANSCRIBE_PROMPT, VIDEO_ASPECT_RATIO, VIDEO_RESOLUTION,
};
use crate::conversation::{ConversationKey, ConversationStore, Turn};
use crate::llm::{
    GenerateRequest, GenerationOptions, GenerationResult, LlmError, Modality, ModelClient,
};
use crate::relay::{drive_batch, PendingTurn, ResponseRelay, TurnPresenter};

/// Failure text for media tasks, which usually fail on oversized uploads
pub const MEDIA_ERROR_MESSAGE: &str =
    "❌ An error occurred. If you sent a large media file, it might be too big for the bot to handle.";

/// One-shot generation tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Low-latency answer
    Fast,
    /// Answer with an extended thinking budget
    Think,
    /// Text-to-image
    ImageGeneration,
    /// Edit an attached image following the prompt
    ImageEdit,
    /// Text-to-speech
    Speech,
    /// Text-to-video
    VideoGeneration,
    /// Transcribe attached audio
    Transcription,
    /// Describe or answer questions about an attached video
    VideoAnalysis,
}

/// How a task calls the model and what happens to its turns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProfile {
    /// Model id
    pub model: String,
    /// Generation settings
    pub options: GenerationOptions,
    /// Whether the user and model turns are appended to the conversation
    pub records: bool,
    /// Whether the input must carry an attachment
    pub requires_attachment: bool,
    /// Prompt used when the input has no text
    pub default_prompt: Option<&'static str>,
    /// Text of the errored turn on failure
    pub error_message: &'static str,
    /// Notice for a reply that came back without the requested media; `None`
    /// accepts text-only replies
    pub missing_media_message: Option<&'static str>,
}

impl Task {
    /// Resolve the profile of this task against the current settings
    #[must_use]
    pub fn profile(self, settings: &ChatSettings) -> TaskProfile {
        let image_options = GenerationOptions {
            aspect_ratio: Some(IMAGE_ASPECT_RATIO.to_string()),
            response_modalities: vec![Modality::Text, Modality::Image],
            ..GenerationOptions::default()
        };

        let base = TaskProfile {
            model: String::new(),
            options: GenerationOptions::default(),
            records: false,
            requires_attachment: false,
            default_prompt: None,
            error_message: "❌ Error.",
            missing_media_message: None,
        };

        match self {
            Self::Fast => TaskProfile {
                model: settings.fast_model(),
                ..base
            },
            Self::Think => TaskProfile {
                model: settings.chat_model(),
                options: GenerationOptions {
                    thinking_budget: Some(THINKING_BUDGET),
                    ..GenerationOptions::default()
                },
                error_message: "❌ Error during thinking process.",
                ..base
            },
            Self::ImageGeneration => TaskProfile {
                model: settings.image_model(),
                options: GenerationOptions {
                    image_size: Some(IMAGE_SIZE.to_string()),
                    ..image_options
                },
                records: true,
                error_message: "❌ Failed to generate image.",
                missing_media_message: Some("⚠️ Generation completed but no image returned."),
                ..base
            },
            Self::ImageEdit => TaskProfile {
                model: settings.image_edit_model(),
                options: image_options,
                records: true,
                requires_attachment: true,
                error_message: "❌ Failed to edit image.",
                missing_media_message: Some("⚠️ Could not edit the image."),
                ..base
            },
            Self::Speech => TaskProfile {
                model: settings.speech_model(),
                options: GenerationOptions {
                    voice: Some(settings.speech_voice()),
                    response_modalities: vec![Modality::Audio],
                    ..GenerationOptions::default()
                },
                error_message: "❌ TTS Failed.",
                missing_media_message: Some("⚠️ Could not generate audio."),
                ..base
            },
            Self::VideoGeneration => TaskProfile {
                model: settings.video_model(),
                options: GenerationOptions {
                    aspect_ratio: Some(VIDEO_ASPECT_RATIO.to_string()),
                    resolution: Some(VIDEO_RESOLUTION.to_string()),
                    ..GenerationOptions::default()
                },
                error_message: "❌ Failed to generate video.",
                ..base
            },
            Self::Transcription => TaskProfile {
                model: settings.transcription_model(),
                requires_attachment: true,
                default_prompt: Some(TRANSCRIBE_PROMPT),
                error_message: MEDIA_ERROR_MESSAGE,
                ..base
            },
            Self::VideoAnalysis => TaskProfile {
                model: settings.multimodal_model(),
                options: GenerationOptions {
                    system_instruction: Some(settings.system_instruction()),
                    ..GenerationOptions::default()
                },
                requires_attachment: true,
                default_prompt: Some(DESCRIBE_VIDEO_PROMPT),
                error_message: MEDIA_ERROR_MESSAGE,
                ..base
            },
        }
    }
}

/// Chat service shared by all front-ends
pub struct ChatService<Id: ConversationKey> {
    store: Arc<ConversationStore<Id>>,
    relay: ResponseRelay<Id>,
    client: Arc<dyn ModelClient>,
    settings: Arc<ChatSettings>,
}

impl<Id: ConversationKey> ChatService<Id> {
    /// Create a service with a fresh store sized from the settings
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, settings: Arc<ChatSettings>) -> Self {
        let store = Arc::new(ConversationStore::new(settings.history_limit()));
        Self::with_store(store, client, settings)
    }

    /// Create a service over an existing store
    #[must_use]
    pub fn with_store(
        store: Arc<ConversationStore<Id>>,
        client: Arc<dyn ModelClient>,
        settings: Arc<ChatSettings>,
    ) -> Self {
        Self {
            relay: ResponseRelay::new(Arc::clone(&store)),
            store,
            client,
            settings,
        }
    }

    /// Settings in effect
    #[must_use]
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Stream a chat reply.
    ///
    /// The user turn is recorded before the call; the reply (or the error
    /// turn) is recorded once finalized.
    #[instrument(skip(self, input, presenter))]
    pub async fn chat(&self, id: Id, input: UserInput, presenter: &dyn TurnPresenter) -> Turn {
        let history = self.store.get(&id).await;
        let contents = assemble(&history, &input);
        self.store.append(id.clone(), input.into_turn()).await;

        let request = GenerateRequest {
            model: self.settings.chat_model(),
            contents,
            options: GenerationOptions {
                system_instruction: Some(self.settings.system_instruction()),
                maps_grounding: true,
                ..GenerationOptions::default()
            },
        };
        info!(model = %request.model, blocks = request.contents.len(), "Chat request");

        self.relay
            .relay_stream(
                id,
                PendingTurn::new(),
                self.client.generate_stream(request),
                presenter,
            )
            .await
    }

    /// Run a one-shot task.
    ///
    /// Image tasks are recorded in the conversation; the others leave it
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MissingAttachment` if the task needs an
    /// attachment and the input has none. No model call is made then.
    #[instrument(skip(self, input, presenter))]
    pub async fn run_task(
        &self,
        id: Id,
        task: Task,
        input: UserInput,
        presenter: &dyn TurnPresenter,
    ) -> Result<Turn, InputError> {
        let profile = task.profile(&self.settings);
        if profile.requires_attachment && input.attachment().is_none() {
            return Err(InputError::MissingAttachment);
        }
        let input = match profile.default_prompt {
            Some(prompt) => input.with_default_text(prompt),
            None => input,
        };

        let request = GenerateRequest {
            model: profile.model,
            contents: assemble(&[], &input),
            options: profile.options,
        };
        info!(model = %request.model, ?task, "Task request");

        let pending = PendingTurn::with_error_message(profile.error_message);
        let pending = match profile.missing_media_message {
            Some(notice) => pending.requiring_attachment(notice),
            None => pending,
        };
        let call = self.task_call(task, request);

        let turn = if profile.records {
            self.store.append(id.clone(), input.into_turn()).await;
            self.relay.relay_batch(id, pending, call, presenter).await
        } else {
            drive_batch(pending, call, presenter).await
        };
        Ok(turn)
    }

    fn task_call(
        &self,
        task: Task,
        request: GenerateRequest,
    ) -> BoxFuture<'_, Result<GenerationResult, LlmError>> {
        async move {
            if task == Task::VideoGeneration {
                self.client.generate_video(request).await
            } else {
                self.client.generate(request).await
            }
        }
        .boxed()
    }

    /// Forget the conversation
    pub async fn reset(&self, id: &Id) -> bool {
        self.store.reset(id).await
    }

    /// Snapshot of the conversation
    pub async fn history(&self, id: &Id) -> Vec<Turn> {
        self.store.get(id).await
    }
}
