//! Relay presenter that renders turns as Telegram messages.
//!
//! A turn starts as a placeholder message (or only a chat action), is
//! edited in place while snapshots arrive, and is replaced by the formatted
//! reply once finalized. Edits are throttled to stay clear of Telegram's
//! flood limits.

use anyhow::Result;
use async_trait::async_trait;
use gobo_core::{PendingTurn, Source, Task, Turn, TurnPresenter};
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, MessageId, ParseMode};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::media::send_attachment;
use super::messaging::{render_parts, send_rendered_parts, TELEGRAM_MESSAGE_LIMIT};
use super::resilient::{
    edit_message_resilient, edit_message_safe_resilient, send_message_resilient,
};

/// Minimum time between two streaming edits of the same message
pub const EDIT_INTERVAL: Duration = Duration::from_millis(1200);

/// How a kind of turn looks in the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterStyle {
    /// Message shown while the model works; `None` shows only the chat action
    pub placeholder: Option<&'static str>,
    /// Chat action sent when the turn starts
    pub action: ChatAction,
    /// Markdown prepended to a successful reply
    pub prefix: &'static str,
    /// Caption generated media with the user's prompt when the model sends
    /// no text
    pub prompt_caption: bool,
}

impl PresenterStyle {
    /// Streaming chat reply
    pub const CHAT: Self = Self {
        placeholder: Some("⏳ Thinking..."),
        action: ChatAction::Typing,
        prefix: "",
        prompt_caption: false,
    };

    /// Style for a one-shot task
    #[must_use]
    pub const fn for_task(task: Task) -> Self {
        match task {
            Task::Fast => Self {
                placeholder: None,
                prefix: "⚡ ",
                ..Self::CHAT
            },
            Task::Think => Self {
                placeholder: Some("🧠 Thinking deeply..."),
                ..Self::CHAT
            },
            Task::ImageGeneration => Self {
                placeholder: Some("🎨 Generating image..."),
                action: ChatAction::UploadPhoto,
                prefix: "🎨 ",
                prompt_caption: true,
            },
            Task::ImageEdit => Self {
                placeholder: Some("✏️ Editing image..."),
                action: ChatAction::UploadPhoto,
                prefix: "✏️ ",
                prompt_caption: true,
            },
            Task::Speech => Self {
                placeholder: None,
                action: ChatAction::RecordVoice,
                ..Self::CHAT
            },
            Task::VideoGeneration => Self {
                placeholder: Some("🎬 Generating video with Veo... this may take a moment."),
                action: ChatAction::UploadVideo,
                prefix: "🎬 ",
                prompt_caption: true,
            },
            Task::Transcription => Self {
                placeholder: None,
                prefix: "📝 **Transcription:**\n",
                ..Self::CHAT
            },
            Task::VideoAnalysis => Self {
                placeholder: Some("👀 Analyzing video... (This might take a while)"),
                ..Self::CHAT
            },
        }
    }
}

/// Whether enough time has passed since the last edit
#[must_use]
pub fn should_edit(last_edit: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last_edit.map_or(true, |last| now.saturating_duration_since(last) >= interval)
}

/// Raw snapshot text made safe for an HTML edit, at most
/// [`TELEGRAM_MESSAGE_LIMIT`] characters once escaped
#[must_use]
pub fn preview_text(snapshot: &str) -> String {
    let mut preview = String::new();
    let mut count = 0;
    let mut buf = [0u8; 4];
    for ch in snapshot.chars() {
        let raw: &str = ch.encode_utf8(&mut buf);
        let escaped = html_escape::encode_text(raw);
        let len = escaped.chars().count();
        if count + len > TELEGRAM_MESSAGE_LIMIT {
            break;
        }
        preview.push_str(&escaped);
        count += len;
    }
    preview
}

/// Grounding sources as an HTML link list
#[must_use]
pub fn sources_message(sources: &[Source]) -> Option<String> {
    if sources.is_empty() {
        return None;
    }
    let links = sources
        .iter()
        .map(|source| {
            format!(
                "• <a href=\"{}\">{}</a>",
                html_escape::encode_double_quoted_attribute(&source.uri),
                html_escape::encode_text(&source.title)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!("📍 <b>Sources:</b>\n{links}"))
}

/// How the rendered reply reaches the chat
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryPlan<'a> {
    /// Replace the placeholder with the first part, then send the rest
    EditFirst {
        /// Message to edit
        placeholder: MessageId,
        /// Part shown in the placeholder
        first: &'a str,
        /// Parts sent as new messages
        rest: &'a [String],
    },
    /// Send every part as a new message
    SendAll {
        /// Placeholder left without content, deleted first
        stale: Option<MessageId>,
        /// Parts to send
        parts: &'a [String],
    },
}

/// Decide how rendered `parts` are delivered given the turn's placeholder
#[must_use]
pub fn plan_delivery(parts: &[String], placeholder: Option<MessageId>) -> DeliveryPlan<'_> {
    match (placeholder, parts.split_first()) {
        (Some(placeholder), Some((first, rest))) => DeliveryPlan::EditFirst {
            placeholder,
            first,
            rest,
        },
        (stale, _) => DeliveryPlan::SendAll { stale, parts },
    }
}

#[derive(Debug, Default)]
struct DeliveryState {
    placeholder: Option<MessageId>,
    last_edit: Option<Instant>,
    last_shown: String,
}

/// Presents one turn in one chat
pub struct TelegramPresenter {
    bot: Bot,
    chat_id: ChatId,
    style: PresenterStyle,
    prompt: Option<String>,
    state: Mutex<DeliveryState>,
}

impl TelegramPresenter {
    /// Create a presenter for `chat_id`
    #[must_use]
    pub fn new(bot: Bot, chat_id: ChatId, style: PresenterStyle) -> Self {
        Self {
            bot,
            chat_id,
            style,
            prompt: None,
            state: Mutex::new(DeliveryState::default()),
        }
    }

    /// Prompt the turn answers, used as the media caption when the style
    /// asks for it
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into()).filter(|p| !p.trim().is_empty());
        self
    }

    /// Markdown shown for the finalized turn, with the style prefix
    fn reply_text(&self, turn: &Turn) -> Option<String> {
        if turn.is_error() {
            return turn.text().map(ToString::to_string);
        }
        let caption = turn
            .attachment()
            .and(self.prompt.as_deref())
            .filter(|_| self.style.prompt_caption);
        let body = turn.text().or(caption)?;
        Some(format!("{}{body}", self.style.prefix))
    }

    async fn delete_placeholder(&self, id: MessageId) {
        if let Err(e) = self.bot.delete_message(self.chat_id, id).await {
            debug!("Failed to delete placeholder: {e}");
        }
    }

    async fn deliver(&self, turn: &Turn, placeholder: Option<MessageId>) -> Result<()> {
        let text = self.reply_text(turn);

        if let Some(attachment) = turn.attachment() {
            if let Some(id) = placeholder {
                self.delete_placeholder(id).await;
            }
            send_attachment(&self.bot, self.chat_id, attachment, text.as_deref()).await?;
        } else {
            let parts = render_parts(text.as_deref().unwrap_or_default());
            self.deliver_parts(&parts, placeholder).await?;
        }

        if let Some(sources) = sources_message(turn.sources()) {
            send_message_resilient(&self.bot, self.chat_id, sources, Some(ParseMode::Html)).await?;
        }
        Ok(())
    }

    async fn deliver_parts(&self, parts: &[String], placeholder: Option<MessageId>) -> Result<()> {
        match plan_delivery(parts, placeholder) {
            DeliveryPlan::EditFirst {
                placeholder,
                first,
                rest,
            } => {
                let edited = edit_message_resilient(
                    &self.bot,
                    self.chat_id,
                    placeholder,
                    first,
                    Some(ParseMode::Html),
                )
                .await;
                match edited {
                    Ok(_) => send_rendered_parts(&self.bot, self.chat_id, rest).await,
                    Err(e) => {
                        warn!(
                            chat_id = self.chat_id.0,
                            "Failed to edit placeholder, resending reply: {e}"
                        );
                        self.delete_placeholder(placeholder).await;
                        send_rendered_parts(&self.bot, self.chat_id, parts).await
                    }
                }
            }
            DeliveryPlan::SendAll { stale, parts } => {
                if let Some(id) = stale {
                    self.delete_placeholder(id).await;
                }
                send_rendered_parts(&self.bot, self.chat_id, parts).await
            }
        }
    }
}
