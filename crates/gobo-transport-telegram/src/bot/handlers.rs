//! Command and message handlers.
//!
//! Every handler resolves the conversation by chat id, turns the update into
//! a [`UserInput`] and hands it to the shared [`ChatService`]. Input that
//! cannot be used is answered with a short hint before any model call.

use anyhow::Result;
use gobo_core::{Attachment, ChatService, InputError, Task, UserInput};
use std::sync::Arc;
use teloxide::{prelude::*, types::ParseMode, utils::command::BotCommands};
use tracing::{debug, error, info, warn};

use super::media::IncomingMedia;
use super::presenter::{PresenterStyle, TelegramPresenter};

/// Chat service keyed by Telegram chat id
pub type BotService = ChatService<i64>;

const WELCOME_TEXT: &str = "🤖 <b>Hi, I'm Gobo Ai!</b>\n\n\
     Here's what I can do:\n\
     💬 <b>Chat</b>: Just type naturally (I use Google Maps too!)\n\
     🎨 <b>Image</b>: <code>/image &lt;prompt&gt;</code> (1K High Quality)\n\
     ✏️ <b>Edit</b>: Reply to a photo with <code>/edit &lt;prompt&gt;</code>\n\
     🎬 <b>Video</b>: <code>/video &lt;prompt&gt;</code> (Veo)\n\
     🗣️ <b>Speak</b>: <code>/say &lt;text&gt;</code>\n\
     🧠 <b>Think</b>: <code>/think &lt;complex query&gt;</code>\n\
     ⚡ <b>Fast</b>: <code>/fast &lt;query&gt;</code>\n\n\
     You can also send me <b>Photos</b>, <b>Videos</b>, or <b>Audio</b> to analyze!";

const EDIT_NEEDS_REPLY: &str = "⚠️ Please reply to a photo with the /edit command.";

const EMPTY_MESSAGE_HINT: &str = "⚠️ Please send some text or media.";

const DOWNLOAD_ERROR_MESSAGE: &str =
    "❌ Could not download the file. If it is large, it might be too big for the bot to handle.";

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Reset the conversation and show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Clear chat history
    #[command(description = "Clear chat history.")]
    Clear,
    /// Check bot health
    #[command(description = "Check bot health.")]
    Healthcheck,
    /// Generate an image
    #[command(description = "Generate an image: /image <prompt>")]
    Image(String),
    /// Edit the photo this command replies to
    #[command(description = "Reply to a photo: /edit <prompt>")]
    Edit(String),
    /// Generate a video with Veo
    #[command(description = "Generate a video: /video <prompt>")]
    Video(String),
    /// Speak the text
    #[command(description = "Text to speech: /say <text>")]
    Say(String),
    /// Answer with extended thinking
    #[command(description = "Think deeply: /think <query>")]
    Think(String),
    /// Answer with the low-latency model
    #[command(description = "Quick answer: /fast <query>")]
    Fast(String),
}

impl Command {
    /// Task run by the command and its prompt, for the one-shot commands
    #[must_use]
    pub fn task(&self) -> Option<(Task, &str)> {
        match self {
            Self::Image(prompt) => Some((Task::ImageGeneration, prompt)),
            Self::Edit(prompt) => Some((Task::ImageEdit, prompt)),
            Self::Video(prompt) => Some((Task::VideoGeneration, prompt)),
            Self::Say(text) => Some((Task::Speech, text)),
            Self::Think(query) => Some((Task::Think, query)),
            Self::Fast(query) => Some((Task::Fast, query)),
            Self::Start | Self::Clear | Self::Healthcheck => None,
        }
    }
}

/// Usage hint for a command invoked without its argument
#[must_use]
pub const fn usage_hint(task: Task) -> &'static str {
    match task {
        Task::ImageGeneration => "Usage: /image <prompt>",
        Task::ImageEdit => "Usage: reply to a photo with /edit <prompt>",
        Task::VideoGeneration => "Usage: /video <prompt>",
        Task::Speech => "Usage: /say <text>",
        Task::Think => "Usage: /think <query>",
        Task::Fast => "Usage: /fast <query>",
        Task::Transcription => "Please send a voice message or an audio file.",
        Task::VideoAnalysis => "Please send a video.",
    }
}

fn user_id(msg: &Message) -> i64 {
    msg.from
        .as_ref()
        .and_then(|u| i64::try_from(u.id.0).ok())
        .unwrap_or_default()
}

/// Route a parsed command.
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    service: Arc<BotService>,
) -> Result<()> {
    match &cmd {
        Command::Start => start(&bot, &msg, &service).await,
        Command::Clear => clear(&bot, &msg, &service).await,
        Command::Healthcheck => healthcheck(&bot, &msg).await,
        Command::Edit(prompt) => edit_image(&bot, &msg, &service, prompt).await,
        _ => match cmd.task() {
            Some((task, prompt)) => run_command_task(&bot, &msg, &service, task, prompt).await,
            None => Ok(()),
        },
    }
}

async fn start(bot: &Bot, msg: &Message, service: &BotService) -> Result<()> {
    info!("User {} initiated /start command.", user_id(msg));
    service.reset(&msg.chat.id.0).await;
    bot.send_message(msg.chat.id, WELCOME_TEXT)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn clear(bot: &Bot, msg: &Message, service: &BotService) -> Result<()> {
    let existed = service.reset(&msg.chat.id.0).await;
    info!(chat_id = msg.chat.id.0, existed, "Chat history cleared");
    bot.send_message(msg.chat.id, "<b>Chat history cleared.</b>")
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn healthcheck(bot: &Bot, msg: &Message) -> Result<()> {
    info!("Healthcheck command received from user {}.", user_id(msg));
    bot.send_message(msg.chat.id, "OK").await?;
    Ok(())
}

async fn reply_hint(bot: &Bot, msg: &Message, hint: &str) -> Result<()> {
    bot.send_message(msg.chat.id, hint).await?;
    Ok(())
}

/// Run `task` for the chat of `msg`, answering input errors with a hint
async fn run_task_for(
    bot: &Bot,
    msg: &Message,
    service: &BotService,
    task: Task,
    input: UserInput,
) -> Result<()> {
    let presenter = TelegramPresenter::new(bot.clone(), msg.chat.id, PresenterStyle::for_task(task))
        .with_prompt(input.text_content());
    match service.run_task(msg.chat.id.0, task, input, &presenter).await {
        Ok(turn) => {
            debug!(turn = %turn.id(), phase = ?turn.phase(), ?task, "Task finished");
            Ok(())
        }
        Err(e) => {
            warn!(?task, "Rejected task input: {e}");
            reply_hint(bot, msg, usage_hint(task)).await
        }
    }
}

async fn run_command_task(
    bot: &Bot,
    msg: &Message,
    service: &BotService,
    task: Task,
    prompt: &str,
) -> Result<()> {
    info!(user_id = user_id(msg), ?task, "Command received");
    match UserInput::text(prompt.trim()) {
        Ok(input) => run_task_for(bot, msg, service, task, input).await,
        Err(InputError::Empty | InputError::MissingAttachment) => {
            reply_hint(bot, msg, usage_hint(task)).await
        }
    }
}

async fn edit_image(bot: &Bot, msg: &Message, service: &BotService, prompt: &str) -> Result<()> {
    let Some(photo) = msg.reply_to_message().and_then(IncomingMedia::photo) else {
        return reply_hint(bot, msg, EDIT_NEEDS_REPLY).await;
    };
    if prompt.trim().is_empty() {
        return reply_hint(bot, msg, usage_hint(Task::ImageEdit)).await;
    }
    let Some(attachment) = download_or_notify(bot, msg, photo).await? else {
        return Ok(());
    };

    match UserInput::new(prompt.trim(), Some(attachment)) {
        Ok(input) => run_task_for(bot, msg, service, Task::ImageEdit, input).await,
        Err(_) => reply_hint(bot, msg, usage_hint(Task::ImageEdit)).await,
    }
}

/// Download an attachment, telling the user when it fails
async fn download_or_notify(
    bot: &Bot,
    msg: &Message,
    media: IncomingMedia,
) -> Result<Option<Attachment>> {
    match media.download(bot).await {
        Ok(attachment) => Ok(Some(attachment)),
        Err(e) => {
            error!(chat_id = msg.chat.id.0, "Attachment download failed: {e}");
            reply_hint(bot, msg, DOWNLOAD_ERROR_MESSAGE).await?;
            Ok(None)
        }
    }
}

async fn stream_chat(
    bot: &Bot,
    msg: &Message,
    service: &BotService,
    text: &str,
    attachment: Option<Attachment>,
) -> Result<()> {
    let input = match UserInput::new(text, attachment) {
        Ok(input) => input,
        Err(_) => return reply_hint(bot, msg, EMPTY_MESSAGE_HINT).await,
    };
    let presenter = TelegramPresenter::new(bot.clone(), msg.chat.id, PresenterStyle::CHAT);
    let turn = service.chat(msg.chat.id.0, input, &presenter).await;
    debug!(turn = %turn.id(), phase = ?turn.phase(), "Chat turn finished");
    Ok(())
}

/// Plain text message: streaming chat
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_text(bot: Bot, msg: Message, service: Arc<BotService>) -> Result<()> {
    let text = msg.text().unwrap_or_default();
    if text.starts_with('/') {
        debug!(chat_id = msg.chat.id.0, "Ignoring unknown command");
        return Ok(());
    }
    info!(user_id = user_id(&msg), chars = text.chars().count(), "Chat message received");
    stream_chat(&bot, &msg, &service, text, None).await
}

/// Photo message: chat turn with the photo attached
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_photo(bot: Bot, msg: Message, service: Arc<BotService>) -> Result<()> {
    let Some(photo) = IncomingMedia::photo(&msg) else {
        return Ok(());
    };
    info!(user_id = user_id(&msg), "Photo received");
    let Some(attachment) = download_or_notify(&bot, &msg, photo).await? else {
        return Ok(());
    };
    let caption = msg.caption().unwrap_or_default();
    stream_chat(&bot, &msg, &service, caption, Some(attachment)).await
}

/// Voice or audio message: transcription
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_audio(bot: Bot, msg: Message, service: Arc<BotService>) -> Result<()> {
    let Some(audio) = IncomingMedia::audio(&msg) else {
        return Ok(());
    };
    info!(user_id = user_id(&msg), media_type = %audio.media_type, "Audio received");
    let Some(attachment) = download_or_notify(&bot, &msg, audio).await? else {
        return Ok(());
    };
    match UserInput::new("", Some(attachment)) {
        Ok(input) => run_task_for(&bot, &msg, &service, Task::Transcription, input).await,
        Err(_) => reply_hint(&bot, &msg, usage_hint(Task::Transcription)).await,
    }
}

/// Video message: video analysis, prompted by the caption if any
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_video(bot: Bot, msg: Message, service: Arc<BotService>) -> Result<()> {
    let Some(video) = IncomingMedia::video(&msg) else {
        return Ok(());
    };
    info!(user_id = user_id(&msg), media_type = %video.media_type, "Video received");
    let Some(attachment) = download_or_notify(&bot, &msg, video).await? else {
        return Ok(());
    };
    let caption = msg.caption().unwrap_or_default();
    match UserInput::new(caption, Some(attachment)) {
        Ok(input) => run_task_for(&bot, &msg, &service, Task::VideoAnalysis, input).await,
        Err(_) => reply_hint(&bot, &msg, usage_hint(Task::VideoAnalysis)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_NAME: &str = "gobo_bot";

    #[test]
    fn test_parse_argument_commands() {
        assert_eq!(
            Command::parse("/image a red fox", BOT_NAME).ok(),
            Some(Command::Image("a red fox".to_string()))
        );
        assert_eq!(
            Command::parse("/fast what is rust?", BOT_NAME).ok(),
            Some(Command::Fast("what is rust?".to_string()))
        );
        assert_eq!(
            Command::parse("/say hello there", BOT_NAME).ok(),
            Some(Command::Say("hello there".to_string()))
        );
    }

    #[test]
    fn test_parse_plain_commands() {
        assert_eq!(Command::parse("/start", BOT_NAME).ok(), Some(Command::Start));
        assert_eq!(Command::parse("/clear", BOT_NAME).ok(), Some(Command::Clear));
        assert_eq!(
            Command::parse("/healthcheck", BOT_NAME).ok(),
            Some(Command::Healthcheck)
        );
        assert!(Command::parse("/unknown", BOT_NAME).is_err());
    }

    #[test]
    fn test_command_without_argument_has_empty_prompt() {
        let cmd = Command::parse("/think", BOT_NAME).ok();
        assert_eq!(cmd, Some(Command::Think(String::new())));
        let task = cmd.as_ref().and_then(Command::task);
        assert_eq!(task, Some((Task::Think, "")));
    }

    #[test]
    fn test_command_tasks() {
        assert_eq!(
            Command::Video("waves".to_string()).task(),
            Some((Task::VideoGeneration, "waves"))
        );
        assert_eq!(
            Command::Edit("make it blue".to_string()).task(),
            Some((Task::ImageEdit, "make it blue"))
        );
        assert_eq!(Command::Start.task(), None);
    }

    #[test]
    fn test_usage_hints_name_the_command() {
        assert!(usage_hint(Task::ImageGeneration).contains("/image"));
        assert!(usage_hint(Task::Speech).contains("/say"));
        assert!(usage_hint(Task::ImageEdit).contains("/edit"));
    }
}
