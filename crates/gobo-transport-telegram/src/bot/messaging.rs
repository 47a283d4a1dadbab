//! Common messaging utilities for the Telegram bot.
//!
//! Model output is Markdown; Telegram gets HTML. Long replies are split on
//! the raw Markdown first so code fences stay balanced, then each part is
//! converted on its own.

use anyhow::Result;
use gobo_core::utils::{format_text, split_long_message};
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

use super::resilient::send_message_resilient;

/// Maximum message length for Telegram with safety margin.
/// Telegram's official limit is 4096, but we use 4000 to account for
/// HTML tags added by formatting.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Maximum media caption length accepted by Telegram.
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Smallest Markdown chunk size tried when formatting inflates a part
const MIN_SPLIT_LENGTH: usize = 256;

/// Split Markdown into Telegram-sized parts and convert each to HTML.
///
/// Formatting can make a part longer (`**a**` becomes `<b>a</b>`, `<`
/// becomes `&lt;`), so a part whose HTML exceeds the limit is split again
/// with a smaller budget.
#[must_use]
pub fn render_parts(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    render_into(text, TELEGRAM_MESSAGE_LIMIT, &mut parts);
    parts
}

fn render_into(text: &str, max_length: usize, parts: &mut Vec<String>) {
    for chunk in split_long_message(text, max_length) {
        let html = format_text(&chunk);
        if html.chars().count() > TELEGRAM_MESSAGE_LIMIT && max_length > MIN_SPLIT_LENGTH {
            render_into(&chunk, max_length / 2, parts);
        } else if !html.is_empty() {
            parts.push(html);
        }
    }
}

/// Sends a long Markdown message as one or more HTML messages.
///
/// # Errors
///
/// Returns an error if any part fails to send after retries.
pub async fn send_long_message(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    for part in render_parts(text) {
        send_message_resilient(bot, chat_id, part, Some(ParseMode::Html)).await?;
    }
    Ok(())
}

/// Sends each already-rendered HTML part as its own message.
///
/// # Errors
///
/// Returns an error if any part fails to send after retries.
pub async fn send_rendered_parts(bot: &Bot, chat_id: ChatId, parts: &[String]) -> Result<()> {
    for part in parts {
        send_message_resilient(bot, chat_id, part.clone(), Some(ParseMode::Html)).await?;
    }
    Ok(())
}
