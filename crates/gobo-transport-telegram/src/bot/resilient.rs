//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Transient network failures are retried with exponential backoff and
//! jitter. Edits degrade gracefully: an edit that cannot be applied is
//! reported as `false` instead of an error, so the caller can fall back to a
//! fresh message.
//!
//! ```ignore
//! use gobo_transport_telegram::bot::resilient::{send_message_resilient, edit_message_safe_resilient};
//!
//! let msg = send_message_resilient(&bot, chat_id, "⏳", None).await?;
//! let edited = edit_message_safe_resilient(&bot, chat_id, msg.id, "Done").await;
//! ```

use anyhow::Result;
use gobo_core::utils::{retry_transport_operation, truncate_str};
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode};
use tracing::{debug, warn};

use super::messaging::TELEGRAM_MESSAGE_LIMIT;

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";

/// Send a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    retry_transport_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message with automatic retry on network failures.
///
/// Returns `Ok(None)` when Telegram reports the text as unchanged.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Option<Message>> {
    let text = text.into();
    retry_transport_operation(|| async {
        let mut req = bot.edit_message_text(chat_id, msg_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        match req.await {
            Ok(msg) => Ok(Some(msg)),
            Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Telegram edit error: {e}")),
        }
    })
    .await
}

/// Text as it will be sent in an HTML edit: cut to the message limit with a
/// truncation notice.
#[must_use]
pub fn fit_edit_text(text: &str) -> String {
    if text.chars().count() > TELEGRAM_MESSAGE_LIMIT {
        let truncated = truncate_str(text, TELEGRAM_MESSAGE_LIMIT);
        format!("{truncated}...\n\n<i>(message truncated)</i>")
    } else {
        text.to_string()
    }
}

/// Edit an HTML message with graceful degradation and automatic retry.
///
/// Returns `true` if the message now shows `text` (including the "not
/// modified" case), `false` if the message is gone or the edit failed after
/// retries.
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> bool {
    match edit_message_resilient(bot, chat_id, msg_id, fit_edit_text(text), Some(ParseMode::Html))
        .await
    {
        Ok(Some(_)) => true,
        Ok(None) => {
            debug!("Message update skipped: message is not modified");
            true
        }
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_FOUND) {
                debug!("Message update skipped: {err_msg}");
            } else {
                warn!("Failed to edit message after retries: {e}");
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_edit_text_keeps_short_text() {
        assert_eq!(fit_edit_text("<b>hi</b>"), "<b>hi</b>");
    }

    #[test]
    fn test_fit_edit_text_truncates_long_text() {
        let long = "я".repeat(TELEGRAM_MESSAGE_LIMIT + 10);
        let fitted = fit_edit_text(&long);
        assert!(fitted.ends_with("<i>(message truncated)</i>"));
        assert!(fitted.starts_with(&"я".repeat(TELEGRAM_MESSAGE_LIMIT)));
        assert!(!fitted.starts_with(&"я".repeat(TELEGRAM_MESSAGE_LIMIT + 1)));
    }
}
