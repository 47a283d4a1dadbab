//! Text helpers for presenting model output and retrying transport calls.
//!
//! Regex patterns are declared with `lazy_regex!`, so they are validated at
//! compile time and built on first use.

#![allow(clippy::non_std_lazy_statics)]

use anyhow::Result;
use lazy_regex::lazy_regex;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};

const CODE_FENCE: &str = "```";

/// Tags Telegram accepts in HTML parse mode
const ALLOWED_TAGS: &[&str] = &["b", "i", "u", "s", "code", "pre", "a"];

static RE_CODE_BLOCK: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"```[\s\S]*?```");

/// ```lang\ncode```
static RE_CODE_BLOCK_FENCE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"```(\w+)?\n([\s\S]*?)```");

/// `* ` or `- ` list markers at line start
static RE_BULLET: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^[*-] ");

/// `#`..`######` headings, rendered bold
static RE_HEADING: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^#{1,6} +(.+)$");

static RE_BOLD: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*\*(.*?)\*\*");

static RE_ITALIC: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*(.*?)\*");

static RE_INLINE_CODE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"`(.*?)`");

static RE_MULTI_NEWLINE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n{3,}");

fn is_allowed_tag(name: &str) -> bool {
    ALLOWED_TAGS.contains(&name.trim_start_matches('/'))
}

/// Escape `<` and `>` unless they delimit a tag Telegram supports.
fn escape_angle_brackets(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_tag = false;

    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let mut name = String::new();
                if let Some(slash) = chars.next_if_eq(&'/') {
                    name.push(slash);
                }
                while let Some(next) = chars.next_if(char::is_ascii_alphanumeric) {
                    name.push(next);
                }

                if name.trim_start_matches('/').is_empty() || !is_allowed_tag(&name) {
                    result.push_str("&lt;");
                } else {
                    result.push('<');
                    in_tag = true;
                }
                result.push_str(&name);
            }
            '>' if in_tag => {
                result.push('>');
                in_tag = false;
            }
            '>' => result.push_str("&gt;"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape stray angle brackets while leaving fenced code blocks and
/// supported tags untouched.
///
/// # Examples
///
/// ```
/// use gobo_core::utils::clean_html;
/// assert_eq!(clean_html("1 < 2 but <b>bold</b>"), "1 &lt; 2 but <b>bold</b>");
/// ```
#[must_use]
pub fn clean_html(text: &str) -> String {
    // Random placeholders so user text cannot collide with them
    let mut code_blocks: Vec<(String, String)> = Vec::new();
    let mut masked = String::with_capacity(text.len());
    let mut last_end = 0;

    for mat in RE_CODE_BLOCK.find_iter(text) {
        masked.push_str(&text[last_end..mat.start()]);
        let placeholder = format!("__CODE_BLOCK_{}__", Uuid::new_v4().as_simple());
        masked.push_str(&placeholder);
        code_blocks.push((placeholder, mat.as_str().to_string()));
        last_end = mat.end();
    }
    masked.push_str(&text[last_end..]);

    let mut escaped = escape_angle_brackets(&masked);
    for (placeholder, block) in code_blocks {
        escaped = escaped.replace(&placeholder, &block);
    }
    escaped
}

/// Convert the model's Markdown into Telegram HTML.
///
/// Handles fenced and inline code, headings, bullets, bold and italic, and
/// collapses runs of blank lines.
///
/// # Examples
///
/// ```
/// use gobo_core::utils::format_text;
/// assert_eq!(format_text("**Hi** `x`"), "<b>Hi</b> <code>x</code>");
/// ```
#[must_use]
pub fn format_text(text: &str) -> String {
    let cleaned = clean_html(text);

    let fenced = RE_CODE_BLOCK_FENCE.replace_all(&cleaned, |caps: &regex::Captures| {
        let lang = caps.get(1).map_or("", |m| m.as_str());
        let code = caps.get(2).map_or("", |m| m.as_str()).trim();
        format!(
            "<pre><code class=\"{lang}\">{}</code></pre>",
            html_escape::encode_text(code)
        )
    });
    let headed = RE_HEADING.replace_all(&fenced, "<b>$1</b>");
    let bulleted = RE_BULLET.replace_all(&headed, "• ");
    let bold = RE_BOLD.replace_all(&bulleted, "<b>$1</b>");
    let italic = RE_ITALIC.replace_all(&bold, "<i>$1</i>");
    let coded = RE_INLINE_CODE.replace_all(&italic, |caps: &regex::Captures| {
        let code = caps.get(1).map_or("", |m| m.as_str());
        format!("<code>{}</code>", html_escape::encode_text(code))
    });

    RE_MULTI_NEWLINE
        .replace_all(&coded, "\n\n")
        .trim()
        .to_string()
}

fn close_fence(buffer: &mut String) {
    buffer.push_str(CODE_FENCE);
    buffer.push('\n');
}

/// Bytes taken by a fence line: "```\n"
const FENCE_LINE: usize = CODE_FENCE.len() + 1;

/// Cut a line into pieces of at most `limit` bytes, after the last
/// whitespace that fits or else on a grapheme boundary
fn split_line(line: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = line;
    while rest.len() > limit {
        let mut fit = 0;
        let mut word_end = 0;
        for (offset, grapheme) in rest.grapheme_indices(true) {
            let end = offset + grapheme.len();
            if end > limit {
                break;
            }
            fit = end;
            if grapheme.chars().all(char::is_whitespace) {
                word_end = end;
            }
        }
        let cut = match (word_end, fit) {
            (0, 0) => rest.graphemes(true).next().map_or(rest.len(), str::len),
            (0, fit) => fit,
            (word_end, _) => word_end,
        };
        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece);
        rest = tail;
    }
    if !rest.is_empty() || pieces.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Split a message into chunks of at most `max_length` bytes.
///
/// Breaks on line boundaries, closing an open code fence at the end of a
/// chunk and reopening it in the next; both fences count against the
/// limit. Lines longer than the limit are cut on grapheme boundaries.
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    if message.is_empty() {
        return Vec::new();
    }
    if message.len() <= max_length {
        return vec![message.to_string()];
    }

    // a piece of code must fit between a reopened and a closing fence
    let code_limit = max_length.saturating_sub(2 * FENCE_LINE).max(1);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_code = false;

    let flush = |current: &mut String, parts: &mut Vec<String>, in_code: bool| {
        if in_code {
            close_fence(current);
        }
        parts.push(current.trim_end().to_string());
        current.clear();
        if in_code {
            close_fence(current);
        }
    };

    let mut lines = message.lines().peekable();
    while let Some(line) = lines.next() {
        let fence_line = line.starts_with(CODE_FENCE);
        let limit = if in_code || fence_line { code_limit } else { max_length };

        for (index, piece) in split_line(line, limit).into_iter().enumerate() {
            let is_fence = fence_line && index == 0;
            // inside a block after this piece, the closing fence still has to
            // fit; an opening fence also keeps its first line with it
            let reserve = match (in_code, is_fence) {
                (true, false) => CODE_FENCE.len(),
                (false, true) => {
                    let first_line = lines
                        .peek()
                        .filter(|next| !next.starts_with(CODE_FENCE))
                        .map_or(0, |next| next.len().min(code_limit) + 1);
                    CODE_FENCE.len() + first_line
                }
                _ => 0,
            };
            if current.len() + piece.len() + 1 + reserve > max_length && !current.is_empty() {
                flush(&mut current, &mut parts, in_code);
                if in_code && is_fence {
                    // closing fence right after a split: drop the reopened one
                    current.clear();
                    in_code = false;
                    continue;
                }
            }
            if is_fence {
                in_code = !in_code;
            }
            current.push_str(piece);
            current.push('\n');
        }
    }

    if !current.trim().is_empty() {
        if in_code {
            close_fence(&mut current);
        }
        parts.push(current.trim_end().to_string());
    }
    parts
}

/// Truncate to at most `max_chars` characters without splitting a code point.
///
/// ```
/// use gobo_core::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a chat transport operation (e.g. a Telegram file download) with
/// exponential backoff and jitter.
///
/// Model calls are never retried through this helper.
///
/// # Errors
///
/// Returns the last error once all attempts fail.
pub async fn retry_transport_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(strategy, operation).await.inspect_err(|e| {
        warn!(
            attempts = TELEGRAM_API_MAX_RETRIES + 1,
            error = %e,
            "Transport operation failed"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_counts_chars() {
        assert_eq!(truncate_str("héllo wörld", 5), "héllo");
        assert_eq!(truncate_str("short", 50), "short");
        assert_eq!(truncate_str("", 3), "");
    }

    #[test]
    fn test_clean_html_keeps_code_blocks() {
        let input = "See\n```html\n<div>x</div>\n```\nand 2 > 1";
        assert_eq!(
            clean_html(input),
            "See\n```html\n<div>x</div>\n```\nand 2 &gt; 1"
        );
    }

    #[test]
    fn test_clean_html_escapes_unknown_tags() {
        let input = "<thought>hidden</thought> then <i>ok</i>";
        assert_eq!(
            clean_html(input),
            "&lt;thought&gt;hidden&lt;/thought&gt; then <i>ok</i>"
        );
    }

    #[test]
    fn test_clean_html_is_idempotent() {
        let once = clean_html("a <x> b");
        assert_eq!(clean_html(&once), once);
    }

    #[test]
    fn test_clean_html_ignores_placeholder_lookalikes() {
        let cleaned = clean_html("__CODE_BLOCK_0__\n```\nlet a = 1;\n```");
        assert!(cleaned.starts_with("__CODE_BLOCK_0__"));
        assert!(cleaned.contains("let a = 1;"));
    }

    #[test]
    fn test_format_text_markdown() {
        let input = "## Plan\n* one\n- two\n**bold** and *soft* with `ls -la`";
        let expected =
            "<b>Plan</b>\n• one\n• two\n<b>bold</b> and <i>soft</i> with <code>ls -la</code>";
        assert_eq!(format_text(input), expected);
    }

    #[test]
    fn test_format_text_code_fence() {
        let input = "Run:\n```sh\necho hi\n```\n\n\n\nDone";
        assert_eq!(
            format_text(input),
            "Run:\n<pre><code class=\"sh\">echo hi</code></pre>\n\nDone"
        );
    }

    #[test]
    fn test_split_long_message_by_lines() {
        let parts = split_long_message("Line 1\nLine 2\nLine 3", 13);
        assert_eq!(parts, vec!["Line 1", "Line 2", "Line 3"]);
        assert!(split_long_message("", 10).is_empty());
    }

    #[test]
    fn test_split_long_message_reopens_fence() {
        let parts = split_long_message("Start\n```\nLine 1\nLine 2\n```\nEnd", 15);
        assert_eq!(
            parts,
            vec!["Start", "```\nLine 1\n```", "```\nLine 2\n```", "End"]
        );
    }

    #[test]
    fn test_split_fenced_parts_stay_within_limit() {
        let code = (0..200)
            .map(|i| format!("let value_{i} = {i};"))
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!("Intro\n```rust\n{code}\n```\nOutro");
        for max in [40, 64, 100, 500] {
            let parts = split_long_message(&text, max);
            assert!(parts.len() > 1);
            for part in &parts {
                assert!(part.len() <= max, "{} > {max}: {part:?}", part.len());
                assert_eq!(part.matches(CODE_FENCE).count() % 2, 0, "{part:?}");
            }
        }
    }

    #[test]
    fn test_split_long_line_inside_fence() {
        let text = format!("```\n{}\n```", "x".repeat(100));
        let parts = split_long_message(&text, 30);
        assert!(parts.iter().all(|p| p.len() <= 30));
        assert!(parts.iter().all(|p| p.starts_with(CODE_FENCE) && p.ends_with(CODE_FENCE)));
        let body: String = parts
            .iter()
            .map(|p| p.trim_start_matches("```\n").trim_end_matches("\n```"))
            .collect();
        assert_eq!(body, "x".repeat(100));
    }

    #[test]
    fn test_split_long_line_prefers_spaces() {
        let parts = split_long_message("alpha beta gamma delta", 12);
        assert_eq!(parts, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_split_long_line_on_graphemes() {
        let input = "🙂".repeat(2500);
        let parts = split_long_message(&input, 4000);
        assert!(parts.len() >= 3);
        assert!(parts.iter().all(|p| p.len() <= 4000));
        assert_eq!(parts.concat(), input);
    }

    #[tokio::test]
    async fn test_retry_transport_operation_recovers() {
        let calls = AtomicUsize::new(0);
        let value = retry_transport_operation(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    anyhow::bail!("transient");
                }
                Ok(attempt)
            }
        })
        .await;

        assert!(matches!(value, Ok(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
