//! Request payload assembly
//!
//! Turns a history snapshot plus the new user input into the ordered list of
//! role-tagged content blocks sent to the model.

use bytes::Bytes;
use mime::Mime;
use thiserror::Error;

use crate::conversation::{Attachment, Role, Turn};

/// Rejected user input
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    /// Neither text nor attachment was provided
    #[error("input has neither text nor attachment")]
    Empty,
    /// The task needs an attachment and none was provided
    #[error("input needs an attachment")]
    MissingAttachment,
}

/// New input from the user. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInput {
    text: String,
    attachment: Option<Attachment>,
}

impl UserInput {
    /// Validate raw input from a front-end.
    ///
    /// Whitespace-only text counts as empty.
    ///
    /// # Errors
    ///
    /// Returns `InputError::Empty` if there is no text and no attachment.
    pub fn new(text: impl Into<String>, attachment: Option<Attachment>) -> Result<Self, InputError> {
        let text = text.into();
        let attachment = attachment.filter(|a| !a.is_empty());
        if text.trim().is_empty() && attachment.is_none() {
            return Err(InputError::Empty);
        }
        Ok(Self { text, attachment })
    }

    /// Text-only input.
    ///
    /// # Errors
    ///
    /// Returns `InputError::Empty` for blank text.
    pub fn text(text: impl Into<String>) -> Result<Self, InputError> {
        Self::new(text, None)
    }

    /// Text of the input, possibly empty
    #[must_use]
    pub fn text_content(&self) -> &str {
        &self.text
    }

    /// Attachment of the input, if any
    #[must_use]
    pub const fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Replace blank text with a default prompt
    #[must_use]
    pub fn with_default_text(mut self, prompt: &str) -> Self {
        if self.text.trim().is_empty() {
            self.text = prompt.to_string();
        }
        self
    }

    /// Finalized user turn for the conversation history
    #[must_use]
    pub fn into_turn(self) -> Turn {
        Turn::user(Some(self.text), self.attachment)
    }
}

/// One part of a content block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Binary payload sent inline
    InlineData {
        /// Media type of the payload
        media_type: Mime,
        /// Raw bytes
        data: Bytes,
    },
    /// Plain text
    Text(String),
}

/// Role-tagged group of parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    /// Author of the block
    pub role: Role,
    /// Attachment part first, then text part
    pub parts: Vec<Part>,
}

impl ContentBlock {
    fn from_content(role: Role, text: Option<&str>, attachment: Option<&Attachment>) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(attachment) = attachment {
            parts.push(Part::InlineData {
                media_type: attachment.media_type().clone(),
                data: attachment.data().clone(),
            });
        }
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            parts.push(Part::Text(text.to_string()));
        }
        Self { role, parts }
    }
}

impl From<&Turn> for ContentBlock {
    fn from(turn: &Turn) -> Self {
        Self::from_content(turn.role(), turn.text(), turn.attachment())
    }
}

/// Build the request payload: one block per history turn, then a final
/// `user` block for the new input.
///
/// Turns without any content are skipped since the model API rejects empty
/// blocks.
#[must_use]
pub fn assemble(history: &[Turn], input: &UserInput) -> Vec<ContentBlock> {
    history
        .iter()
        .map(ContentBlock::from)
        .filter(|block| !block.parts.is_empty())
        .chain(std::iter::once(ContentBlock::from_content(
            Role::User,
            Some(input.text_content()),
            input.attachment(),
        )))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(bytes: &'static [u8]) -> Attachment {
        Attachment::new(mime::IMAGE_JPEG, Bytes::from_static(bytes))
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(UserInput::new("", None), Err(InputError::Empty));
        assert_eq!(UserInput::text("  \n"), Err(InputError::Empty));
        let empty_attachment = Attachment::new(mime::IMAGE_PNG, Bytes::new());
        assert_eq!(
            UserInput::new("", Some(empty_attachment)),
            Err(InputError::Empty)
        );
    }

    #[test]
    fn test_attachment_only_input_accepted() -> Result<(), InputError> {
        let input = UserInput::new("", Some(jpeg(b"img")))?;
        let blocks = assemble(&[], &input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].parts,
            vec![Part::InlineData {
                media_type: mime::IMAGE_JPEG,
                data: Bytes::from_static(b"img"),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_history_then_new_input() -> Result<(), InputError> {
        let history = vec![
            Turn::user(Some("hello".to_string()), None),
            Turn::model("hi there"),
        ];
        let blocks = assemble(&history, &UserInput::text("hi")?);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].role, Role::User);
        assert_eq!(blocks[0].parts, vec![Part::Text("hello".to_string())]);
        assert_eq!(blocks[1].role, Role::Model);
        assert_eq!(blocks[1].parts, vec![Part::Text("hi there".to_string())]);
        assert_eq!(blocks[2].role, Role::User);
        assert_eq!(blocks[2].parts, vec![Part::Text("hi".to_string())]);
        Ok(())
    }

    #[test]
    fn test_attachment_precedes_text() -> Result<(), InputError> {
        let history = vec![Turn::user(Some("what is this".to_string()), Some(jpeg(b"a")))];
        let input = UserInput::new("and this?", Some(jpeg(b"b")))?;
        let blocks = assemble(&history, &input);

        for block in &blocks {
            assert_eq!(block.parts.len(), 2);
            assert!(matches!(block.parts[0], Part::InlineData { .. }));
            assert!(matches!(block.parts[1], Part::Text(_)));
        }
        Ok(())
    }

    #[test]
    fn test_with_default_text() -> Result<(), InputError> {
        let video = Attachment::new(
            "video/mp4".parse().map_err(|_| InputError::Empty)?,
            Bytes::from_static(b"v"),
        );
        let input = UserInput::new(" ", Some(video))?.with_default_text("Describe this video.");
        assert_eq!(input.text_content(), "Describe this video.");

        let kept = UserInput::text("caption")?.with_default_text("Describe this video.");
        assert_eq!(kept.text_content(), "caption");
        Ok(())
    }
}
