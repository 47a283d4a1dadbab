//! Conversation history
//!
//! Turns, attachments and an in-memory store keeping a bounded window of
//! turns per conversation id.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use mime::Mime;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::config::HISTORY_LIMIT;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Message written by the user
    User,
    /// Message produced by the model
    Model,
}

impl Role {
    /// Wire name used by the model API
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a model-side turn.
///
/// `Pending` and `Streaming` belong to a [`crate::relay::PendingTurn`];
/// `Finalized` and `ErroredFinalized` belong to an immutable [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Placeholder created, no content yet
    Pending,
    /// At least one content update received
    Streaming,
    /// Completed successfully
    Finalized,
    /// Completed with the fixed error message
    ErroredFinalized,
}

impl TurnPhase {
    /// Whether no further mutation can happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::ErroredFinalized)
    }
}

/// Inline binary content with an explicit media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    media_type: Mime,
    data: Bytes,
}

impl Attachment {
    /// Create an attachment from raw bytes
    #[must_use]
    pub fn new(media_type: Mime, data: impl Into<Bytes>) -> Self {
        Self {
            media_type,
            data: data.into(),
        }
    }

    /// Media type of the content
    #[must_use]
    pub const fn media_type(&self) -> &Mime {
        &self.media_type
    }

    /// Raw content
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Content length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the content is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A web or map reference the model grounded its reply on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Link title; falls back to a generic label when the model gives none
    pub title: String,
    /// Link target
    pub uri: String,
}

/// One message of a conversation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    id: Uuid,
    role: Role,
    text: Option<String>,
    attachment: Option<Attachment>,
    sources: Vec<Source>,
    timestamp: DateTime<Utc>,
    phase: TurnPhase,
}

impl Turn {
    /// Create a finalized user turn
    #[must_use]
    pub fn user(text: Option<String>, attachment: Option<Attachment>) -> Self {
        Self::finalized(Role::User, text, attachment)
    }

    /// Create a finalized model turn with text only
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self::finalized(Role::Model, Some(text.into()), None)
    }

    pub(crate) fn finalized(
        role: Role,
        text: Option<String>,
        attachment: Option<Attachment>,
    ) -> Self {
        Self::terminal(Uuid::new_v4(), role, text, attachment, TurnPhase::Finalized)
    }

    pub(crate) fn terminal(
        id: Uuid,
        role: Role,
        text: Option<String>,
        attachment: Option<Attachment>,
        phase: TurnPhase,
    ) -> Self {
        Self {
            id,
            role,
            text: text.filter(|t| !t.is_empty()),
            attachment,
            sources: Vec::new(),
            timestamp: Utc::now(),
            phase,
        }
    }

    pub(crate) fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    /// Unique turn id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Author of the turn
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Text content, if any
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Attachment, if any
    #[must_use]
    pub const fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Grounding sources of a model reply
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Creation time
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Terminal phase of the turn
    #[must_use]
    pub const fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Whether the turn still receives updates. Always false for a `Turn`.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Whether the turn carries the fixed error message
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.phase == TurnPhase::ErroredFinalized
    }
}

/// Bounds required of a conversation id.
///
/// Telegram uses `i64` chat ids, a web front-end would use session tokens.
pub trait ConversationKey: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static {}

impl<T: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static> ConversationKey for T {}

/// In-memory history per conversation with a bounded retention window
pub struct ConversationStore<Id: ConversationKey> {
    conversations: RwLock<HashMap<Id, Vec<Turn>>>,
    limit: usize,
}

impl<Id: ConversationKey> Default for ConversationStore<Id> {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl<Id: ConversationKey> ConversationStore<Id> {
    /// Create an empty store keeping at most `limit` turns per conversation.
    /// A zero limit is raised to one.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Maximum retained turns per conversation
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Append a turn, creating the conversation if absent, then trim
    pub async fn append(&self, id: Id, turn: Turn) {
        let mut conversations = self.conversations.write().await;
        let turns = conversations.entry(id).or_default();
        turns.push(turn);
        Self::trim_turns(turns, self.limit);
    }

    /// Drop the oldest turns beyond the retention window
    pub async fn trim(&self, id: &Id) {
        let mut conversations = self.conversations.write().await;
        if let Some(turns) = conversations.get_mut(id) {
            Self::trim_turns(turns, self.limit);
        }
    }

    fn trim_turns(turns: &mut Vec<Turn>, limit: usize) {
        let excess = turns.len().saturating_sub(limit);
        if excess > 0 {
            turns.drain(..excess);
            debug!(dropped = excess, "Trimmed conversation history");
        }
    }

    /// Snapshot of the conversation, empty if unknown
    pub async fn get(&self, id: &Id) -> Vec<Turn> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of turns currently retained
    pub async fn len(&self, id: &Id) -> usize {
        self.conversations.read().await.get(id).map_or(0, Vec::len)
    }

    /// Delete the conversation. Returns true if it existed.
    pub async fn reset(&self, id: &Id) -> bool {
        self.conversations.write().await.remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Turn {
        Turn::user(Some(format!("msg {n}")), None)
    }

    #[tokio::test]
    async fn test_append_creates_conversation() {
        let store = ConversationStore::<i64>::default();
        assert!(store.get(&1).await.is_empty());

        store.append(1, numbered(0)).await;
        assert_eq!(store.len(&1).await, 1);
        assert_eq!(store.len(&2).await, 0);
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent_in_order() {
        let store = ConversationStore::<i64>::default();
        for n in 0..25 {
            store.append(7, numbered(n)).await;
        }

        let turns = store.get(&7).await;
        assert_eq!(turns.len(), HISTORY_LIMIT);
        let texts: Vec<_> = turns.iter().filter_map(Turn::text).collect();
        let expected: Vec<String> = (5..25).map(|n| format!("msg {n}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn test_get_does_not_mutate() {
        let store = ConversationStore::<String>::new(3);
        store.append("web".to_string(), numbered(1)).await;

        let first = store.get(&"web".to_string()).await;
        let second = store.get(&"web".to_string()).await;
        assert_eq!(first, second);
        assert_eq!(store.len(&"web".to_string()).await, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_conversation() {
        let store = ConversationStore::<i64>::default();
        store.append(3, numbered(1)).await;

        assert!(store.reset(&3).await);
        assert!(store.get(&3).await.is_empty());
        assert!(!store.reset(&3).await);
    }

    #[tokio::test]
    async fn test_independent_instances() {
        let a = ConversationStore::<i64>::new(2);
        let b = ConversationStore::<i64>::new(2);
        a.append(1, numbered(1)).await;
        assert_eq!(a.len(&1).await, 1);
        assert_eq!(b.len(&1).await, 0);
    }

    #[test]
    fn test_user_turn_is_final() {
        let turn = Turn::user(Some(String::new()), None);
        assert_eq!(turn.role(), Role::User);
        assert_eq!(turn.text(), None);
        assert!(!turn.is_in_progress());
        assert!(!turn.is_error());
    }
}
