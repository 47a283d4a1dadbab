//! Response relay
//!
//! Drives a model-side turn from `Pending` through zero or more `Streaming`
//! updates to a terminal state, notifying the presentation layer on every
//! transition. Only terminal turns reach the conversation store.
//!
//! ```text
//! Pending ──snapshot──▶ Streaming ──snapshot──▶ Streaming
//!    │                     │
//!    ├──end/result────────▶ Finalized
//!    └──failure / no content──▶ ErroredFinalized
//! ```

use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::conversation::{
    Attachment, ConversationKey, ConversationStore, Role, Source, Turn, TurnPhase,
};
use crate::llm::{GenerationResult, LlmError, Snapshot, SnapshotStream};

/// Text shown in place of a reply when the model call fails
pub const RELAY_ERROR_MESSAGE: &str = "Sorry, I encountered an error processing your request.";

/// An in-progress model turn.
///
/// Owned by the relay; consumed when finalized, so a terminal turn can never
/// be mutated again.
#[derive(Debug)]
pub struct PendingTurn {
    id: Uuid,
    text: String,
    sources: Vec<Source>,
    phase: TurnPhase,
    error_message: &'static str,
    missing_attachment: Option<&'static str>,
}

impl PendingTurn {
    /// New placeholder using [`RELAY_ERROR_MESSAGE`] on failure
    #[must_use]
    pub fn new() -> Self {
        Self::with_error_message(RELAY_ERROR_MESSAGE)
    }

    /// New placeholder with a custom failure text
    #[must_use]
    pub fn with_error_message(error_message: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: String::new(),
            sources: Vec::new(),
            phase: TurnPhase::Pending,
            error_message,
            missing_attachment: None,
        }
    }

    /// Require a batch result to carry an attachment. Without one the turn
    /// finalizes as errored with `notice` instead of the error message.
    #[must_use]
    pub fn requiring_attachment(mut self, notice: &'static str) -> Self {
        self.missing_attachment = Some(notice);
        self
    }

    /// Id the finalized turn will carry
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current text (the latest snapshot)
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `Pending` or `Streaming`
    #[must_use]
    pub const fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Replace the content with a cumulative snapshot
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.text = snapshot.text;
        self.sources = snapshot.sources;
        self.phase = TurnPhase::Streaming;
    }

    /// End of stream. A turn that never received text finalizes as errored.
    #[must_use]
    pub fn finish(self) -> Turn {
        if self.text.is_empty() {
            return self.fail();
        }
        Turn::terminal(
            self.id,
            Role::Model,
            Some(self.text),
            None,
            TurnPhase::Finalized,
        )
        .with_sources(self.sources)
    }

    /// Single batch update followed by finalization
    #[must_use]
    pub fn complete(mut self, result: GenerationResult) -> Turn {
        if result.is_empty() {
            return self.fail();
        }
        let attachment = result.attachment.filter(|a: &Attachment| !a.is_empty());
        if attachment.is_none() {
            if let Some(notice) = self.missing_attachment {
                warn!(turn = %self.id, "Model reply has no attachment");
                self.error_message = notice;
                return self.fail();
            }
        }
        Turn::terminal(
            self.id,
            Role::Model,
            result.text,
            attachment,
            TurnPhase::Finalized,
        )
        .with_sources(result.sources)
    }

    /// Replace all content with the fixed error message
    #[must_use]
    pub fn fail(self) -> Turn {
        Turn::terminal(
            self.id,
            Role::Model,
            Some(self.error_message.to_string()),
            None,
            TurnPhase::ErroredFinalized,
        )
    }
}

impl Default for PendingTurn {
    fn default() -> Self {
        Self::new()
    }
}

/// Presentation layer notified of relay transitions.
///
/// Implementations handle their own delivery failures; the relay never
/// observes them.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TurnPresenter: Send + Sync {
    /// A placeholder turn was created
    async fn turn_started(&self, turn: &PendingTurn);

    /// The turn received a new snapshot
    async fn turn_updated(&self, turn: &PendingTurn);

    /// The turn reached a terminal state
    async fn turn_finalized(&self, turn: &Turn);
}

fn log_failure(turn_id: Uuid, err: &LlmError) {
    error!(turn = %turn_id, error = %err, "Model call failed, finalizing turn with error message");
}

/// Run a streaming call to completion without touching the store.
///
/// `call` resolves to the snapshot stream; a failure to open the stream and a
/// failure mid-stream both end in an errored turn.
pub async fn drive_stream<F>(
    mut pending: PendingTurn,
    call: F,
    presenter: &dyn TurnPresenter,
) -> Turn
where
    F: Future<Output = Result<SnapshotStream, LlmError>> + Send,
{
    presenter.turn_started(&pending).await;

    let turn = match call.await {
        Ok(mut stream) => {
            let mut failure = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(snapshot) => {
                        pending.apply_snapshot(snapshot);
                        presenter.turn_updated(&pending).await;
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            match failure {
                Some(err) => {
                    log_failure(pending.id(), &err);
                    pending.fail()
                }
                None if pending.text().is_empty() => {
                    error!(turn = %pending.id(), "Stream ended without content");
                    pending.fail()
                }
                None => pending.finish(),
            }
        }
        Err(err) => {
            log_failure(pending.id(), &err);
            pending.fail()
        }
    };

    debug!(turn = %turn.id(), phase = ?turn.phase(), "Turn finalized");
    presenter.turn_finalized(&turn).await;
    turn
}

/// Run a batch call to completion without touching the store
pub async fn drive_batch<F>(pending: PendingTurn, call: F, presenter: &dyn TurnPresenter) -> Turn
where
    F: Future<Output = Result<GenerationResult, LlmError>> + Send,
{
    presenter.turn_started(&pending).await;

    let turn = match call.await {
        Ok(result) if result.is_empty() => {
            error!(turn = %pending.id(), "Model returned no content");
            pending.fail()
        }
        Ok(result) => pending.complete(result),
        Err(err) => {
            log_failure(pending.id(), &err);
            pending.fail()
        }
    };

    debug!(turn = %turn.id(), phase = ?turn.phase(), "Turn finalized");
    presenter.turn_finalized(&turn).await;
    turn
}

/// Relay bound to a conversation store: drives a turn and appends it
pub struct ResponseRelay<Id: ConversationKey> {
    store: Arc<ConversationStore<Id>>,
}

impl<Id: ConversationKey> Clone for ResponseRelay<Id> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<Id: ConversationKey> ResponseRelay<Id> {
    /// Create a relay writing into `store`
    #[must_use]
    pub const fn new(store: Arc<ConversationStore<Id>>) -> Self {
        Self { store }
    }

    /// Drive a streaming call and append the finalized turn
    pub async fn relay_stream<F>(
        &self,
        id: Id,
        pending: PendingTurn,
        call: F,
        presenter: &dyn TurnPresenter,
    ) -> Turn
    where
        F: Future<Output = Result<SnapshotStream, LlmError>> + Send,
    {
        let turn = drive_stream(pending, call, presenter).await;
        self.store.append(id, turn.clone()).await;
        turn
    }

    /// Drive a batch call and append the finalized turn
    pub async fn relay_batch<F>(
        &self,
        id: Id,
        pending: PendingTurn,
        call: F,
        presenter: &dyn TurnPresenter,
    ) -> Turn
    where
        F: Future<Output = Result<GenerationResult, LlmError>> + Send,
    {
        let turn = drive_batch(pending, call, presenter).await;
        self.store.append(id, turn.clone()).await;
        turn
    }
}
