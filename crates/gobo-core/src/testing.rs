//! Testing helpers and mock utilities.
//!
//! Recording presenter plus constructors for mocked model clients.

use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::conversation::Turn;
use crate::llm::{GenerationResult, LlmError, MockModelClient, Snapshot, SnapshotStream};
use crate::relay::{PendingTurn, TurnPresenter};

/// One presenter notification
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    /// `turn_started`
    Started,
    /// `turn_updated` with the snapshot text
    Updated(String),
    /// `turn_finalized` with the terminal turn
    Finalized(Turn),
}

/// Presenter that records every notification in order
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingPresenter {
    /// Recorded notifications so far
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    /// Number of `turn_finalized` notifications
    pub async fn finalized_count(&self) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| matches!(e, RecordedEvent::Finalized(_)))
            .count()
    }
}

#[async_trait::async_trait]
impl TurnPresenter for RecordingPresenter {
    async fn turn_started(&self, _turn: &PendingTurn) {
        self.events.lock().await.push(RecordedEvent::Started);
    }

    async fn turn_updated(&self, turn: &PendingTurn) {
        self.events
            .lock()
            .await
            .push(RecordedEvent::Updated(turn.text().to_string()));
    }

    async fn turn_finalized(&self, turn: &Turn) {
        self.events
            .lock()
            .await
            .push(RecordedEvent::Finalized(turn.clone()));
    }
}

/// Build a snapshot stream; `Err` items become network errors.
#[must_use]
pub fn snapshot_stream(items: Vec<Result<&'static str, &'static str>>) -> SnapshotStream {
    stream::iter(items.into_iter().map(|item| {
        item.map(|text| Snapshot::from(text.to_string()))
            .map_err(|e| LlmError::NetworkError(e.to_string()))
    }))
    .boxed()
}

/// Create a mock client that streams the given snapshots for every
/// `generate_stream` call. Batch methods return an error.
#[must_use]
pub fn mock_client_streaming(snapshots: &'static [&'static str]) -> MockModelClient {
    let mut mock = MockModelClient::new();
    mock.expect_generate_stream()
        .returning(move |_| Ok(snapshot_stream(snapshots.iter().copied().map(Ok).collect())));
    mock.expect_generate()
        .returning(|_| Err(LlmError::Unknown("Not implemented".to_string())));
    mock.expect_generate_video()
        .returning(|_| Err(LlmError::Unknown("Not implemented".to_string())));
    mock
}

/// Create a mock client returning `result` from `generate` and
/// `generate_video`. Streaming returns an error.
#[must_use]
pub fn mock_client_batch(result: GenerationResult) -> MockModelClient {
    let mut mock = MockModelClient::new();
    let video = result.clone();
    mock.expect_generate()
        .returning(move |_| Ok(result.clone()));
    mock.expect_generate_video()
        .returning(move |_| Ok(video.clone()));
    mock.expect_generate_stream()
        .returning(|_| Err(LlmError::Unknown("Not implemented".to_string())));
    mock
}
