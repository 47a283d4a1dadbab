use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use gobo_core::config::ChatSettings;
use gobo_core::llm::{
    GenerateRequest, GenerationResult, LlmError, ModelClient, Snapshot, SnapshotStream,
};
use gobo_core::relay::RELAY_ERROR_MESSAGE;
use gobo_core::{
    Attachment, ChatService, ConversationStore, Part, PendingTurn, Role, Task, Turn,
    TurnPresenter, UserInput,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Deterministic model: echoes the prompt back as three snapshots and
/// remembers every request it saw.
#[derive(Default)]
struct EchoModel {
    requests: Mutex<Vec<GenerateRequest>>,
    fail_stream_after: Option<usize>,
}

impl EchoModel {
    fn failing_after(snapshots: usize) -> Self {
        Self {
            fail_stream_after: Some(snapshots),
            ..Self::default()
        }
    }

    fn record(&self, request: &GenerateRequest) -> String {
        let prompt = request
            .contents
            .last()
            .and_then(|block| {
                block.parts.iter().find_map(|part| match part {
                    Part::Text(text) => Some(text.clone()),
                    Part::InlineData { .. } => None,
                })
            })
            .unwrap_or_default();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        prompt
    }

    fn seen(&self) -> Vec<GenerateRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ModelClient for EchoModel {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerationResult, LlmError> {
        let prompt = self.record(&request);
        Ok(GenerationResult::text(format!("echo: {prompt}")))
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<SnapshotStream, LlmError> {
        let prompt = self.record(&request);
        let full = format!("echo: {prompt}");
        let mut items: Vec<Result<Snapshot, LlmError>> = ["echo", "echo:", full.as_str()]
            .iter()
            .map(|s| Ok(Snapshot::from((*s).to_string())))
            .collect();
        if let Some(n) = self.fail_stream_after {
            items.truncate(n);
            items.push(Err(LlmError::NetworkError("stream dropped".to_string())));
        }
        Ok(stream::iter(items).boxed())
    }
}

#[derive(Default)]
struct CountingPresenter {
    started: AtomicUsize,
    updated: AtomicUsize,
    finalized: AtomicUsize,
}

#[async_trait::async_trait]
impl TurnPresenter for CountingPresenter {
    async fn turn_started(&self, _turn: &PendingTurn) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    async fn turn_updated(&self, _turn: &PendingTurn) {
        self.updated.fetch_add(1, Ordering::SeqCst);
    }

    async fn turn_finalized(&self, _turn: &Turn) {
        self.finalized.fetch_add(1, Ordering::SeqCst);
    }
}

fn service_with(model: Arc<EchoModel>) -> ChatService<String> {
    ChatService::new(model, Arc::new(ChatSettings::default()))
}

#[tokio::test]
async fn test_conversation_builds_history() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(EchoModel::default());
    let service = service_with(Arc::clone(&model));
    let presenter = CountingPresenter::default();
    let session = "browser-session".to_string();

    let first = service
        .chat(session.clone(), UserInput::text("hello")?, &presenter)
        .await;
    assert_eq!(first.text(), Some("echo: hello"));

    service
        .chat(session.clone(), UserInput::text("again")?, &presenter)
        .await;

    let seen = model.seen();
    assert_eq!(seen.len(), 2);
    // second request: user, model, new user
    assert_eq!(seen[1].contents.len(), 3);
    assert_eq!(seen[1].contents[1].role, Role::Model);

    assert_eq!(service.history(&session).await.len(), 4);
    assert_eq!(presenter.started.load(Ordering::SeqCst), 2);
    assert_eq!(presenter.updated.load(Ordering::SeqCst), 6);
    assert_eq!(presenter.finalized.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_stream_drop_leaves_single_error_turn() -> Result<(), Box<dyn std::error::Error>> {
    let service = service_with(Arc::new(EchoModel::failing_after(2)));
    let presenter = CountingPresenter::default();
    let id = "s".to_string();

    let turn = service.chat(id.clone(), UserInput::text("hi")?, &presenter).await;
    assert!(turn.is_error());

    let history = service.history(&id).await;
    let model_turns: Vec<_> = history.iter().filter(|t| t.role() == Role::Model).collect();
    assert_eq!(model_turns.len(), 1);
    assert_eq!(model_turns[0].text(), Some(RELAY_ERROR_MESSAGE));
    assert_eq!(presenter.finalized.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_reset_forgets_conversation() -> Result<(), Box<dyn std::error::Error>> {
    let service = service_with(Arc::new(EchoModel::default()));
    let presenter = CountingPresenter::default();
    let id = "to-reset".to_string();

    service.chat(id.clone(), UserInput::text("hi")?, &presenter).await;
    assert!(service.reset(&id).await);
    assert!(service.history(&id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_history_window_bounds_requests() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(EchoModel::default());
    let settings = ChatSettings {
        history_limit: Some(4),
        ..ChatSettings::default()
    };
    let service: ChatService<String> = ChatService::new(model.clone(), Arc::new(settings));
    let presenter = CountingPresenter::default();
    let id = "window".to_string();

    for n in 0..5 {
        service
            .chat(id.clone(), UserInput::text(format!("msg {n}"))?, &presenter)
            .await;
    }

    assert_eq!(service.history(&id).await.len(), 4);
    let last = model.seen().pop().ok_or("no requests")?;
    // four retained turns plus the new input
    assert_eq!(last.contents.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_photo_turn_keeps_media_type() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(EchoModel::default());
    let store = Arc::new(ConversationStore::new(20));
    let service = ChatService::with_store(
        Arc::clone(&store),
        model.clone(),
        Arc::new(ChatSettings::default()),
    );
    let presenter = CountingPresenter::default();
    let photo = Attachment::new(mime::IMAGE_PNG, Bytes::from_static(b"\x89PNG"));

    service
        .chat(11_i64, UserInput::new("what is it?", Some(photo.clone()))?, &presenter)
        .await;

    let history = store.get(&11).await;
    assert_eq!(history[0].attachment(), Some(&photo));

    let request = model.seen().pop().ok_or("no requests")?;
    assert_eq!(
        request.contents[0].parts[0],
        Part::InlineData {
            media_type: mime::IMAGE_PNG,
            data: Bytes::from_static(b"\x89PNG"),
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_one_shot_tasks_leave_history_alone() -> Result<(), Box<dyn std::error::Error>> {
    let service = service_with(Arc::new(EchoModel::default()));
    let presenter = CountingPresenter::default();
    let id = "tasks".to_string();

    let turn = service
        .run_task(id.clone(), Task::Think, UserInput::text("why?")?, &presenter)
        .await?;
    assert_eq!(turn.text(), Some("echo: why?"));
    assert!(service.history(&id).await.is_empty());
    assert_eq!(presenter.updated.load(Ordering::SeqCst), 0);
    Ok(())
}
