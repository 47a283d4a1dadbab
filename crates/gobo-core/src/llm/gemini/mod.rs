//! Google Gemini REST client
//!
//! Implements [`ModelClient`] over `generateContent`,
//! `streamGenerateContent` (server-sent events) and the Veo
//! `predictLongRunning` operation.

mod wire;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::assembler::Part;
use crate::config::{ChatSettings, VIDEO_POLL_INTERVAL_SECS};
use crate::conversation::Attachment;
use crate::llm::http_utils::{
    create_http_client, extract_text_content, get_bytes, get_json, open_stream_request,
    send_json_request,
};
use crate::llm::{
    GenerateRequest, GenerationResult, LlmError, ModelClient, Snapshot, SnapshotStream,
};

use wire::{GenerateContentRequest, GenerateContentResponse, PredictRequest, VIDEO_URI_PATH};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini API client
pub struct GeminiClient {
    http_client: HttpClient,
    api_key: String,
    api_base: String,
    poll_interval: Duration,
}

impl GeminiClient {
    /// Create a client for the default endpoint
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self::with_base(api_key, crate::config::GEMINI_API_BASE.to_string(), None)
    }

    /// Create a client for a custom endpoint and optional HTTP timeout
    #[must_use]
    pub fn with_base(api_key: String, api_base: String, timeout_secs: Option<u64>) -> Self {
        Self {
            http_client: create_http_client(timeout_secs),
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(VIDEO_POLL_INTERVAL_SECS),
        }
    }

    /// Build a client from settings.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingConfig` if no API key is configured.
    pub fn from_settings(settings: &ChatSettings) -> Result<Self, LlmError> {
        let api_key = settings
            .gemini_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingConfig("GEMINI_API_KEY".to_string()))?;
        Ok(Self::with_base(
            api_key,
            settings.gemini_api_base(),
            settings.llm_http_timeout_secs,
        ))
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.api_base)
    }

    fn auth_headers(&self) -> [(&str, &str); 1] {
        [(API_KEY_HEADER, self.api_key.as_str())]
    }

    async fn poll_operation(&self, name: &str) -> Result<Value, LlmError> {
        let url = format!("{}/{name}", self.api_base);
        loop {
            let operation = get_json(&self.http_client, &url, &self.auth_headers()).await?;

            if let Some(error) = operation.get("error") {
                return Err(LlmError::ApiError(format!("video operation failed: {error}")));
            }
            if operation.get("done").and_then(Value::as_bool) == Some(true) {
                return Ok(operation);
            }

            debug!(operation = name, "Video generation still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Prompt text of the last user block
fn last_prompt(request: &GenerateRequest) -> Option<String> {
    request.contents.last().and_then(|block| {
        block.parts.iter().find_map(|part| match part {
            Part::Text(text) if !text.trim().is_empty() => Some(text.clone()),
            _ => None,
        })
    })
}

#[async_trait]
impl ModelClient for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model, blocks = request.contents.len()))]
    async fn generate(&self, request: GenerateRequest) -> Result<GenerationResult, LlmError> {
        let url = self.model_url(&request.model, "generateContent");
        let body = serde_json::to_value(GenerateContentRequest::new(
            &request.contents,
            &request.options,
        ))
        .map_err(|e| LlmError::JsonError(e.to_string()))?;

        let res_json = send_json_request(&self.http_client, &url, &body, &self.auth_headers()).await?;
        let response: GenerateContentResponse =
            serde_json::from_value(res_json).map_err(|e| LlmError::JsonError(e.to_string()))?;

        let result = response.into_result()?;
        debug!(
            has_text = result.text.is_some(),
            has_attachment = result.attachment.is_some(),
            "Gemini generation finished"
        );
        Ok(result)
    }

    #[instrument(skip(self, request), fields(model = %request.model, blocks = request.contents.len()))]
    async fn generate_stream(&self, request: GenerateRequest) -> Result<SnapshotStream, LlmError> {
        let url = format!(
            "{}?alt=sse",
            self.model_url(&request.model, "streamGenerateContent")
        );
        let body = serde_json::to_value(GenerateContentRequest::new(
            &request.contents,
            &request.options,
        ))
        .map_err(|e| LlmError::JsonError(e.to_string()))?;

        let response =
            open_stream_request(&self.http_client, &url, &body, &self.auth_headers()).await?;

        // Each event carries a delta; the stream yields the reply accumulated so far.
        // Grounding metadata usually arrives with the last chunk.
        let snapshots = response
            .bytes_stream()
            .eventsource()
            .scan(Snapshot::default(), |full, event| {
                let item = match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => match serde_json::from_str::<GenerateContentResponse>(&event.data) {
                        Ok(chunk) => {
                            let delta = chunk.text();
                            let sources = chunk.sources();
                            if delta.is_empty() && sources.is_empty() {
                                None
                            } else {
                                full.text.push_str(&delta);
                                full.sources.extend(sources);
                                Some(Ok(full.clone()))
                            }
                        }
                        Err(e) => Some(Err(LlmError::JsonError(e.to_string()))),
                    },
                    Err(e) => Some(Err(LlmError::NetworkError(e.to_string()))),
                };
                future::ready(Some(item))
            })
            .filter_map(future::ready)
            .boxed();

        Ok(snapshots)
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate_video(&self, request: GenerateRequest) -> Result<GenerationResult, LlmError> {
        let prompt = last_prompt(&request)
            .ok_or_else(|| LlmError::Unknown("video generation needs a text prompt".to_string()))?;

        let url = self.model_url(&request.model, "predictLongRunning");
        let body = serde_json::to_value(PredictRequest::new(prompt, &request.options))
            .map_err(|e| LlmError::JsonError(e.to_string()))?;

        let started = send_json_request(&self.http_client, &url, &body, &self.auth_headers()).await?;
        let name = extract_text_content(&started, &["name"])?;
        info!(operation = %name, "Video generation started");

        let finished = self.poll_operation(&name).await?;
        let uri = extract_text_content(&finished, VIDEO_URI_PATH).map_err(|e| {
            warn!(error = %e, "Finished video operation has no sample");
            LlmError::EmptyResponse("no generated video".to_string())
        })?;

        let data = get_bytes(&self.http_client, &uri, &self.auth_headers()).await?;
        info!(bytes = data.len(), "Video downloaded");

        let video_mp4 = "video/mp4"
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        Ok(GenerationResult {
            attachment: Some(Attachment::new(video_mp4, data)),
            ..GenerationResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ContentBlock;
    use crate::conversation::Role;
    use crate::llm::GenerationOptions;

    #[test]
    fn test_from_settings_requires_key() {
        let settings = ChatSettings::default();
        assert!(matches!(
            GeminiClient::from_settings(&settings),
            Err(LlmError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_model_url_uses_base() -> Result<(), LlmError> {
        let settings = ChatSettings {
            gemini_api_key: Some("key".to_string()),
            gemini_api_base: Some("http://localhost:9000/v1beta/".to_string()),
            ..ChatSettings::default()
        };
        let client = GeminiClient::from_settings(&settings)?;
        assert_eq!(
            client.model_url("gemini-2.5-flash", "generateContent"),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:generateContent"
        );
        Ok(())
    }

    #[test]
    fn test_last_prompt() {
        let request = GenerateRequest {
            model: "veo".to_string(),
            contents: vec![ContentBlock {
                role: Role::User,
                parts: vec![Part::Text("a red fox in snow".to_string())],
            }],
            options: GenerationOptions::default(),
        };
        assert_eq!(last_prompt(&request).as_deref(), Some("a red fox in snow"));

        let empty = GenerateRequest {
            contents: Vec::new(),
            ..request
        };
        assert_eq!(last_prompt(&empty), None);
    }
}
