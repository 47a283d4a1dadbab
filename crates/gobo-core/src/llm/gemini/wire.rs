//! Gemini REST payloads

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::assembler::{ContentBlock, Part};
use crate::conversation::{Attachment, Source};
use crate::llm::{GenerationOptions, GenerationResult, LlmError, Modality};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateContentRequest {
    pub contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    pub fn new(contents: &[ContentBlock], options: &GenerationOptions) -> Self {
        let system_instruction = options
            .system_instruction
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|text| WireContent {
                role: None,
                parts: vec![WirePart::text(text)],
            });

        let tools = if options.maps_grounding {
            vec![WireTool {
                google_maps: Some(EmptyObject {}),
            }]
        } else {
            Vec::new()
        };

        Self {
            contents: contents.iter().map(WireContent::from).collect(),
            system_instruction,
            tools,
            generation_config: GenerationConfig::from_options(options),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<WirePart>,
}

impl From<&ContentBlock> for WireContent {
    fn from(block: &ContentBlock) -> Self {
        let parts = block
            .parts
            .iter()
            .map(|part| match part {
                Part::InlineData { media_type, data } => WirePart {
                    text: None,
                    inline_data: Some(WireBlob {
                        mime_type: media_type.to_string(),
                        data: BASE64.encode(data),
                    }),
                },
                Part::Text(text) => WirePart::text(text),
            })
            .collect();
        Self {
            role: Some(block.role.as_str()),
            parts,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<WireBlob>,
}

impl WirePart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireBlob {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub(super) struct EmptyObject {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireTool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_maps: Option<EmptyObject>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerationConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

impl GenerationConfig {
    fn from_options(options: &GenerationOptions) -> Option<Self> {
        let image_config = (options.aspect_ratio.is_some() || options.image_size.is_some())
            .then(|| ImageConfig {
                aspect_ratio: options.aspect_ratio.clone(),
                image_size: options.image_size.clone(),
            });

        let speech_config = options.voice.clone().map(|voice_name| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
            },
        });

        let thinking_config = options
            .thinking_budget
            .map(|thinking_budget| ThinkingConfig { thinking_budget });

        let config = Self {
            response_modalities: options
                .response_modalities
                .iter()
                .map(|m| match m {
                    Modality::Text => "TEXT",
                    Modality::Image => "IMAGE",
                    Modality::Audio => "AUDIO",
                })
                .collect(),
            image_config,
            speech_config,
            thinking_config,
        };

        let is_empty = config.response_modalities.is_empty()
            && config.image_config.is_none()
            && config.speech_config.is_none()
            && config.thinking_config.is_none();
        (!is_empty).then_some(config)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ThinkingConfig {
    pub thinking_budget: u32,
}

// Response side

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, alias = "prompt_feedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default, alias = "grounding_metadata")]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GroundingMetadata {
    #[serde(default, alias = "grounding_chunks")]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GroundingChunk {
    #[serde(default)]
    pub web: Option<ChunkLink>,
    #[serde(default)]
    pub maps: Option<ChunkLink>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChunkLink {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Title used for a map chunk without one
const MAP_LINK_TITLE: &str = "Map Link";

impl GroundingChunk {
    fn to_source(&self) -> Option<Source> {
        let links = || self.web.iter().chain(self.maps.iter());
        let uri = links().find_map(|l| l.uri.as_deref().filter(|u| !u.is_empty()))?;
        let title = links()
            .find_map(|l| l.title.as_deref().filter(|t| !t.is_empty()))
            .unwrap_or(MAP_LINK_TITLE);
        Some(Source {
            title: title.to_string(),
            uri: uri.to_string(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<WireBlob>,
    #[serde(default)]
    pub thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PromptFeedback {
    #[serde(default, alias = "block_reason")]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn answer_parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
            .filter(|part| !part.thought)
    }

    /// Concatenated answer text, excluding thought summaries
    pub fn text(&self) -> String {
        self.answer_parts()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }

    /// Grounding sources of the first candidate that carry a link
    pub fn sources(&self) -> Vec<Source> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|meta| {
                meta.grounding_chunks
                    .iter()
                    .filter_map(GroundingChunk::to_source)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Why the response carries no candidates, if it doesn't
    pub fn missing_reason(&self) -> Option<String> {
        if !self.candidates.is_empty() {
            return None;
        }
        let reason = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
            .unwrap_or_else(|| "no candidates".to_string());
        Some(reason)
    }

    /// Convert into a batch result: joined text plus the first inline blob
    pub fn into_result(self) -> Result<GenerationResult, LlmError> {
        if let Some(reason) = self.missing_reason() {
            return Err(LlmError::EmptyResponse(reason));
        }

        let text = Some(self.text()).filter(|t| !t.is_empty());
        let sources = self.sources();
        let attachment = self
            .answer_parts()
            .find_map(|part| part.inline_data.as_ref())
            .map(decode_blob)
            .transpose()?;

        Ok(GenerationResult {
            text,
            attachment,
            sources,
        })
    }
}

/// Decode an inline blob, keeping its declared media type
pub(super) fn decode_blob(blob: &WireBlob) -> Result<Attachment, LlmError> {
    let data = BASE64
        .decode(blob.data.as_bytes())
        .map_err(|e| LlmError::JsonError(format!("invalid inline data: {e}")))?;
    let media_type = blob
        .mime_type
        .parse()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    Ok(Attachment::new(media_type, data))
}

// Long-running video generation

#[derive(Debug, Serialize)]
pub(super) struct PredictRequest {
    pub instances: Vec<PredictInstance>,
    pub parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
pub(super) struct PredictInstance {
    pub prompt: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PredictParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl PredictRequest {
    pub fn new(prompt: String, options: &GenerationOptions) -> Self {
        Self {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                aspect_ratio: options.aspect_ratio.clone(),
                resolution: options.resolution.clone(),
            },
        }
    }
}

/// JSON path of the generated video URI inside a finished operation
pub(super) const VIDEO_URI_PATH: &[&str] = &[
    "response",
    "generateVideoResponse",
    "generatedSamples",
    "0",
    "video",
    "uri",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_request_serialization() -> Result<(), serde_json::Error> {
        let blocks = vec![
            ContentBlock {
                role: Role::User,
                parts: vec![
                    Part::InlineData {
                        media_type: mime::IMAGE_JPEG,
                        data: Bytes::from_static(b"abc"),
                    },
                    Part::Text("what is this".to_string()),
                ],
            },
            ContentBlock {
                role: Role::Model,
                parts: vec![Part::Text("a cat".to_string())],
            },
        ];
        let options = GenerationOptions {
            system_instruction: Some("be brief".to_string()),
            maps_grounding: true,
            ..GenerationOptions::default()
        };

        let value = serde_json::to_value(GenerateContentRequest::new(&blocks, &options))?;
        assert_eq!(
            value,
            json!({
                "contents": [
                    {"role": "user", "parts": [
                        {"inlineData": {"mimeType": "image/jpeg", "data": "YWJj"}},
                        {"text": "what is this"}
                    ]},
                    {"role": "model", "parts": [{"text": "a cat"}]}
                ],
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "tools": [{"googleMaps": {}}]
            })
        );
        Ok(())
    }

    #[test]
    fn test_generation_config_serialization() -> Result<(), serde_json::Error> {
        let options = GenerationOptions {
            aspect_ratio: Some("1:1".to_string()),
            image_size: Some("1K".to_string()),
            voice: Some("Kore".to_string()),
            thinking_budget: Some(32_768),
            response_modalities: vec![Modality::Image, Modality::Text],
            ..GenerationOptions::default()
        };
        let value = serde_json::to_value(GenerationConfig::from_options(&options))?;
        assert_eq!(
            value,
            json!({
                "responseModalities": ["IMAGE", "TEXT"],
                "imageConfig": {"aspectRatio": "1:1", "imageSize": "1K"},
                "speechConfig": {"voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Kore"}}},
                "thinkingConfig": {"thinkingBudget": 32768}
            })
        );
        assert!(GenerationConfig::from_options(&GenerationOptions::default()).is_none());
        Ok(())
    }

    #[test]
    fn test_response_text_skips_thoughts() -> Result<(), Box<dyn std::error::Error>> {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "planning...", "thought": true},
                {"text": "Hello, "},
                {"text": "world"}
            ]}}]
        }))?;
        let result = response.into_result()?;
        assert_eq!(result.text.as_deref(), Some("Hello, world"));
        assert!(result.attachment.is_none());
        Ok(())
    }

    #[test]
    fn test_response_inline_data_keeps_media_type() -> Result<(), Box<dyn std::error::Error>> {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"inline_data": {"mime_type": "image/png", "data": "cG5n"}}
            ]}}]
        }))?;
        let result = response.into_result()?;
        assert_eq!(result.text, None);
        let attachment = result.attachment.ok_or("missing attachment")?;
        assert_eq!(attachment.media_type(), &mime::IMAGE_PNG);
        assert_eq!(attachment.data().as_ref(), b"png");
        Ok(())
    }

    #[test]
    fn test_response_grounding_sources() -> Result<(), Box<dyn std::error::Error>> {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Try the bakery on Main St."}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://example.com/bakery", "title": "Bakery"}},
                    {"maps": {"uri": "https://maps.google.com/?cid=1"}},
                    {"maps": {"uri": "https://maps.google.com/?cid=2", "title": "Cafe"}},
                    {"web": {"title": "no link"}}
                ]}
            }]
        }))?;
        let result = response.into_result()?;
        assert_eq!(
            result.sources,
            vec![
                Source {
                    title: "Bakery".to_string(),
                    uri: "https://example.com/bakery".to_string(),
                },
                Source {
                    title: "Map Link".to_string(),
                    uri: "https://maps.google.com/?cid=1".to_string(),
                },
                Source {
                    title: "Cafe".to_string(),
                    uri: "https://maps.google.com/?cid=2".to_string(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_response_without_grounding_has_no_sources() -> Result<(), serde_json::Error> {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
        }))?;
        assert!(response.sources().is_empty());
        Ok(())
    }

    #[test]
    fn test_blocked_prompt_is_empty_response() -> Result<(), serde_json::Error> {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))?;
        assert!(matches!(
            response.into_result(),
            Err(LlmError::EmptyResponse(reason)) if reason == "SAFETY"
        ));
        Ok(())
    }

    #[test]
    fn test_predict_request_serialization() -> Result<(), serde_json::Error> {
        let options = GenerationOptions {
            aspect_ratio: Some("16:9".to_string()),
            resolution: Some("720p".to_string()),
            ..GenerationOptions::default()
        };
        let value = serde_json::to_value(PredictRequest::new("a fox".to_string(), &options))?;
        assert_eq!(
            value,
            json!({
                "instances": [{"prompt": "a fox"}],
                "parameters": {"aspectRatio": "16:9", "resolution": "720p"}
            })
        );
        Ok(())
    }
}
