//! Anthropic messages adapter (JSON request/response, named-event SSE).
//!
//! The stream decoder is stateful: tool-use blocks open in a
//! `content_block_start` event that carries the call id and name, and later
//! `input_json_delta` events reference the block only by index.

use std::collections::HashMap;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::adapter::{ChatRequest, EventDecoder, ProviderAdapter, ProviderRequest};
use crate::auth::Credentials;
use crate::codec::Frame;
use crate::error::LlmError;
use crate::streaming::StreamChunk;
use crate::types::{
    ChatResponse, ContentPart, FinishReason, Message, MessageRole, ProviderId, ResponseMetadata,
    ToolChoice, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic messages protocol.
#[derive(Debug, Default, Clone)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Converts conversation messages. System messages are hoisted into the
    /// top-level `system` field by `encode`; tool-role messages become
    /// user-role `tool_result` blocks, which is where this backend expects
    /// them.
    fn convert_message(message: &Message) -> Result<Option<serde_json::Value>, LlmError> {
        let mut blocks = Vec::new();
        for part in &message.parts {
            match part {
                ContentPart::Text { text } => {
                    blocks.push(serde_json::json!({ "type": "text", "text": text }));
                }
                ContentPart::Image {
                    data, media_type, ..
                } => {
                    let (Some(data), Some(media_type)) = (data, media_type) else {
                        return Err(LlmError::EncodingError(
                            "this backend accepts base64 image data only".to_string(),
                        ));
                    };
                    blocks.push(serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type,
                            "data": data,
                        },
                    }));
                }
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": arguments,
                    }));
                }
                ContentPart::ToolResult {
                    tool_call_id,
                    output,
                    is_error,
                    ..
                } => {
                    let mut block = serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": output,
                    });
                    if *is_error {
                        block["is_error"] = serde_json::json!(true);
                    }
                    blocks.push(block);
                }
            }
        }
        if blocks.is_empty() {
            return Ok(None);
        }

        let role = match message.role {
            MessageRole::Assistant => "assistant",
            // Tool results ride in user messages on this protocol.
            MessageRole::User | MessageRole::Tool => "user",
            MessageRole::System => return Ok(None),
        };
        Ok(Some(serde_json::json!({
            "role": role,
            "content": blocks,
        })))
    }

    fn convert_tool_choice(choice: &ToolChoice) -> Option<serde_json::Value> {
        match choice {
            ToolChoice::Auto => Some(serde_json::json!({ "type": "auto" })),
            ToolChoice::Required => Some(serde_json::json!({ "type": "any" })),
            ToolChoice::Tool { name } => {
                Some(serde_json::json!({ "type": "tool", "name": name }))
            }
            ToolChoice::None => None,
        }
    }

    fn parse_stop_reason(reason: &str) -> FinishReason {
        match reason {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.input_tokens.unwrap_or(0),
            output_tokens: self.output_tokens.unwrap_or(0),
            reasoning_tokens: 0,
            cached_tokens: self.cache_read_input_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: Option<String>,
    model: Option<String>,
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn encode(&self, request: &ChatRequest) -> Result<serde_json::Value, LlmError> {
        let messages = request
            .context
            .conversation()
            .iter()
            .filter_map(|m| Self::convert_message(m).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let options = &request.options;
        let mut body = serde_json::json!({
            "model": request.model.id,
            "messages": messages,
            // Required by the protocol; fall back to the model's output limit.
            "max_tokens": options.max_tokens.unwrap_or(request.model.limits.max_output),
        });

        let system = request.context.leading_system_text();
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(stop) = &options.stop {
            body["stop_sequences"] = serde_json::json!(stop);
        }
        if let Some(tools) = &request.context.tools {
            let tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
            if let Some(choice) = options.tool_choice.as_ref().and_then(Self::convert_tool_choice)
            {
                body["tool_choice"] = choice;
            }
        }
        if request.stream {
            body["stream"] = serde_json::json!(true);
        }
        Ok(body)
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        body: serde_json::Value,
        credentials: &Credentials,
    ) -> Result<ProviderRequest, LlmError> {
        let base = request
            .model
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        let url = reqwest::Url::parse(&format!("{}/v1/messages", base.trim_end_matches('/')))
            .map_err(|e| LlmError::ConfigurationError(format!("invalid base URL: {e}")))?;

        let mut out = ProviderRequest::post(url, serde_json::to_vec(&body)?);
        out.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        out.headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(credentials.bearer()?)
                .map_err(|_| LlmError::ConfigurationError("unencodable API key".to_string()))?,
        );
        out.headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(API_VERSION),
        );
        Ok(out)
    }

    fn decode(
        &self,
        request: &ChatRequest,
        status: u16,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ChatResponse, LlmError> {
        let text = String::from_utf8_lossy(body);
        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(LlmError::api(status, message, Some(text.into_owned())));
        }

        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::api(
                status,
                format!("unparseable response body: {e}"),
                Some(text.into_owned()),
            )
        })?;

        let mut parts = Vec::new();
        for block in wire.content {
            match block {
                WireContentBlock::Text { text } => parts.push(ContentPart::text(text)),
                // Thinking blocks stay out of the visible message.
                WireContentBlock::Thinking { .. } => {}
                WireContentBlock::ToolUse { id, name, input } => {
                    parts.push(ContentPart::tool_call(id, name, input));
                }
            }
        }
        let message = if parts.is_empty() {
            Message::assistant("")
        } else {
            Message::assistant_with_parts(parts)
        };

        Ok(ChatResponse {
            context: request.context.appending(message.clone()),
            message,
            usage: wire.usage.map(WireUsage::into_usage).unwrap_or_default(),
            finish_reason: wire.stop_reason.as_deref().map(Self::parse_stop_reason),
            metadata: ResponseMetadata {
                id: wire.id,
                model: wire.model,
                created: None,
                raw: serde_json::Map::new(),
            },
        })
    }

    fn event_decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(AnthropicEventDecoder::default())
    }
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    index: Option<u32>,
    message: Option<WireStreamMessage>,
    content_block: Option<serde_json::Value>,
    delta: Option<WireStreamDelta>,
    usage: Option<WireUsage>,
    error: Option<WireStreamError>,
}

#[derive(Debug, Deserialize)]
struct WireStreamMessage {
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamDelta {
    text: Option<String>,
    thinking: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

/// Named-event SSE decoder. Carries the id and name of each open tool-use
/// block between frames, keyed by content-block index.
#[derive(Debug, Default)]
pub struct AnthropicEventDecoder {
    open_tool_calls: HashMap<u32, String>,
}

impl EventDecoder for AnthropicEventDecoder {
    fn decode_event(&mut self, frame: &Frame) -> Result<Vec<StreamChunk>, LlmError> {
        let payload = match frame {
            Frame::Event { payload, .. } => payload,
            Frame::Exception { kind, payload } => {
                return Err(LlmError::api(
                    0,
                    format!("provider error frame: {kind}"),
                    Some(String::from_utf8_lossy(payload).into_owned()),
                ));
            }
        };

        let event: WireStreamEvent = serde_json::from_slice(payload)
            .map_err(|e| LlmError::FramingError(format!("unparseable stream event: {e}")))?;

        let mut chunks = Vec::new();
        match event.event_type.as_str() {
            "message_start" => {
                if let Some(usage) = event.message.and_then(|m| m.usage) {
                    chunks.push(StreamChunk::Meta {
                        usage: Some(usage.into_usage()),
                        finish_reason: None,
                    });
                }
            }
            "content_block_start" => {
                let index = event.index.unwrap_or(0);
                if let Some(block) = &event.content_block {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        let id = block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .map(str::to_string);
                        self.open_tool_calls.insert(index, id.clone());
                        chunks.push(StreamChunk::ToolCall {
                            id,
                            name,
                            arguments_delta: None,
                        });
                    }
                }
            }
            "content_block_delta" => {
                if let Some(delta) = event.delta {
                    if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                        chunks.push(StreamChunk::Content { delta: text });
                    }
                    if let Some(thinking) = delta.thinking.filter(|t| !t.is_empty()) {
                        chunks.push(StreamChunk::Thinking { delta: thinking });
                    }
                    if let Some(partial) = delta.partial_json {
                        let index = event.index.unwrap_or(0);
                        let id = self
                            .open_tool_calls
                            .get(&index)
                            .cloned()
                            .unwrap_or_else(|| format!("toolu_{index}"));
                        chunks.push(StreamChunk::ToolCall {
                            id,
                            name: None,
                            arguments_delta: Some(partial),
                        });
                    }
                }
            }
            "content_block_stop" => {
                if let Some(index) = event.index {
                    self.open_tool_calls.remove(&index);
                }
            }
            "message_delta" => {
                let usage = event.usage.map(WireUsage::into_usage);
                let finish_reason = event
                    .delta
                    .and_then(|d| d.stop_reason)
                    .as_deref()
                    .map(AnthropicAdapter::parse_stop_reason);
                if usage.is_some() || finish_reason.is_some() {
                    chunks.push(StreamChunk::Meta {
                        usage,
                        finish_reason,
                    });
                }
            }
            "error" => {
                let error = event.error.unwrap_or(WireStreamError {
                    error_type: None,
                    message: None,
                });
                return Err(LlmError::api(
                    0,
                    format!(
                        "provider stream error ({}): {}",
                        error.error_type.as_deref().unwrap_or("unknown"),
                        error.message.as_deref().unwrap_or("no message"),
                    ),
                    None,
                ));
            }
            // message_stop / ping carry nothing to surface.
            _ => {}
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatContext, GenerationOptions, ModelInfo, Tool};
    use serde_json::json;

    fn request() -> ChatRequest {
        ChatRequest {
            model: ModelInfo::new(ProviderId::Anthropic, "claude-test"),
            context: ChatContext::from_messages(vec![
                Message::system("be brief"),
                Message::user("hi"),
            ])
            .unwrap(),
            options: GenerationOptions::default(),
            stream: false,
        }
    }

    #[test]
    fn encode_hoists_the_system_block() {
        let body = AnthropicAdapter::new().encode(&request()).unwrap();
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        // max_tokens is mandatory and defaults to the model limit.
        assert_eq!(body["max_tokens"], json!(4096));
    }

    #[test]
    fn encode_places_tool_results_in_user_messages() {
        let mut req = request();
        req.context = ChatContext::from_messages(vec![
            Message::user("weather?"),
            Message::assistant_with_parts(vec![ContentPart::tool_call(
                "toolu_1",
                "get_weather",
                json!({"city": "Oslo"}),
            )]),
            Message::tool_result("toolu_1", "get_weather", "18C"),
        ])
        .unwrap()
        .with_tools(vec![Tool::function("get_weather", "Weather.", json!({}))]);

        let body = AnthropicAdapter::new().encode(&req).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["tools"][0]["input_schema"], json!({}));
    }

    #[test]
    fn decode_maps_tool_use_blocks() {
        let body = br#"{
            "id": "msg_1",
            "model": "claude-test",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Oslo"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }"#;
        let response = AnthropicAdapter::new()
            .decode(&request(), 200, &HeaderMap::new(), body)
            .unwrap();
        assert_eq!(response.text(), "Checking.");
        assert!(response.has_tool_calls());
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.usage.input_tokens, 12);
    }

    #[test]
    fn stream_decoder_tracks_tool_use_across_frames() {
        let mut decoder = AnthropicEventDecoder::default();

        let start = Frame::event(
            Some("content_block_start"),
            br#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"search"}}"#.to_vec(),
        );
        let chunks = decoder.decode_event(&start).unwrap();
        assert_eq!(
            chunks,
            vec![StreamChunk::ToolCall {
                id: "toolu_9".to_string(),
                name: Some("search".to_string()),
                arguments_delta: None,
            }]
        );

        let delta = Frame::event(
            Some("content_block_delta"),
            br#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#.to_vec(),
        );
        let chunks = decoder.decode_event(&delta).unwrap();
        assert_eq!(
            chunks,
            vec![StreamChunk::ToolCall {
                id: "toolu_9".to_string(),
                name: None,
                arguments_delta: Some("{\"q\":".to_string()),
            }]
        );

        let stop = Frame::event(
            Some("content_block_stop"),
            br#"{"type":"content_block_stop","index":1}"#.to_vec(),
        );
        assert!(decoder.decode_event(&stop).unwrap().is_empty());
        assert!(decoder.open_tool_calls.is_empty());
    }

    #[test]
    fn stream_decoder_surfaces_error_events() {
        let mut decoder = AnthropicEventDecoder::default();
        let frame = Frame::event(
            Some("error"),
            br#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#.to_vec(),
        );
        let err = decoder.decode_event(&frame).unwrap_err();
        assert!(matches!(err, LlmError::ApiError { .. }));
    }

    #[test]
    fn stream_decoder_emits_meta_from_message_delta() {
        let mut decoder = AnthropicEventDecoder::default();
        let frame = Frame::event(
            Some("message_delta"),
            br#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#.to_vec(),
        );
        let chunks = decoder.decode_event(&frame).unwrap();
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            StreamChunk::Meta {
                usage: Some(usage),
                finish_reason: Some(FinishReason::Stop),
            } => assert_eq!(usage.output_tokens, 42),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }
}
