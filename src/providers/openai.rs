//! OpenAI chat-completions adapter (JSON request/response, SSE streaming).
//!
//! Also the reference implementation for every OpenAI-compatible backend:
//! the wire shapes here are the de-facto standard the rest of the ecosystem
//! copies.

use std::collections::HashMap;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::adapter::{ChatRequest, EventDecoder, ProviderAdapter, ProviderRequest};
use crate::auth::Credentials;
use crate::codec::Frame;
use crate::error::LlmError;
use crate::streaming::StreamChunk;
use crate::types::options::{ReasoningEffort, ResponseFormat};
use crate::types::{
    ChatResponse, ContentPart, FinishReason, Message, MessageRole, ProviderId, ResponseMetadata,
    ToolChoice, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI chat-completions protocol.
#[derive(Debug, Default, Clone)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert_message(message: &Message) -> Result<serde_json::Value, LlmError> {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };

        if message.role == MessageRole::Tool {
            // Tool results flatten to one message per part.
            let part = message.parts.iter().find_map(|p| {
                if let ContentPart::ToolResult {
                    tool_call_id,
                    output,
                    ..
                } = p
                {
                    Some((tool_call_id, output))
                } else {
                    None
                }
            });
            let (tool_call_id, output) = part.ok_or_else(|| {
                LlmError::EncodingError("tool message without a tool result part".to_string())
            })?;
            return Ok(serde_json::json!({
                "role": role,
                "tool_call_id": tool_call_id,
                "content": output,
            }));
        }

        let mut content_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for part in &message.parts {
            match part {
                ContentPart::Text { text } => {
                    content_parts.push(serde_json::json!({ "type": "text", "text": text }));
                }
                ContentPart::Image {
                    url,
                    data,
                    media_type,
                } => {
                    let url = match (url, data) {
                        (Some(url), _) => url.clone(),
                        (None, Some(data)) => format!(
                            "data:{};base64,{data}",
                            media_type.as_deref().unwrap_or("image/png")
                        ),
                        (None, None) => {
                            return Err(LlmError::EncodingError(
                                "image part carries neither URL nor data".to_string(),
                            ));
                        }
                    };
                    content_parts.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": { "url": url },
                    }));
                }
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    tool_calls.push(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": arguments.to_string(),
                        },
                    }));
                }
                ContentPart::ToolResult { .. } => {
                    return Err(LlmError::EncodingError(
                        "tool results belong in tool-role messages".to_string(),
                    ));
                }
            }
        }

        let mut out = serde_json::json!({ "role": role });
        // A single text part stays a plain string; anything richer becomes
        // the content-array form.
        match (content_parts.len(), &message.parts[..]) {
            (1, [ContentPart::Text { text }]) => {
                out["content"] = serde_json::Value::String(text.clone());
            }
            (0, _) => {}
            _ => out["content"] = serde_json::Value::Array(content_parts),
        }
        if !tool_calls.is_empty() {
            out["tool_calls"] = serde_json::Value::Array(tool_calls);
        }
        Ok(out)
    }

    fn convert_tool_choice(choice: &ToolChoice) -> serde_json::Value {
        match choice {
            ToolChoice::Auto => serde_json::json!("auto"),
            ToolChoice::Required => serde_json::json!("required"),
            ToolChoice::None => serde_json::json!("none"),
            ToolChoice::Tool { name } => serde_json::json!({
                "type": "function",
                "function": { "name": name },
            }),
        }
    }
}

pub(crate) fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Usage block. Field names vary across compatible backends, so both the
/// `prompt/completion` and `input/output` spellings are accepted.
#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    prompt_tokens_details: Option<WirePromptDetails>,
    completion_tokens_details: Option<WireCompletionDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct WirePromptDetails {
    cached_tokens: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireCompletionDetails {
    reasoning_tokens: Option<u64>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.input_tokens.or(self.prompt_tokens).unwrap_or(0),
            output_tokens: self.output_tokens.or(self.completion_tokens).unwrap_or(0),
            reasoning_tokens: self
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens)
                .unwrap_or(0),
            cached_tokens: self
                .prompt_tokens_details
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: Option<String>,
}

impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn encode(&self, request: &ChatRequest) -> Result<serde_json::Value, LlmError> {
        let messages = request
            .context
            .messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut body = serde_json::json!({
            "model": request.model.id,
            "messages": messages,
        });

        let options = &request.options;
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(stop) = &options.stop {
            body["stop"] = serde_json::json!(stop);
        }
        if let Some(effort) = options.reasoning_effort {
            body["reasoning_effort"] = serde_json::json!(match effort {
                ReasoningEffort::Low => "low",
                ReasoningEffort::Medium => "medium",
                ReasoningEffort::High => "high",
            });
        }
        if let ResponseFormat::JsonSchema { schema } = &options.response_format {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema },
            });
        }
        if let Some(tools) = &request.context.tools {
            let tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
            if let Some(choice) = &options.tool_choice {
                body["tool_choice"] = Self::convert_tool_choice(choice);
            }
        }
        if request.stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
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
        let url = reqwest::Url::parse(&format!("{}/chat/completions", base.trim_end_matches('/')))
            .map_err(|e| LlmError::ConfigurationError(format!("invalid base URL: {e}")))?;

        let mut out = ProviderRequest::post(url, serde_json::to_vec(&body)?);
        out.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", credentials.bearer()?);
        out.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|_| LlmError::ConfigurationError("unencodable API key".to_string()))?,
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

        let wire: WireResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::api(status, format!("unparseable response body: {e}"), Some(text.into_owned())))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::api(status, "response carried no choices", None))?;

        let mut parts = Vec::new();
        if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
            parts.push(ContentPart::text(content));
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = call
                .function
                .arguments
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(serde_json::Value::Null);
            parts.push(ContentPart::tool_call(call.id, call.function.name, arguments));
        }
        let message = if parts.is_empty() {
            Message::assistant("")
        } else {
            Message::assistant_with_parts(parts)
        };

        // Reasoning text is not part of the visible message; keep it in the
        // raw metadata for debugging.
        let mut raw = serde_json::Map::new();
        if let Some(reasoning) = choice.message.reasoning_content {
            raw.insert(
                "reasoning_content".to_string(),
                serde_json::Value::String(reasoning),
            );
        }

        Ok(ChatResponse {
            context: request.context.appending(message.clone()),
            message,
            usage: wire.usage.map(WireUsage::into_usage).unwrap_or_default(),
            finish_reason: choice.finish_reason.as_deref().map(parse_finish_reason),
            metadata: ResponseMetadata {
                id: wire.id,
                model: wire.model,
                created: None,
                raw,
            },
        })
    }

    fn event_decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(OpenAiEventDecoder::default())
    }
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    choices: Option<Vec<WireStreamChoice>>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: Option<WireStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<WireStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireStreamToolCall {
    index: Option<u32>,
    id: Option<String>,
    function: Option<WireStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct WireStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// SSE event decoder.
///
/// Tool-call deltas after the first omit the call id and reference it only by
/// index, so the id seen on the opening delta is carried per index.
#[derive(Debug, Default)]
pub struct OpenAiEventDecoder {
    tool_call_ids: HashMap<u32, String>,
}

impl EventDecoder for OpenAiEventDecoder {
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
        for choice in event.choices.unwrap_or_default() {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    chunks.push(StreamChunk::Content { delta: content });
                }
                let thinking = delta.reasoning_content.or(delta.reasoning);
                if let Some(thinking) = thinking.filter(|t| !t.is_empty()) {
                    chunks.push(StreamChunk::Thinking { delta: thinking });
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    let index = call.index.unwrap_or(0);
                    let id = match call.id {
                        Some(id) => {
                            self.tool_call_ids.insert(index, id.clone());
                            id
                        }
                        None => self
                            .tool_call_ids
                            .get(&index)
                            .cloned()
                            .unwrap_or_else(|| format!("call_{index}")),
                    };
                    let (name, arguments_delta) = match call.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    chunks.push(StreamChunk::ToolCall {
                        id,
                        name,
                        arguments_delta,
                    });
                }
            }
            if let Some(reason) = choice.finish_reason {
                chunks.push(StreamChunk::Meta {
                    usage: None,
                    finish_reason: Some(parse_finish_reason(&reason)),
                });
            }
        }
        if let Some(usage) = event.usage {
            chunks.push(StreamChunk::Meta {
                usage: Some(usage.into_usage()),
                finish_reason: None,
            });
        }
        Ok(chunks)
    }
}
