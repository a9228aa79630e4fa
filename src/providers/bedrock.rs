//! Amazon Bedrock Converse adapter.
//!
//! Requests are SigV4-signed (service `bedrock`) and streaming responses use
//! the binary event-stream framing decoded by `codec::eventstream`. Bedrock
//! throttles with retryable statuses, so this adapter opts in to retrying
//! 429/503 on top of the default transport-only classification.

use std::collections::HashMap;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::adapter::{ChatRequest, EventDecoder, FrameProtocol, ProviderAdapter, ProviderRequest};
use crate::auth::Credentials;
use crate::codec::Frame;
use crate::error::LlmError;
use crate::retry::{RetryDecision, RetryPolicy, default_classification};
use crate::signer::{self, RequestToSign};
use crate::streaming::StreamChunk;
use crate::types::{
    ChatResponse, ContentPart, FinishReason, Message, MessageRole, ProviderId, ResponseMetadata,
    ToolChoice, Usage,
};

const SERVICE: &str = "bedrock";

/// Adapter for the Bedrock Converse protocol.
#[derive(Debug, Default, Clone)]
pub struct BedrockAdapter;

impl BedrockAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert_message(message: &Message) -> Result<Option<serde_json::Value>, LlmError> {
        let mut blocks = Vec::new();
        for part in &message.parts {
            match part {
                ContentPart::Text { text } => {
                    blocks.push(serde_json::json!({ "text": text }));
                }
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    blocks.push(serde_json::json!({
                        "toolUse": {
                            "toolUseId": id,
                            "name": name,
                            "input": arguments,
                        },
                    }));
                }
                ContentPart::ToolResult {
                    tool_call_id,
                    output,
                    is_error,
                    ..
                } => {
                    let mut block = serde_json::json!({
                        "toolResult": {
                            "toolUseId": tool_call_id,
                            "content": [{ "text": output }],
                        },
                    });
                    if *is_error {
                        block["toolResult"]["status"] = serde_json::json!("error");
                    }
                    blocks.push(block);
                }
                ContentPart::Image { .. } => {
                    return Err(LlmError::UnsupportedOperation(
                        "image content is not wired for the Bedrock adapter".to_string(),
                    ));
                }
            }
        }
        if blocks.is_empty() {
            return Ok(None);
        }

        let role = match message.role {
            MessageRole::Assistant => "assistant",
            // Tool results ride in user messages, as with Anthropic.
            MessageRole::User | MessageRole::Tool => "user",
            MessageRole::System => return Ok(None),
        };
        Ok(Some(serde_json::json!({
            "role": role,
            "content": blocks,
        })))
    }

    fn parse_stop_reason(reason: &str) -> FinishReason {
        match reason {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            "content_filtered" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    fn endpoint(request: &ChatRequest, region: &str) -> Result<reqwest::Url, LlmError> {
        let base = match &request.model.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{region}.amazonaws.com"),
        };
        let suffix = if request.stream {
            "converse-stream"
        } else {
            "converse"
        };
        let model = urlencoding::encode(&request.model.id);
        reqwest::Url::parse(&format!("{base}/model/{model}/{suffix}"))
            .map_err(|e| LlmError::ConfigurationError(format!("invalid endpoint URL: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(rename = "inputTokens")]
    input_tokens: Option<u64>,
    #[serde(rename = "outputTokens")]
    output_tokens: Option<u64>,
    #[serde(rename = "cacheReadInputTokens")]
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

impl ProviderAdapter for BedrockAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Bedrock
    }

    fn encode(&self, request: &ChatRequest) -> Result<serde_json::Value, LlmError> {
        let messages = request
            .context
            .conversation()
            .iter()
            .filter_map(|m| Self::convert_message(m).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let mut body = serde_json::json!({ "messages": messages });

        let system = request.context.leading_system_text();
        if !system.is_empty() {
            let system: Vec<serde_json::Value> = system
                .into_iter()
                .map(|text| serde_json::json!({ "text": text }))
                .collect();
            body["system"] = serde_json::Value::Array(system);
        }

        let options = &request.options;
        let mut inference = serde_json::Map::new();
        if let Some(max_tokens) = options.max_tokens {
            inference.insert("maxTokens".to_string(), serde_json::json!(max_tokens));
        }
        if let Some(temperature) = options.temperature {
            inference.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(top_p) = options.top_p {
            inference.insert("topP".to_string(), serde_json::json!(top_p));
        }
        if let Some(stop) = &options.stop {
            inference.insert("stopSequences".to_string(), serde_json::json!(stop));
        }
        if !inference.is_empty() {
            body["inferenceConfig"] = serde_json::Value::Object(inference);
        }

        if let Some(tools) = &request.context.tools {
            let specs: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "toolSpec": {
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": { "json": t.parameters },
                        },
                    })
                })
                .collect();
            let mut tool_config = serde_json::json!({ "tools": specs });
            if let Some(choice) = &options.tool_choice {
                let mapped = match choice {
                    ToolChoice::Auto => serde_json::json!({ "auto": {} }),
                    ToolChoice::Required => serde_json::json!({ "any": {} }),
                    ToolChoice::Tool { name } => {
                        serde_json::json!({ "tool": { "name": name } })
                    }
                    ToolChoice::None => serde_json::Value::Null,
                };
                if !mapped.is_null() {
                    tool_config["toolChoice"] = mapped;
                }
            }
            body["toolConfig"] = tool_config;
        }
        Ok(body)
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        body: serde_json::Value,
        credentials: &Credentials,
    ) -> Result<ProviderRequest, LlmError> {
        let aws = credentials.aws()?;
        let url = Self::endpoint(request, &aws.region)?;

        let mut out = ProviderRequest::post(url, serde_json::to_vec(&body)?);
        out.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Sign last so every header participates in the signature. The
        // pipeline rebuilds this request per attempt, keeping the signature
        // inside its validity window.
        signer::sign(
            RequestToSign {
                method: out.method.as_str(),
                url: &out.url,
                headers: &mut out.headers,
                body: &out.body,
            },
            aws,
            SERVICE,
        )?;
        Ok(out)
    }

    fn decode(
        &self,
        request: &ChatRequest,
        status: u16,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ChatResponse, LlmError> {
        let text = String::from_utf8_lossy(body);
        if !(200..300).contains(&status) {
            let error_type = headers
                .get("x-amzn-errortype")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {status}"));

            // A signature that aged out in flight is its own failure mode;
            // blind retry would just fail again with a stale clock.
            let expired = error_type.contains("InvalidSignatureException")
                || error_type.contains("ExpiredToken")
                || message.contains("Signature expired");
            if status == 403 && expired {
                return Err(LlmError::SignatureExpired(message));
            }
            return Err(LlmError::api(
                status,
                if error_type.is_empty() {
                    message
                } else {
                    format!("{error_type}: {message}")
                },
                Some(text.into_owned()),
            ));
        }

        #[derive(Debug, Deserialize)]
        struct WireResponse {
            output: WireOutput,
            #[serde(rename = "stopReason")]
            stop_reason: Option<String>,
            usage: Option<WireUsage>,
        }
        #[derive(Debug, Deserialize)]
        struct WireOutput {
            message: WireMessage,
        }
        #[derive(Debug, Deserialize)]
        struct WireMessage {
            content: Vec<serde_json::Value>,
        }

        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::api(
                status,
                format!("unparseable response body: {e}"),
                Some(text.into_owned()),
            )
        })?;

        let mut parts = Vec::new();
        for block in wire.output.message.content {
            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                parts.push(ContentPart::text(text));
            } else if let Some(tool_use) = block.get("toolUse") {
                parts.push(ContentPart::tool_call(
                    tool_use
                        .get("toolUseId")
                        .and_then(|v| v.as_str())
                        .unwrap_or(""),
                    tool_use.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                    tool_use
                        .get("input")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null),
                ));
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
            metadata: ResponseMetadata::default(),
        })
    }

    fn classify_retry(
        &self,
        error: &LlmError,
        attempt: u32,
        policy: &RetryPolicy,
    ) -> RetryDecision {
        // Throttling and brief unavailability are transient here; opt in on
        // top of the default transport-only classification.
        if let LlmError::ApiError {
            status: 429 | 503, ..
        } = error
        {
            if attempt + 1 < policy.max_attempts {
                return RetryDecision::RetryAfter((policy.delay)(attempt));
            }
        }
        default_classification(error, attempt, policy)
    }

    fn frame_protocol(&self) -> FrameProtocol {
        FrameProtocol::AwsEventStream
    }

    fn event_decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(BedrockEventDecoder::default())
    }
}

#[derive(Debug, Deserialize)]
struct WireStreamPayload {
    #[serde(rename = "contentBlockIndex")]
    content_block_index: Option<u32>,
    start: Option<serde_json::Value>,
    delta: Option<serde_json::Value>,
    #[serde(rename = "stopReason")]
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

/// Event-stream decoder for `converse-stream`.
///
/// Tool-use blocks open in `contentBlockStart` with their id and name;
/// later `contentBlockDelta` frames carry only partial input JSON plus the
/// block index, so the id is tracked per index between frames.
#[derive(Debug, Default)]
pub struct BedrockEventDecoder {
    open_tool_calls: HashMap<u32, String>,
}

impl EventDecoder for BedrockEventDecoder {
    fn decode_event(&mut self, frame: &Frame) -> Result<Vec<StreamChunk>, LlmError> {
        let (name, payload) = match frame {
            Frame::Event { name, payload } => (name.as_deref().unwrap_or(""), payload),
            Frame::Exception { kind, payload } => {
                let message = serde_json::from_slice::<serde_json::Value>(payload)
                    .ok()
                    .and_then(|v| {
                        v.get("message")
                            .and_then(|m| m.as_str())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "provider exception".to_string());
                return Err(LlmError::api(
                    0,
                    format!("{kind}: {message}"),
                    Some(String::from_utf8_lossy(payload).into_owned()),
                ));
            }
        };

        let event: WireStreamPayload = serde_json::from_slice(payload)
            .map_err(|e| LlmError::FramingError(format!("unparseable stream event: {e}")))?;

        let mut chunks = Vec::new();
        match name {
            "contentBlockStart" => {
                let index = event.content_block_index.unwrap_or(0);
                if let Some(tool_use) = event.start.as_ref().and_then(|s| s.get("toolUse")) {
                    let id = tool_use
                        .get("toolUseId")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let tool_name = tool_use
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    self.open_tool_calls.insert(index, id.clone());
                    chunks.push(StreamChunk::ToolCall {
                        id,
                        name: tool_name,
                        arguments_delta: None,
                    });
                }
            }
            "contentBlockDelta" => {
                if let Some(delta) = &event.delta {
                    if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            chunks.push(StreamChunk::Content {
                                delta: text.to_string(),
                            });
                        }
                    }
                    if let Some(reasoning) = delta
                        .pointer("/reasoningContent/text")
                        .and_then(|t| t.as_str())
                    {
                        chunks.push(StreamChunk::Thinking {
                            delta: reasoning.to_string(),
                        });
                    }
                    if let Some(partial) = delta.pointer("/toolUse/input").and_then(|t| t.as_str())
                    {
                        let index = event.content_block_index.unwrap_or(0);
                        let id = self
                            .open_tool_calls
                            .get(&index)
                            .cloned()
                            .unwrap_or_else(|| format!("tooluse_{index}"));
                        chunks.push(StreamChunk::ToolCall {
                            id,
                            name: None,
                            arguments_delta: Some(partial.to_string()),
                        });
                    }
                }
            }
            "contentBlockStop" => {
                if let Some(index) = event.content_block_index {
                    self.open_tool_calls.remove(&index);
                }
            }
            "messageStop" => {
                if let Some(reason) = event.stop_reason {
                    chunks.push(StreamChunk::Meta {
                        usage: None,
                        finish_reason: Some(BedrockAdapter::parse_stop_reason(&reason)),
                    });
                }
            }
            "metadata" => {
                if let Some(usage) = event.usage {
                    chunks.push(StreamChunk::Meta {
                        usage: Some(usage.into_usage()),
                        finish_reason: None,
                    });
                }
            }
            // messageStart carries the role only.
            _ => {}
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AwsCredentials;
    use crate::codec::eventstream::encode_event;
    use crate::codec::{EventStreamCodec, FrameCodec};
    use crate::types::{ChatContext, GenerationOptions, ModelInfo};
    use serde_json::json;

    fn request() -> ChatRequest {
        ChatRequest {
            model: ModelInfo::new(ProviderId::Bedrock, "anthropic.claude-3-haiku"),
            context: ChatContext::from_messages(vec![
                Message::system("be brief"),
                Message::user("hi"),
            ])
            .unwrap(),
            options: GenerationOptions::new().with_max_tokens(256),
            stream: false,
        }
    }

    fn credentials() -> Credentials {
        Credentials::Aws(AwsCredentials::new("AKID", "secret", "us-east-1"))
    }

    #[test]
    fn encode_builds_the_converse_shape() {
        let body = BedrockAdapter::new().encode(&request()).unwrap();
        assert_eq!(body["system"][0]["text"], "be brief");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
        assert_eq!(body["inferenceConfig"]["maxTokens"], json!(256));
    }

    #[test]
    fn build_request_signs_and_targets_the_model_endpoint() {
        let adapter = BedrockAdapter::new();
        let req = request();
        let body = adapter.encode(&req).unwrap();
        let built = adapter.build_request(&req, body, &credentials()).unwrap();

        assert!(built.url.as_str().ends_with("/model/anthropic.claude-3-haiku/converse"));
        assert!(built.url.as_str().contains("bedrock-runtime.us-east-1"));
        let auth = built.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(built.headers.contains_key("x-amz-date"));
    }

    #[test]
    fn streaming_requests_use_the_stream_endpoint() {
        let adapter = BedrockAdapter::new();
        let req = request();
        let built = adapter.attach_stream(&req, &credentials()).unwrap();
        assert!(built.url.as_str().ends_with("/converse-stream"));
    }

    #[test]
    fn api_key_credentials_are_rejected() {
        let adapter = BedrockAdapter::new();
        let req = request();
        let body = adapter.encode(&req).unwrap();
        let err = adapter
            .build_request(&req, body, &Credentials::api_key("sk"))
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));
    }

    #[test]
    fn expired_signature_is_a_distinct_error_kind() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amzn-errortype",
            HeaderValue::from_static("InvalidSignatureException"),
        );
        let err = BedrockAdapter::new()
            .decode(
                &request(),
                403,
                &headers,
                br#"{"message":"Signature expired: 20240101T000000Z is now earlier than ..."}"#,
            )
            .unwrap_err();
        assert!(matches!(err, LlmError::SignatureExpired(_)));
    }

    #[test]
    fn throttling_opts_in_to_retry() {
        let adapter = BedrockAdapter::new();
        let policy = RetryPolicy::default();
        assert!(matches!(
            adapter.classify_retry(&LlmError::api(429, "throttled", None), 0, &policy),
            RetryDecision::RetryAfter(_)
        ));
        // Other HTTP statuses keep the default no-retry behavior.
        assert_eq!(
            adapter.classify_retry(&LlmError::api(500, "internal", None), 0, &policy),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn decode_maps_the_converse_response() {
        let body = br#"{
            "output": {"message": {"role": "assistant", "content": [{"text": "hello"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 9, "outputTokens": 3}
        }"#;
        let response = BedrockAdapter::new()
            .decode(&request(), 200, &HeaderMap::new(), body)
            .unwrap();
        assert_eq!(response.text(), "hello");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.input_tokens, 9);
    }

    #[test]
    fn stream_decoder_reads_real_frames_end_to_end() {
        let wire: Vec<u8> = [
            encode_event("messageStart", br#"{"role":"assistant"}"#),
            encode_event(
                "contentBlockDelta",
                br#"{"contentBlockIndex":0,"delta":{"text":"hel"}}"#,
            ),
            encode_event(
                "contentBlockDelta",
                br#"{"contentBlockIndex":0,"delta":{"text":"lo"}}"#,
            ),
            encode_event("messageStop", br#"{"stopReason":"end_turn"}"#),
            encode_event(
                "metadata",
                br#"{"usage":{"inputTokens":4,"outputTokens":2}}"#,
            ),
        ]
        .concat();

        let mut codec = EventStreamCodec::new();
        let mut decoder = BedrockEventDecoder::default();
        let mut chunks = Vec::new();
        for frame in codec.feed(&wire).unwrap() {
            chunks.extend(decoder.decode_event(&frame).unwrap());
        }

        assert_eq!(
            chunks[0],
            StreamChunk::Content {
                delta: "hel".to_string()
            }
        );
        assert_eq!(
            chunks[1],
            StreamChunk::Content {
                delta: "lo".to_string()
            }
        );
        assert!(matches!(
            chunks[2],
            StreamChunk::Meta {
                finish_reason: Some(FinishReason::Stop),
                ..
            }
        ));
        match &chunks[3] {
            StreamChunk::Meta {
                usage: Some(usage), ..
            } => assert_eq!(usage.input_tokens, 4),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn exception_frames_become_api_errors() {
        let mut decoder = BedrockEventDecoder::default();
        let frame = Frame::Exception {
            kind: "throttlingException".to_string(),
            payload: br#"{"message":"Too many requests"}"#.to_vec(),
        };
        let err = decoder.decode_event(&frame).unwrap_err();
        match err {
            LlmError::ApiError { message, .. } => {
                assert!(message.contains("throttlingException"));
                assert!(message.contains("Too many requests"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
