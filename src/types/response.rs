//! Response types produced by the request pipelines.

use serde::{Deserialize, Serialize};

use super::chat::{ChatContext, Message};

/// Token usage counters.
///
/// Backends that omit usage report zeros rather than an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
}

impl Usage {
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Merges a later usage update. Providers report cumulative snapshots,
    /// so each counter keeps its largest observed value.
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
        self.reasoning_tokens = self.reasoning_tokens.max(other.reasoning_tokens);
        self.cached_tokens = self.cached_tokens.max(other.cached_tokens);
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other(String),
}

/// Provider-reported response identity, kept for debugging.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    /// Raw provider-specific fields that don't map onto the canonical model.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Terminal result of a chat call.
///
/// Created exclusively by the pipeline that decoded it; never mutated after
/// construction except by building the next turn's context from
/// [`ChatResponse::context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The new assistant message.
    pub message: Message,
    /// Original context plus the appended assistant turn.
    pub context: ChatContext,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    /// Concatenated text of the assistant message.
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }
}
