//! Messages, content parts, and the per-call conversation context.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a message's content.
///
/// Only assistant messages carry `ToolCall` parts; only tool-role messages
/// carry `ToolResult` parts, whose `tool_call_id` correlates to a prior call.
/// [`ChatContext::push`] enforces both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Image reference, either a URL or base64-encoded data with a MIME type.
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            url: Some(url.into()),
            data: None,
            media_type: None,
        }
    }

    pub fn image_base64(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::Image {
            url: None,
            data: Some(data.into()),
            media_type: Some(media_type.into()),
        }
    }

    /// Image from raw bytes, base64-encoded on the way in.
    pub fn image_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        use base64::Engine;
        Self::image_base64(
            base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type,
        )
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub const fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    pub const fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

/// A single message: role plus an ordered list of content parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// Creates a user message from plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Creates a system message from plain text.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Creates an assistant message from plain text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Creates an assistant message from explicit content parts.
    pub fn assistant_with_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts,
        }
    }

    /// Creates a tool-result message correlating to a prior tool call.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            parts: vec![ContentPart::tool_result(tool_call_id, tool_name, output)],
        }
    }

    /// Appends an additional content part.
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Concatenated text content of the message.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// All tool-call parts in this message.
    pub fn tool_calls(&self) -> Vec<&ContentPart> {
        self.parts.iter().filter(|p| p.is_tool_call()).collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(ContentPart::is_tool_call)
    }
}

/// Tool (function) definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// How the model should choose among offered tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
    /// Force a specific tool by name.
    Tool {
        name: String,
    },
}

/// Ordered conversation context plus the tools offered for this call.
///
/// Built once per call and immutable afterwards; a [`super::ChatResponse`]
/// carries a new context (original plus the appended assistant turn).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChatContext {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from messages, validating role/part pairing.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, LlmError> {
        let mut ctx = Self::new();
        for message in messages {
            ctx.push(message)?;
        }
        Ok(ctx)
    }

    /// Appends a message, enforcing the role/content invariants.
    pub fn push(&mut self, message: Message) -> Result<(), LlmError> {
        for part in &message.parts {
            match part {
                ContentPart::ToolCall { .. } if message.role != MessageRole::Assistant => {
                    return Err(LlmError::EncodingError(
                        "tool calls are only valid in assistant messages".to_string(),
                    ));
                }
                ContentPart::ToolResult { .. } if message.role != MessageRole::Tool => {
                    return Err(LlmError::EncodingError(
                        "tool results are only valid in tool messages".to_string(),
                    ));
                }
                _ => {}
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Builder-style `push` for infallible chains in tests and examples.
    pub fn with_message(mut self, message: Message) -> Result<Self, LlmError> {
        self.push(message)?;
        Ok(self)
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Leading system messages, in order. Backends vary in where these go;
    /// adapters hoist them into their native position.
    pub fn leading_system_text(&self) -> Vec<String> {
        self.messages
            .iter()
            .take_while(|m| m.role == MessageRole::System)
            .map(Message::text)
            .collect()
    }

    /// Messages after the leading system block.
    pub fn conversation(&self) -> &[Message] {
        let skip = self
            .messages
            .iter()
            .take_while(|m| m.role == MessageRole::System)
            .count();
        &self.messages[skip..]
    }

    /// A new context with the assistant turn appended.
    pub fn appending(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.messages.push(message);
        next
    }
}
