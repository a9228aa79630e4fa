//! Streaming chunk types and the stream handle returned to callers.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::types::{FinishReason, Usage};

mod pipeline;

pub(crate) use pipeline::run_stream;

/// One normalized streaming event.
///
/// Chunks arrive in the exact order the frame codec emitted them; consumers
/// must not assume any fixed chunk-to-token ratio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental text content.
    Content { delta: String },
    /// Incremental reasoning/thinking content.
    Thinking { delta: String },
    /// Partial or complete function call. `name` is present on the first
    /// chunk of a call; later chunks extend `arguments_delta`.
    ToolCall {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },
    /// Usage / finish-reason notification.
    Meta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
}

/// Lazy, single-pass, forward-only chunk sequence. Not restartable;
/// re-subscribing requires a new call.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// Final metadata for a completed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMeta {
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Resolves once the stream closes — normally, by transport close, or by
/// error. Independent of chunk consumption: await it concurrently with (or
/// instead of) draining the chunk stream.
pub struct MetadataHandle {
    receiver: tokio::sync::oneshot::Receiver<Result<StreamMeta, LlmError>>,
}

impl MetadataHandle {
    pub(crate) fn new(
        receiver: tokio::sync::oneshot::Receiver<Result<StreamMeta, LlmError>>,
    ) -> Self {
        Self { receiver }
    }

    /// Waits for the stream to close and returns its final metadata.
    ///
    /// If the chunk stream was dropped before the provider finished, this
    /// resolves to [`LlmError::StreamClosed`].
    pub async fn resolve(self) -> Result<StreamMeta, LlmError> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(LlmError::StreamClosed(
                "stream was dropped before completion".to_string(),
            )),
        }
    }
}

/// The two outputs of a streaming call.
pub struct StreamHandle {
    /// Pull-based chunk sequence; dropping it closes the transport.
    pub chunks: ChatStream,
    /// Final usage and finish reason, resolvable concurrently.
    pub metadata: MetadataHandle,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("chunks", &"<stream>")
            .field("metadata", &"<metadata>")
            .finish()
    }
}
