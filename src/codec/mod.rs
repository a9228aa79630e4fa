//! Frame codecs for streaming wire protocols.
//!
//! A codec turns an arbitrary sequence of byte chunks into discrete frames.
//! Both codecs share one contract: [`FrameCodec::feed`] appends new bytes to
//! an internal buffer and returns every frame that became complete, keeping
//! the unconsumed remainder buffered for the next read. A codec never needs
//! the whole stream in memory and never drops bytes silently — malformed
//! input fails the stream with [`LlmError::FramingError`].

use crate::error::LlmError;

pub mod eventstream;
pub mod sse;

pub use eventstream::EventStreamCodec;
pub use sse::SseCodec;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A regular event. `name` is the SSE `event:` field or the binary
    /// `:event-type` header; payload is the record data.
    Event {
        name: Option<String>,
        payload: Vec<u8>,
    },
    /// A provider-declared failure delivered in-band on the stream.
    Exception { kind: String, payload: Vec<u8> },
}

impl Frame {
    pub fn event(name: Option<&str>, payload: impl Into<Vec<u8>>) -> Self {
        Self::Event {
            name: name.map(str::to_string),
            payload: payload.into(),
        }
    }

    /// Payload bytes regardless of variant.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Event { payload, .. } | Self::Exception { payload, .. } => payload,
        }
    }
}

/// Incremental frame decoder.
pub trait FrameCodec: Send {
    /// Feed newly received bytes; returns all frames completed by them.
    ///
    /// After an error the codec is poisoned and refuses further input.
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, LlmError>;

    /// Whether the protocol-level terminator has been seen (e.g. the SSE
    /// `[DONE]` sentinel). Frames are never emitted after termination.
    fn is_terminated(&self) -> bool;
}
