//! The contract every backend adapter implements.
//!
//! An adapter owns its provider's wire format: how a canonical request is
//! encoded, how the transport request is built and authenticated, how
//! responses and stream events decode back into canonical types, and how its
//! failures classify for retry. Adapters perform no I/O themselves — the
//! pipelines in `client` drive the transport.

use reqwest::header::HeaderMap;

use crate::auth::Credentials;
use crate::codec::Frame;
use crate::error::LlmError;
use crate::retry::{RetryDecision, RetryPolicy, default_classification};
use crate::streaming::StreamChunk;
use crate::types::{ChatContext, GenerationOptions, ModelInfo, ProviderId};

pub mod registry;

pub use registry::AdapterRegistry;

/// Canonical request handed to an adapter: the resolved model snapshot, the
/// immutable context, translated options, and the streaming flag.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ModelInfo,
    pub context: ChatContext,
    pub options: GenerationOptions,
    pub stream: bool,
}

/// A fully built transport request, ready for the HTTP layer.
#[derive(Debug)]
pub struct ProviderRequest {
    pub method: reqwest::Method,
    pub url: reqwest::Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ProviderRequest {
    pub fn post(url: reqwest::Url, body: Vec<u8>) -> Self {
        Self {
            method: reqwest::Method::POST,
            url,
            headers: HeaderMap::new(),
            body,
        }
    }
}

/// Which frame codec the streaming pipeline attaches for this provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProtocol {
    Sse,
    AwsEventStream,
}

/// Per-stream event decoder.
///
/// This is the `decode_event(frame, state) -> (chunks, state)` shape folded
/// into a stateful object: a fresh decoder is created for every stream, and
/// providers that accumulate data across frames (a multi-part tool call, a
/// metadata event arriving before its finish reason) keep that state in
/// their fields. Stateless providers simply hold none.
pub trait EventDecoder: Send {
    /// Decodes one frame into zero or more chunks, in emission order.
    fn decode_event(&mut self, frame: &Frame) -> Result<Vec<StreamChunk>, LlmError>;
}

/// Contract implemented by each backend.
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Pure translation of the canonical request into the provider's JSON
    /// body. Must not perform I/O; fails with `EncodingError` when the
    /// options cannot be expressed in the provider schema.
    fn encode(&self, request: &ChatRequest) -> Result<serde_json::Value, LlmError>;

    /// Attaches URL, headers, auth, and signing to an encoded body.
    fn build_request(
        &self,
        request: &ChatRequest,
        body: serde_json::Value,
        credentials: &Credentials,
    ) -> Result<ProviderRequest, LlmError>;

    /// On HTTP success, transforms the provider JSON into a canonical
    /// response; on failure, classifies the status and raw body into a
    /// structured error.
    fn decode(
        &self,
        request: &ChatRequest,
        status: u16,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<crate::types::ChatResponse, LlmError>;

    /// Per-attempt retry classification. The default retries transport
    /// failures only; adapters with known-flaky transient statuses override.
    fn classify_retry(
        &self,
        error: &LlmError,
        attempt: u32,
        policy: &RetryPolicy,
    ) -> RetryDecision {
        default_classification(error, attempt, policy)
    }

    /// Frame codec for this provider's streaming responses.
    fn frame_protocol(&self) -> FrameProtocol {
        FrameProtocol::Sse
    }

    /// Builds the duplex transport request for a streaming call.
    ///
    /// The default re-encodes with the stream flag set and builds as usual;
    /// adapters whose streaming endpoint differs (separate URL, extra
    /// headers) override this.
    fn attach_stream(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> Result<ProviderRequest, LlmError> {
        let mut request = request.clone();
        request.stream = true;
        let body = self.encode(&request)?;
        self.build_request(&request, body, credentials)
    }

    /// Fresh event decoder for one stream.
    fn event_decoder(&self) -> Box<dyn EventDecoder>;
}
