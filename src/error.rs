//! Error types for the unified client.
//!
//! Every failure that crosses the public boundary is one of the variants
//! below; adapters and pipelines never panic or raise across it. Retry
//! classification builds on [`LlmError::is_retryable`]: transport-level
//! failures are the only kind retried by default, HTTP-level errors are
//! surfaced as-is (see the `retry` module).

use serde::{Deserialize, Serialize};

/// Unified error type for all client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// Canonical options could not be translated into the provider schema.
    /// Local, surfaced immediately, never retried.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Connection-level failure: closed/refused connection or a timeout
    /// anywhere in the transport, including during body/stream reads.
    #[error("Transport error: {message}")]
    TransportError {
        message: String,
        /// Whether this was a timeout rather than a socket failure.
        timeout: bool,
    },

    /// Non-2xx HTTP response. Carries the status and the raw body for
    /// diagnostics. Not retried by default; providers opt in via
    /// `ProviderAdapter::classify_retry`.
    #[error("API error {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        /// Raw response body, when one was readable.
        body: Option<String>,
    },

    /// Malformed bytes on a streaming connection. Terminal for that stream.
    #[error("Framing error: {0}")]
    FramingError(String),

    /// A signing precondition failed (missing secret, unencodable header).
    /// Local and fatal.
    #[error("Signing error: {0}")]
    SigningError(String),

    /// The upstream rejected a request whose signature aged out of its
    /// validity window while in flight. Distinct from `ApiError` so callers
    /// can re-sign and resubmit instead of treating it as a hard failure.
    #[error("Signature expired: {0}")]
    SignatureExpired(String),

    /// Client or credential configuration problem.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The catalog has no entry for the requested model.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The allow/deny gate rejected the requested model.
    #[error("Model not allowed: {0}")]
    ModelNotAllowed(String),

    /// The operation is not supported by this provider or model.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The chunk stream was abandoned before the provider finished.
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Invariant violation inside the client itself.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LlmError {
    /// Build a transport error from any displayable cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
            timeout: false,
        }
    }

    /// Build a transport timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
            timeout: true,
        }
    }

    /// Build an API error carrying the raw body.
    pub fn api(status: u16, message: impl Into<String>, body: Option<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
            body,
        }
    }

    /// Whether the default retry classification considers this transient.
    ///
    /// Only transport-level failures qualify. HTTP error bodies usually carry
    /// actionable, non-transient information (bad request, auth failure, rate
    /// limit); providers that want 429/5xx retries opt in per adapter.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError { .. })
    }

    /// HTTP status code, for API errors.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        // Everything reqwest raises is connection-level from this crate's
        // perspective: connect/read failures, closed sockets, timeouts.
        // Non-2xx statuses never pass through here — adapters classify them.
        Self::TransportError {
            message: err.to_string(),
            timeout: err.is_timeout(),
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::EncodingError(err.to_string())
    }
}

/// Warning emitted by option translation when a parameter is dropped or
/// adjusted rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Warning {
    /// A requested feature or parameter is unsupported by the model and was
    /// removed from the request.
    Unsupported {
        feature: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    /// Anything else worth telling the caller about.
    Other { message: String },
}

impl Warning {
    pub fn unsupported(feature: impl Into<String>, details: Option<&str>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            details: details.map(str::to_string),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}
