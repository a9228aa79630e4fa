//! omnillm
//!
//! A provider-agnostic LLM client: one canonical request/response/streaming
//! model in front of chat-completion JSON APIs, SSE streams, and AWS's
//! binary event-stream protocol.
//!
//! # Example
//!
//! ```rust,ignore
//! use omnillm::prelude::*;
//!
//! let client = Client::builder()
//!     .catalog(catalog)
//!     .credentials(ProviderId::OpenAi, Credentials::api_key(key))
//!     .build()?;
//!
//! let context = ChatContext::from_messages(vec![Message::user("Hello!")])?;
//! let response = client
//!     .generate(ProviderId::OpenAi, "gpt-4o-mini", context, GenerationOptions::new())
//!     .await?;
//! println!("{}", response.text());
//! ```
#![deny(unsafe_code)]

pub mod adapter;
pub mod auth;
pub mod catalog;
pub mod client;
pub mod codec;
pub mod error;
pub mod params;
pub mod providers;
pub mod retry;
pub mod signer;
pub mod streaming;
pub mod types;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use error::{LlmError, Warning};

/// Convenience re-exports for the common surface.
pub mod prelude {
    pub use crate::adapter::{AdapterRegistry, ProviderAdapter};
    pub use crate::auth::{AwsCredentials, Credentials};
    pub use crate::catalog::{ModelCatalog, StaticCatalog};
    pub use crate::client::{Client, ClientBuilder, ClientConfig};
    pub use crate::error::{LlmError, Warning};
    pub use crate::retry::{RetryDecision, RetryPolicy};
    pub use crate::streaming::{MetadataHandle, StreamChunk, StreamHandle, StreamMeta};
    pub use crate::types::{
        ChatContext, ChatResponse, ContentPart, FinishReason, GenerationOptions, Message,
        MessageRole, ModelCapabilities, ModelCost, ModelInfo, ModelLimits, ProviderId, Tool,
        ToolChoice, Usage,
    };
}
