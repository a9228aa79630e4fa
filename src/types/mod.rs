//! Canonical data model shared by every provider adapter.
//!
//! Adapters translate between these types and their wire formats; nothing in
//! this module performs I/O.

pub mod chat;
pub mod model;
pub mod options;
pub mod response;

pub use chat::{ChatContext, ContentPart, Message, MessageRole, Tool, ToolChoice};
pub use model::{ModelCapabilities, ModelCost, ModelInfo, ModelLimits, ProviderId};
pub use options::GenerationOptions;
pub use response::{ChatResponse, FinishReason, ResponseMetadata, Usage};
