//! Model identity, capabilities, and limits as resolved from the catalog.

use serde::{Deserialize, Serialize};

/// Identifies a backend protocol family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Bedrock,
}

impl ProviderId {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Bedrock => "bedrock",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags consulted by the option translator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Model emits reasoning/thinking content and accepts a reasoning-effort
    /// parameter.
    pub reasoning: bool,
    pub tool_calling: bool,
    /// Tool calls may be delivered incrementally on a stream.
    pub tool_call_streaming: bool,
    /// Model accepts a JSON-Schema response format natively.
    pub native_json_schema: bool,
    pub streaming_text: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            reasoning: false,
            tool_calling: true,
            tool_call_streaming: true,
            native_json_schema: false,
            streaming_text: true,
        }
    }
}

/// Context and output token limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelLimits {
    pub context_window: u64,
    pub max_output: u64,
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            max_output: 4_096,
        }
    }
}

/// Per-million-token prices in USD, for caller-side accounting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelCost {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    #[serde(default)]
    pub cached_input_per_mtok: f64,
}

/// A fully resolved model: provider, identifier, capabilities, limits, cost,
/// and the environment variable holding its credential.
///
/// Resolved once per call from the catalog and immutable for the lifetime of
/// that call, even if the catalog is refreshed concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub provider: ProviderId,
    pub id: String,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default)]
    pub limits: ModelLimits,
    #[serde(default)]
    pub cost: ModelCost,
    /// Environment variable consulted when no explicit credential is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    /// Base URL override; adapters supply their default endpoint otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ModelInfo {
    pub fn new(provider: ProviderId, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
            capabilities: ModelCapabilities::default(),
            limits: ModelLimits::default(),
            cost: ModelCost::default(),
            credential_env: None,
            base_url: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_limits(mut self, limits: ModelLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cost(mut self, cost: ModelCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env = Some(var.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}
