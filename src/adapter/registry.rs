//! Provider adapter registry.
//!
//! Maps a [`ProviderId`] to its adapter implementation. Populated explicitly
//! at client construction and looked up by key — no process-wide cache, no
//! runtime reflection. The registry is immutable once the client is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LlmError;
use crate::types::ProviderId;

use super::ProviderAdapter;

#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every provider enabled by crate
    /// features.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "openai")]
        {
            registry.register(Arc::new(crate::providers::openai::OpenAiAdapter::new()));
        }
        #[cfg(feature = "anthropic")]
        {
            registry.register(Arc::new(
                crate::providers::anthropic::AnthropicAdapter::new(),
            ));
        }
        #[cfg(feature = "bedrock")]
        {
            registry.register(Arc::new(crate::providers::bedrock::BedrockAdapter::new()));
        }
        registry
    }

    /// Registers (or replaces) the adapter for its provider id.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider_id(), adapter);
    }

    pub fn get(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>, LlmError> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            LlmError::ConfigurationError(format!("no adapter registered for provider {provider}"))
        })
    }

    pub fn is_registered(&self, provider: ProviderId) -> bool {
        self.adapters.contains_key(&provider)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
