//! Interface to the external model catalog.
//!
//! The catalog itself (which models exist, token limits, cost tables,
//! credential variable names) lives outside this crate; the client consumes
//! it through [`ModelCatalog`]. A call resolves its [`ModelInfo`] once and
//! holds that snapshot for its whole lifetime — there is no ambient global.

use std::collections::{HashMap, HashSet};

use crate::types::{ModelInfo, ProviderId};

/// Read-only view of the model catalog.
pub trait ModelCatalog: Send + Sync {
    /// Look up a model's capabilities, limits, and cost table.
    fn resolve(&self, provider: ProviderId, model_id: &str) -> Option<ModelInfo>;

    /// Allow/deny gate, evaluated before dispatch.
    fn is_allowed(&self, _provider: ProviderId, _model_id: &str) -> bool {
        true
    }
}

/// In-memory catalog built from explicit entries.
///
/// Useful for embedding a fixed model table and for tests; production callers
/// typically implement [`ModelCatalog`] over their own synced metadata.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    models: HashMap<(ProviderId, String), ModelInfo>,
    denied: HashSet<(ProviderId, String)>,
    /// When non-empty, only listed models pass the gate.
    allowed: HashSet<(ProviderId, String)>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: ModelInfo) -> Self {
        self.models
            .insert((model.provider, model.id.clone()), model);
        self
    }

    pub fn deny(mut self, provider: ProviderId, model_id: impl Into<String>) -> Self {
        self.denied.insert((provider, model_id.into()));
        self
    }

    pub fn allow_only(mut self, provider: ProviderId, model_id: impl Into<String>) -> Self {
        self.allowed.insert((provider, model_id.into()));
        self
    }
}

impl ModelCatalog for StaticCatalog {
    fn resolve(&self, provider: ProviderId, model_id: &str) -> Option<ModelInfo> {
        self.models
            .get(&(provider, model_id.to_string()))
            .cloned()
    }

    fn is_allowed(&self, provider: ProviderId, model_id: &str) -> bool {
        let key = (provider, model_id.to_string());
        if self.denied.contains(&key) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(&key)
    }
}
