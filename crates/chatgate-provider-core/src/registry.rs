use std::sync::Arc;

use tracing::warn;

use crate::error::ProviderError;
use crate::provider::{ModelInfo, Provider};

/// Providers in registration order; model resolution is first match wins.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing any earlier one with the same id.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|existing| existing.id() == provider.id())
        {
            warn!(provider = %provider.id(), "replacing registered provider");
            *slot = provider;
            return;
        }
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn resolve(&self, model: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .iter()
            .find(|provider| provider.matches_model(model))
            .cloned()
            .ok_or_else(|| ProviderError::NoProviderForModel(model.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .cloned()
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.providers
            .iter()
            .flat_map(|provider| provider.models())
            .collect()
    }

    pub fn reset_sessions(&self) {
        for provider in &self.providers {
            provider.reset_sessions();
        }
    }
}
