use std::sync::Arc;

use chatgate_provider_core::{CredentialStore, ProviderRegistry};
use tracing::info;

use crate::provider::{ClaudeProvider, DeepSeekProvider, ProviderSettings, QwenProvider};

/// Upstream overrides for the shipped providers.
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    /// Outbound proxy shared by every provider.
    pub proxy: Option<String>,
    pub deepseek_base_url: Option<String>,
    pub qwen_base_url: Option<String>,
    pub claude_base_url: Option<String>,
}

impl RegistrySettings {
    fn provider(&self, base_url: &Option<String>) -> ProviderSettings {
        ProviderSettings {
            base_url: base_url.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

/// Registry with deepseek, qwen and claude, in that resolution order, all
/// persisting credentials to `store`.
pub fn default_registry(
    store: Arc<dyn CredentialStore>,
    settings: &RegistrySettings,
) -> ProviderRegistry {
    let registry = ProviderRegistry::new()
        .with(Arc::new(DeepSeekProvider::new(
            store.clone(),
            settings.provider(&settings.deepseek_base_url),
        )))
        .with(Arc::new(QwenProvider::new(
            store.clone(),
            settings.provider(&settings.qwen_base_url),
        )))
        .with(Arc::new(ClaudeProvider::new(
            store,
            settings.provider(&settings.claude_base_url),
        )));
    info!(
        providers = registry.providers().len(),
        models = registry.models().len(),
        "provider registry ready"
    );
    registry
}
