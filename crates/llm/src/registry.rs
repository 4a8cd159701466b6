//! Provider registry keyed by provider name.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{LlmError, LlmResult};

use super::provider::AIProvider;

/// Holds the providers available to a process.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<&'static str, Arc<dyn AIProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any with the same name.
    pub fn register(&self, provider: Arc<dyn AIProvider>) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(provider = provider.name(), "Registered LLM provider");
        providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AIProvider>> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        providers.get(name).cloned()
    }

    /// First configured provider that accepts `model`.
    pub fn for_model(&self, model: &str) -> LlmResult<Arc<dyn AIProvider>> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        providers
            .values()
            .find(|p| p.is_configured() && p.supports_model(model))
            .cloned()
            .ok_or_else(|| LlmError::UnknownModel(model.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::AnthropicProvider;

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("anthropic").is_none());
    }

    #[test]
    fn test_lookup_by_name_and_model() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(AnthropicProvider::new("key").unwrap()));

        assert!(registry.get("anthropic").is_some());
        assert_eq!(registry.for_model("sonnet").unwrap().name(), "anthropic");
        assert!(matches!(
            registry.for_model("gpt-4"),
            Err(LlmError::UnknownModel(_))
        ));
    }
}
