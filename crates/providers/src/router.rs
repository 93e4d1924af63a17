//! Provider router: builds one client per configured AI provider.

use crate::openai_compat::OpenAiCompatProvider;
use paperflow_config::AppConfig;
use paperflow_core::provider::{AiProvider, Provider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routes completion requests to the client for a provider.
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<AiProvider, Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous client for it.
    pub fn register(&mut self, provider: AiProvider, client: Arc<dyn Provider>) {
        self.providers.insert(provider, client);
    }

    pub fn get(&self, provider: AiProvider) -> Option<Arc<dyn Provider>> {
        self.providers.get(&provider).cloned()
    }

    pub fn contains(&self, provider: AiProvider) -> bool {
        self.providers.contains_key(&provider)
    }

    /// Registered providers in a stable order.
    pub fn list(&self) -> Vec<AiProvider> {
        let mut list: Vec<AiProvider> = self.providers.keys().copied().collect();
        list.sort();
        list
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build clients for every provider that has an API key.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new();

    for provider in AiProvider::ALL {
        let Some(provider_config) = config.provider(provider) else {
            continue;
        };
        let Some(api_key) = provider_config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            debug!(provider = %provider, "No API key, skipping provider");
            continue;
        };

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        router.register(
            provider,
            Arc::new(OpenAiCompatProvider::new(provider.as_str(), base_url, api_key)),
        );
    }

    router
}

/// Default endpoint for a provider.
pub fn default_base_url(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::OpenAi => "https://api.openai.com/v1",
        AiProvider::Anthropic => "https://api.anthropic.com/v1",
        AiProvider::Perplexity => "https://api.perplexity.ai",
    }
}

/// Model used when neither the agent route nor the provider names one.
pub fn default_model(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::OpenAi => "gpt-4o-mini",
        AiProvider::Anthropic => "claude-3-5-haiku-latest",
        AiProvider::Perplexity => "sonar",
    }
}
