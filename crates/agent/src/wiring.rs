//! Startup wiring: which implementation serves each agent type.

use crate::cloud::CloudAgent;
use crate::local::LocalAgent;
use paperflow_config::AppConfig;
use paperflow_core::{AgentRegistry, AgentType};
use paperflow_providers::{ProviderRouter, RateLimiter, default_model};
use paperflow_resilience::{FallbackRegistry, RetryPolicy};
use std::sync::Arc;
use tracing::{info, warn};

/// Local fallbacks for every substitutable agent type.
pub fn local_fallbacks() -> FallbackRegistry {
    let mut registry = FallbackRegistry::new();
    for agent_type in LocalAgent::supported() {
        if let Some(agent) = LocalAgent::new(agent_type) {
            registry.register(Arc::new(agent));
        }
    }
    registry
}

/// Build the agent registry.
///
/// Agent types whose provider has a client get a [`CloudAgent`]; the rest
/// (or all of them when `offline`) get a [`LocalAgent`] where one exists.
/// Agent types with neither are left unregistered.
pub fn build_registry(
    config: &AppConfig,
    router: &ProviderRouter,
    limiter: Arc<RateLimiter>,
    retry: Arc<RetryPolicy>,
    offline: bool,
) -> AgentRegistry {
    let mut registry = AgentRegistry::new();

    for agent_type in AgentType::ALL {
        let route = config.route_for(agent_type);
        let client = if offline { None } else { router.get(route.provider) };

        if let Some(client) = client {
            let model = route
                .model
                .clone()
                .or_else(|| config.provider(route.provider).and_then(|p| p.default_model.clone()))
                .unwrap_or_else(|| default_model(route.provider).to_string());
            info!(
                agent_type = %agent_type,
                provider = %route.provider,
                model = %model,
                "Registering cloud agent"
            );
            registry.register(Arc::new(CloudAgent::new(
                agent_type,
                route.provider,
                model,
                client,
                limiter.clone(),
                retry.clone(),
            )));
        } else if let Some(local) = LocalAgent::new(agent_type) {
            info!(agent_type = %agent_type, "Registering local agent");
            registry.register(Arc::new(local));
        } else {
            warn!(
                agent_type = %agent_type,
                provider = %route.provider,
                "No provider configured and no local agent, stage unavailable"
            );
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperflow_config::ProviderConfig;
    use paperflow_resilience::CircuitBreaker;
    use paperflow_telemetry::RetryMetrics;

    fn parts(config: &AppConfig) -> (Arc<RateLimiter>, Arc<RetryPolicy>) {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let retry = Arc::new(RetryPolicy::new(
            config.retry.clone(),
            Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
            Arc::new(local_fallbacks()),
            Arc::new(RetryMetrics::new()),
        ));
        (limiter, retry)
    }

    #[test]
    fn fallbacks_cover_substitutable_types() {
        let fallbacks = local_fallbacks();
        assert_eq!(fallbacks.len(), 6);
        assert!(!fallbacks.has(AgentType::RelatedPaperDiscovery));
        assert!(!fallbacks.has(AgentType::PerplexityResearcher));
    }

    #[test]
    fn offline_registry_uses_local_agents() {
        let config = AppConfig::default();
        let (limiter, retry) = parts(&config);
        let registry = build_registry(&config, &ProviderRouter::new(), limiter, retry, true);

        assert_eq!(registry.len(), 6);
        let summarizer = registry.get(AgentType::ContentSummarizer).unwrap();
        assert_eq!(summarizer.name(), "local-content-summarizer");
        assert!(!registry.contains(AgentType::RelatedPaperDiscovery));
    }

    #[test]
    fn configured_provider_gets_cloud_agents() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "perplexity".into(),
            ProviderConfig {
                api_key: Some("pplx-test".into()),
                api_url: None,
                default_model: None,
            },
        );
        let router = paperflow_providers::build_from_config(&config);
        let (limiter, retry) = parts(&config);
        let registry = build_registry(&config, &router, limiter, retry, false);

        assert_eq!(registry.len(), 8);
        let discovery = registry.get(AgentType::RelatedPaperDiscovery).unwrap();
        assert_eq!(discovery.name(), "perplexity-related-paper-discovery");
        let summarizer = registry.get(AgentType::ContentSummarizer).unwrap();
        assert_eq!(summarizer.name(), "local-content-summarizer");
    }
}
