use common::{ConfigError, EnvSource};
use std::sync::Arc;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ProviderSettings, RouterConfig};
use crate::cost_estimator::CostEstimator;
use crate::errors::RouterError;
use crate::providers::*;
use crate::router::Router;
use crate::types::ProviderKind;
use crate::usage_tracker::UsageTracker;

/// Builds HTTP adapters and routers from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create the adapter for one provider, resolving its API key from `secrets`.
    pub fn build_adapter(
        settings: &ProviderSettings,
        secrets: &EnvSource<'_>,
    ) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
        let api_key = || match &settings.api_key_env {
            Some(var) => secrets.require(var),
            None => Err(ConfigError::Missing(format!(
                "{}API_KEY",
                settings.kind.env_prefix()
            ))),
        };
        let endpoint = settings.endpoint.clone();
        let generation = settings.generation;

        let adapter: Arc<dyn ProviderAdapter> = match settings.kind {
            ProviderKind::OpenAI => {
                let mut provider = OpenAIProvider::new(api_key()?, endpoint, generation)?;
                if let Some(timeout) = settings.timeout() {
                    provider = provider.with_timeout(timeout)?;
                }
                Arc::new(provider)
            }
            ProviderKind::Anthropic => {
                let mut provider = AnthropicProvider::new(api_key()?, endpoint, generation)?;
                if let Some(timeout) = settings.timeout() {
                    provider = provider.with_timeout(timeout)?;
                }
                Arc::new(provider)
            }
            ProviderKind::Mistral => {
                let mut provider = MistralProvider::new(api_key()?, endpoint, generation)?;
                if let Some(timeout) = settings.timeout() {
                    provider = provider.with_timeout(timeout)?;
                }
                Arc::new(provider)
            }
            ProviderKind::Local => {
                let mut provider = LocalProvider::new(endpoint, generation)?;
                if let Some(timeout) = settings.timeout() {
                    provider = provider.with_timeout(timeout)?;
                }
                Arc::new(provider)
            }
        };

        Ok(adapter)
    }

    /// Build a router for every available provider in `config`.
    ///
    /// The breaker is created here from `config`; the tracker is injected so
    /// the caller controls its sink and shutdown.
    pub fn build_router(
        config: &RouterConfig,
        secrets: &EnvSource<'_>,
        usage_tracker: Arc<UsageTracker>,
    ) -> Result<Router, RouterError> {
        let estimator = CostEstimator::default();
        let mut builder = Router::builder()
            .circuit_breaker(Arc::new(CircuitBreaker::new(config.circuit_breaker_config())))
            .usage_tracker(usage_tracker)
            .retry_policy(config.retry_policy());

        for settings in &config.providers {
            match Self::build_adapter(settings, secrets) {
                Ok(adapter) => {
                    info!(
                        provider = %settings.kind,
                        model = %settings.model,
                        fallback = settings.fallback_model.as_deref().unwrap_or("-"),
                        priority = settings.priority,
                        "Provider configured"
                    );
                    builder = builder
                        .adapter(adapter)
                        .candidates(settings.candidates(&estimator))
                        .expected_output_tokens(settings.kind, settings.generation.max_tokens);
                }
                Err(e) => {
                    warn!(provider = %settings.kind, "Failed to create provider: {}", e);
                }
            }
        }

        builder.cost_estimator(estimator).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> EnvSource<'static> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvSource::from_fn(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_build_router_from_config() {
        let env = source(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "ak-test"),
            ("LOCAL_LLM_ENABLED", "1"),
        ]);
        let config = RouterConfig::from_source(&env).unwrap();
        let router =
            ProviderFactory::build_router(&config, &env, Arc::new(UsageTracker::new())).unwrap();

        let identities: Vec<String> = router.candidates().iter().map(|c| c.identity()).collect();
        assert_eq!(
            identities,
            vec![
                "openai:gpt-4o",
                "openai:gpt-3.5-turbo",
                "anthropic:claude-3-opus-20240229",
                "anthropic:claude-3-haiku-20240307",
                "local:llama-3-8b-instruct",
            ]
        );
    }

    #[test]
    fn test_no_providers_is_fatal() {
        let env = source(&[]);
        let config = RouterConfig::from_source(&env).unwrap();
        let result = ProviderFactory::build_router(&config, &env, Arc::new(UsageTracker::new()));
        assert!(matches!(result, Err(RouterError::NoCandidates)));
    }

    #[test]
    fn test_adapter_requires_resolvable_key() {
        let settings = ProviderSettings::defaults(ProviderKind::OpenAI);
        let err = ProviderFactory::build_adapter(&settings, &source(&[])).err().unwrap();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY".to_string()));
    }
}
