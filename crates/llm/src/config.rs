use common::{BatchConfigBase, CircuitBreakerConfigBase, ConfigError, EnvSource, RetryConfigBase};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::cost_estimator::CostEstimator;
use crate::providers::GenerationSettings;
use crate::retry::RetryPolicy;
use crate::types::{Candidate, ProviderKind};

/// Setting value that disables a provider's fallback model
const NO_FALLBACK: &str = "none";

/// Static configuration of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub fallback_model: Option<String>,
    pub priority: u32,
    pub generation: GenerationSettings,
    pub endpoint: Option<String>,
    /// Name of the variable that holds the API key; the key itself is
    /// only read when the adapter is built
    pub api_key_env: Option<String>,
    /// Overrides the rate-table price for ranking
    pub cost_per_1k: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub recovery_timeout_secs: Option<u64>,
}

impl ProviderSettings {
    pub fn defaults(kind: ProviderKind) -> Self {
        let (model, fallback, generation) = match kind {
            ProviderKind::OpenAI => ("gpt-4o", Some("gpt-3.5-turbo"), GenerationSettings::new(1000, 0.2)),
            ProviderKind::Anthropic => (
                "claude-3-opus-20240229",
                Some("claude-3-haiku-20240307"),
                GenerationSettings::new(1024, 0.2),
            ),
            ProviderKind::Mistral => (
                "mistral-large-latest",
                Some("mistral-small-latest"),
                GenerationSettings::new(1000, 0.2),
            ),
            ProviderKind::Local => ("llama-3-8b-instruct", None, GenerationSettings::new(512, 0.0)),
        };

        let api_key_env = match kind {
            ProviderKind::Local => None,
            other => Some(format!("{}API_KEY", other.env_prefix())),
        };

        Self {
            kind,
            model: model.to_string(),
            fallback_model: fallback.map(str::to_string),
            priority: kind.default_priority(),
            generation,
            endpoint: None,
            api_key_env,
            cost_per_1k: None,
            timeout_secs: None,
            recovery_timeout_secs: None,
        }
    }

    /// Read `<PREFIX>*` keys over the defaults for `kind`.
    pub fn from_source(kind: ProviderKind, source: &EnvSource<'_>) -> Result<Self, ConfigError> {
        let prefix = kind.env_prefix();
        let key = |name: &str| format!("{prefix}{name}");
        let mut settings = Self::defaults(kind);

        if let Some(model) = source.get(&key("MODEL")) {
            settings.model = model;
        }
        if let Some(fallback) = source.get(&key("FALLBACK_MODEL")) {
            settings.fallback_model = if fallback.eq_ignore_ascii_case(NO_FALLBACK) {
                None
            } else {
                Some(fallback)
            };
        }

        settings.priority = source.parse_or(&key("PRIORITY"), settings.priority)?;
        if settings.priority == 0 {
            return Err(ConfigError::invalid(key("PRIORITY"), "0", "priority starts at 1"));
        }

        settings.generation.max_tokens =
            source.parse_or(&key("MAX_TOKENS"), settings.generation.max_tokens)?;
        if settings.generation.max_tokens == 0 {
            return Err(ConfigError::invalid(key("MAX_TOKENS"), "0", "must be positive"));
        }

        settings.generation.temperature =
            source.parse_or(&key("TEMPERATURE"), settings.generation.temperature)?;
        if !(0.0..=2.0).contains(&settings.generation.temperature) {
            return Err(ConfigError::invalid(
                key("TEMPERATURE"),
                settings.generation.temperature.to_string(),
                "expected a value between 0 and 2",
            ));
        }

        settings.endpoint = source.get(&key("ENDPOINT"));

        settings.cost_per_1k = source.parse_opt(&key("COST_PER_1K"))?;
        if let Some(cost) = settings.cost_per_1k {
            if !cost.is_finite() || cost < 0.0 {
                return Err(ConfigError::invalid(
                    key("COST_PER_1K"),
                    cost.to_string(),
                    "must be a non-negative number",
                ));
            }
        }

        settings.timeout_secs = source.parse_opt(&key("TIMEOUT_SECS"))?;
        settings.recovery_timeout_secs = source.parse_opt(&key("RECOVERY_TIMEOUT_SECS"))?;

        Ok(settings)
    }

    /// Primary model first, then the fallback model.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.model.as_str()).chain(self.fallback_model.as_deref())
    }

    pub fn candidates(&self, estimator: &CostEstimator) -> Vec<Candidate> {
        self.models()
            .map(|model| {
                let cost = self
                    .cost_per_1k
                    .unwrap_or_else(|| estimator.blended_rate(self.kind, model));
                Candidate::new(self.kind, model, self.priority, cost)
            })
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Everything the router needs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Only providers that are available (credentials present or enabled)
    pub providers: Vec<ProviderSettings>,
    pub circuit_breaker: CircuitBreakerConfigBase,
    pub retry: RetryConfigBase,
    pub usage_batch: BatchConfigBase,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            circuit_breaker: CircuitBreakerConfigBase::default(),
            retry: RetryConfigBase::default(),
            usage_batch: BatchConfigBase::default(),
        }
    }
}

impl RouterConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_source(&EnvSource::process())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::from_fn(lookup))
    }

    pub fn from_source(source: &EnvSource<'_>) -> Result<Self, ConfigError> {
        let mut providers = Vec::new();
        for kind in ProviderKind::ALL {
            if Self::is_available(kind, source)? {
                providers.push(ProviderSettings::from_source(kind, source)?);
            } else {
                debug!(provider = %kind, "Provider not configured, skipping");
            }
        }

        let defaults = CircuitBreakerConfigBase::default();
        let circuit_breaker = CircuitBreakerConfigBase {
            failure_threshold: source
                .parse_or("ROUTER_FAILURE_THRESHOLD", defaults.failure_threshold)?,
            recovery_timeout_secs: source
                .parse_or("ROUTER_RECOVERY_TIMEOUT_SECS", defaults.recovery_timeout_secs)?,
        };
        if circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "ROUTER_FAILURE_THRESHOLD",
                "0",
                "must be at least 1",
            ));
        }

        let defaults = RetryConfigBase::default();
        let retry = RetryConfigBase {
            max_attempts: source.parse_or("ROUTER_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay_ms: source.parse_or("ROUTER_BASE_DELAY_MS", defaults.base_delay_ms)?,
            max_delay_ms: source.parse_or("ROUTER_MAX_DELAY_MS", defaults.max_delay_ms)?,
            jitter: source.flag("ROUTER_JITTER", defaults.jitter)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid("ROUTER_MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        let defaults = BatchConfigBase::default();
        let usage_batch = BatchConfigBase {
            batch_size: source.parse_or("ROUTER_USAGE_BATCH_SIZE", defaults.batch_size)?,
            flush_interval_ms: source
                .parse_or("ROUTER_USAGE_FLUSH_INTERVAL_MS", defaults.flush_interval_ms)?,
            channel_capacity: defaults.channel_capacity,
        };

        info!(
            providers = providers.len(),
            failure_threshold = circuit_breaker.failure_threshold,
            max_attempts = retry.max_attempts,
            "Router configuration loaded"
        );

        Ok(Self {
            providers,
            circuit_breaker,
            retry,
            usage_batch,
        })
    }

    fn is_available(kind: ProviderKind, source: &EnvSource<'_>) -> Result<bool, ConfigError> {
        match kind {
            ProviderKind::Local => source.flag("LOCAL_LLM_ENABLED", false),
            other => Ok(source.get(&format!("{}API_KEY", other.env_prefix())).is_some()),
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.kind == kind)
    }

    /// Candidate set in configuration order.
    pub fn candidates(&self, estimator: &CostEstimator) -> Vec<Candidate> {
        self.providers
            .iter()
            .flat_map(|p| p.candidates(estimator))
            .collect()
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        self.providers
            .iter()
            .filter_map(|p| p.recovery_timeout_secs.map(|secs| (p.kind, secs)))
            .fold(
                CircuitBreakerConfig::from_base(&self.circuit_breaker),
                |config, (kind, secs)| {
                    config.with_recovery_override(kind.as_str(), Duration::from_secs(secs))
                },
            )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_base(&self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<RouterConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RouterConfig::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_only_configured_providers_are_available() {
        let config = config(&[("OPENAI_API_KEY", "sk-test"), ("LOCAL_LLM_ENABLED", "true")]).unwrap();
        let kinds: Vec<_> = config.providers.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProviderKind::OpenAI, ProviderKind::Local]);
    }

    #[test]
    fn test_primary_and_fallback_candidates() {
        let config = config(&[("ANTHROPIC_API_KEY", "key")]).unwrap();
        let candidates = config.candidates(&CostEstimator::default());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].model, "claude-3-opus-20240229");
        assert_eq!(candidates[1].model, "claude-3-haiku-20240307");
        assert!(candidates.iter().all(|c| c.priority == 2));
        assert!(candidates[0].estimated_cost_per_1k_tokens > candidates[1].estimated_cost_per_1k_tokens);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("MISTRAL_API_KEY", "key"),
            ("MISTRAL_MODEL", "open-mistral-7b"),
            ("MISTRAL_FALLBACK_MODEL", "none"),
            ("MISTRAL_PRIORITY", "1"),
            ("MISTRAL_COST_PER_1K", "0.5"),
            ("MISTRAL_RECOVERY_TIMEOUT_SECS", "5"),
            ("ROUTER_MAX_ATTEMPTS", "5"),
            ("ROUTER_JITTER", "off"),
        ])
        .unwrap();

        let candidates = config.candidates(&CostEstimator::default());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].identity(), "mistral:open-mistral-7b");
        assert_eq!(candidates[0].priority, 1);
        assert_eq!(candidates[0].estimated_cost_per_1k_tokens, 0.5);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert!(!policy.jitter);

        let breaker = config.circuit_breaker_config();
        assert_eq!(breaker.recovery_timeout_for("mistral"), Duration::from_secs(5));
        assert_eq!(breaker.recovery_timeout_for("openai"), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config(&[("OPENAI_API_KEY", "k"), ("OPENAI_TEMPERATURE", "3.5")]).is_err());
        assert!(config(&[("OPENAI_API_KEY", "k"), ("OPENAI_PRIORITY", "0")]).is_err());
        assert!(config(&[("ROUTER_FAILURE_THRESHOLD", "many")]).is_err());
        assert!(config(&[("LOCAL_LLM_ENABLED", "sometimes")]).is_err());
    }

    #[test]
    fn test_api_key_is_referenced_not_stored() {
        let config = config(&[("OPENAI_API_KEY", "sk-secret")]).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("OPENAI_API_KEY"));
    }
}
