use std::collections::HashMap;
use tracing::debug;

use crate::types::{Candidate, Completion, ProviderKind};

/// Wildcard model entry, matched when no exact model rate exists
const ANY_MODEL: &str = "any";

/// Price per 1K tokens in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelRate {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Single per-1K figure used for ranking.
    pub fn blended(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }
}

/// Cost per 1K tokens for different providers and models
#[derive(Debug, Clone)]
pub struct CostTable {
    rates: HashMap<(ProviderKind, String), ModelRate>,
    fallback: ModelRate,
}

impl Default for CostTable {
    fn default() -> Self {
        let mut table = Self::empty(ModelRate::new(0.001, 0.003));

        // OpenAI pricing
        table.insert(ProviderKind::OpenAI, "gpt-4o", ModelRate::new(0.0025, 0.01));
        table.insert(ProviderKind::OpenAI, "gpt-4o-mini", ModelRate::new(0.00015, 0.0006));
        table.insert(ProviderKind::OpenAI, "gpt-4-turbo", ModelRate::new(0.01, 0.03));
        table.insert(ProviderKind::OpenAI, "gpt-3.5-turbo", ModelRate::new(0.0005, 0.0015));

        // Anthropic pricing
        table.insert(ProviderKind::Anthropic, "claude-3-opus-20240229", ModelRate::new(0.015, 0.075));
        table.insert(ProviderKind::Anthropic, "claude-3-5-sonnet-20241022", ModelRate::new(0.003, 0.015));
        table.insert(ProviderKind::Anthropic, "claude-3-haiku-20240307", ModelRate::new(0.00025, 0.00125));

        // Mistral pricing
        table.insert(ProviderKind::Mistral, "mistral-large-latest", ModelRate::new(0.002, 0.006));
        table.insert(ProviderKind::Mistral, "mistral-small-latest", ModelRate::new(0.0002, 0.0006));
        table.insert(ProviderKind::Mistral, "open-mistral-7b", ModelRate::new(0.00025, 0.00025));

        // Local models are free after setup
        table.insert(ProviderKind::Local, ANY_MODEL, ModelRate::new(0.0, 0.0));

        table
    }
}

impl CostTable {
    pub fn empty(fallback: ModelRate) -> Self {
        Self {
            rates: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, provider: ProviderKind, model: &str, rate: ModelRate) {
        self.rates.insert((provider, model.to_string()), rate);
    }

    pub fn with_rate(mut self, provider: ProviderKind, model: &str, rate: ModelRate) -> Self {
        self.insert(provider, model, rate);
        self
    }

    /// Exact model, then the provider's wildcard, then the table fallback.
    pub fn rate(&self, provider: ProviderKind, model: &str) -> ModelRate {
        self.rates
            .get(&(provider, model.to_string()))
            .or_else(|| self.rates.get(&(provider, ANY_MODEL.to_string())))
            .copied()
            .unwrap_or(self.fallback)
    }
}

/// Pure cost arithmetic over a static rate table.
#[derive(Debug, Clone, Default)]
pub struct CostEstimator {
    table: CostTable,
}

impl CostEstimator {
    pub fn new(table: CostTable) -> Self {
        Self { table }
    }

    pub fn estimate(&self, candidate: &Candidate, tokens_in: u32, expected_tokens_out: u32) -> f64 {
        let rate = self.table.rate(candidate.provider, &candidate.model);
        (tokens_in as f64 / 1000.0) * rate.input_per_1k
            + (expected_tokens_out as f64 / 1000.0) * rate.output_per_1k
    }

    pub fn blended_rate(&self, provider: ProviderKind, model: &str) -> f64 {
        self.table.rate(provider, model).blended()
    }

    /// Rough token count, about four characters per token.
    pub fn estimate_tokens(text: &str) -> u32 {
        let chars = text.chars().count();
        u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
    }

    /// Cost of a finished call: the provider's own figure when it reports
    /// one, otherwise the table price for the actual token counts.
    pub fn actual_cost(&self, candidate: &Candidate, completion: &Completion) -> f64 {
        match completion.reported_cost {
            Some(cost) => cost,
            None => {
                let cost = self.estimate(candidate, completion.tokens_in, completion.tokens_out);
                debug!(
                    candidate = %candidate.identity(),
                    tokens_in = completion.tokens_in,
                    tokens_out = completion.tokens_out,
                    cost,
                    "Computed call cost from rate table"
                );
                cost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_uses_separate_input_output_rates() {
        let estimator = CostEstimator::default();
        let candidate = Candidate::new(ProviderKind::OpenAI, "gpt-4o", 1, 0.0);
        let cost = estimator.estimate(&candidate, 2000, 1000);
        assert!((cost - (2.0 * 0.0025 + 0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_local_wildcard_and_unknown_fallback() {
        let estimator = CostEstimator::default();
        let local = Candidate::new(ProviderKind::Local, "llama-3-8b-instruct", 4, 0.0);
        assert_eq!(estimator.estimate(&local, 10_000, 10_000), 0.0);

        let unknown = Candidate::new(ProviderKind::Mistral, "mystery", 3, 0.0);
        let cost = estimator.estimate(&unknown, 1000, 1000);
        assert!((cost - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_custom_rate_and_blend() {
        let table = CostTable::default().with_rate(
            ProviderKind::Anthropic,
            "claude-custom",
            ModelRate::new(0.002, 0.004),
        );
        let estimator = CostEstimator::new(table);
        assert!((estimator.blended_rate(ProviderKind::Anthropic, "claude-custom") - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_actual_cost_prefers_reported() {
        let estimator = CostEstimator::default();
        let candidate = Candidate::new(ProviderKind::OpenAI, "gpt-4o", 1, 0.0);

        let reported = Completion::new("ok", 100, 100).with_reported_cost(0.5);
        assert_eq!(estimator.actual_cost(&candidate, &reported), 0.5);

        let computed = Completion::new("ok", 1000, 0);
        assert!((estimator.actual_cost(&candidate, &computed) - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(CostEstimator::estimate_tokens(""), 0);
        assert_eq!(CostEstimator::estimate_tokens("abcd"), 1);
        assert_eq!(CostEstimator::estimate_tokens("abcde"), 2);
    }
}
