use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::emergency::EMERGENCY_MODEL;
use crate::errors::RouterError;
use crate::usage_tracker::RequestOutcome;

/// The closed set of text-generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Mistral,
    Local,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Mistral,
        ProviderKind::Local,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Local => "local",
        }
    }

    /// Routing tier when configuration does not override it (1 = tried first).
    pub fn default_priority(self) -> u32 {
        match self {
            ProviderKind::OpenAI => 1,
            ProviderKind::Anthropic => 2,
            ProviderKind::Mistral => 3,
            ProviderKind::Local => 4,
        }
    }

    /// Prefix of this provider's configuration keys.
    pub fn env_prefix(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_",
            ProviderKind::Anthropic => "ANTHROPIC_",
            ProviderKind::Mistral => "MISTRAL_",
            ProviderKind::Local => "LOCAL_LLM_",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "mistral" => Ok(ProviderKind::Mistral),
            "local" => Ok(ProviderKind::Local),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// One (provider, model) pairing eligible to serve a request.
///
/// Built once from configuration; the router only reorders candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: ProviderKind,
    pub model: String,
    /// 1 is the highest priority
    pub priority: u32,
    pub estimated_cost_per_1k_tokens: f64,
}

impl Candidate {
    pub fn new(
        provider: ProviderKind,
        model: impl Into<String>,
        priority: u32,
        estimated_cost_per_1k_tokens: f64,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            priority,
            estimated_cost_per_1k_tokens,
        }
    }

    /// `provider:model`, as reported in `provider_used`.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }

    pub(crate) fn emergency() -> Self {
        Self::new(ProviderKind::Local, EMERGENCY_MODEL, u32::MAX, 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityHint {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for PriorityHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(PriorityHint::Low),
            "medium" | "normal" => Ok(PriorityHint::Medium),
            "high" => Ok(PriorityHint::High),
            other => Err(format!("unknown priority hint: {other}")),
        }
    }
}

/// A single generation request; lives for the duration of one `generate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub user_id: String,
    pub priority_hint: PriorityHint,
    /// Advisory budget in USD, used for ranking only
    pub max_cost: Option<f64>,
}

impl RouterRequest {
    pub fn new(prompt: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            user_id: user_id.into(),
            priority_hint: PriorityHint::default(),
            max_cost: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_priority(mut self, hint: PriorityHint) -> Self {
        self.priority_hint = hint;
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Precondition check. The prompt itself is passed through unchecked.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.user_id.trim().is_empty() {
            return Err(RouterError::InvalidRequest(
                "user_id must not be empty".to_string(),
            ));
        }

        if let Some(max_cost) = self.max_cost {
            if !max_cost.is_finite() || max_cost < 0.0 {
                return Err(RouterError::InvalidRequest(format!(
                    "max_cost must be a non-negative number, got {max_cost}"
                )));
            }
        }

        Ok(())
    }
}

/// Result of a generation call.
#[derive(Debug, Clone, Serialize)]
pub struct RouterResponse {
    pub text: String,
    pub provider_used: String,
    /// One entry per physical attempt, in order
    pub outcomes: Vec<RequestOutcome>,
}

impl RouterResponse {
    pub fn is_emergency(&self) -> bool {
        self.provider_used == crate::emergency::EMERGENCY_PROVIDER
    }
}

/// Successful provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// Cost reported by the provider, if it reports one
    pub reported_cost: Option<f64>,
}

impl Completion {
    pub fn new(text: impl Into<String>, tokens_in: u32, tokens_out: u32) -> Self {
        Self {
            text: text.into(),
            tokens_in,
            tokens_out,
            reported_cost: None,
        }
    }

    pub fn with_reported_cost(mut self, cost: f64) -> Self {
        self.reported_cost = Some(cost);
        self
    }
}
