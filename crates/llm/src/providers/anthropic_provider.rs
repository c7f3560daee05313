use super::{
    build_client, error_from_response, preview, require_api_key, trim_base_url, GenerationSettings,
    ProviderAdapter, DEFAULT_TIMEOUT,
};
use async_trait::async_trait;
use common::ConfigError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cost_estimator::CostEstimator;
use crate::errors::ProviderError;
use crate::types::{Completion, ProviderKind};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    settings: GenerationSettings,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        settings: GenerationSettings,
    ) -> Result<Self, ConfigError> {
        let api_key = require_api_key(ProviderKind::Anthropic, api_key)?;
        let base_url = endpoint.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string());

        Ok(Self {
            api_key,
            base_url: trim_base_url(&base_url),
            settings,
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn send(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
    ) -> Result<Completion, ProviderError> {
        let start_time = Instant::now();

        // System prompt is a top-level field, not a message
        let body = MessagesRequest {
            model: model.to_string(),
            max_tokens: self.settings.max_tokens,
            system: system_prompt.map(str::to_string),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.settings.temperature,
        };

        debug!(model, "Sending request to Anthropic: {}", preview(prompt, 50));

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(error_from_response(ProviderKind::Anthropic, response).await);
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::unknown(format!("anthropic returned an unreadable body: {e}"))
        })?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ProviderError::unknown("Empty response from anthropic"));
        }

        let (tokens_in, tokens_out) = match parsed.usage {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
            None => (
                CostEstimator::estimate_tokens(prompt)
                    + system_prompt.map_or(0, CostEstimator::estimate_tokens),
                CostEstimator::estimate_tokens(&text),
            ),
        };

        info!(
            provider = "anthropic",
            model,
            tokens_in,
            tokens_out,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Anthropic response received"
        );

        Ok(Completion::new(text, tokens_in, tokens_out))
    }
}

// Messages API structures
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_top_level() {
        let body = MessagesRequest {
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 1024,
            system: Some("be brief".to_string()),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            temperature: 0.2,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["system"], "be brief");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_system_prompt_is_omitted() {
        let body = MessagesRequest {
            model: "m".to_string(),
            max_tokens: 1,
            system: None,
            messages: Vec::new(),
            temperature: 0.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_requires_api_key() {
        assert!(AnthropicProvider::new(String::new(), None, GenerationSettings::default()).is_err());
    }
}
