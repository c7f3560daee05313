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

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
#[derive(Debug, Clone)]
pub(crate) struct ChatCompletionsClient {
    kind: ProviderKind,
    api_key: Option<String>,
    base_url: String,
    settings: GenerationSettings,
    client: Client,
}

impl ChatCompletionsClient {
    pub(crate) fn new(
        kind: ProviderKind,
        api_key: Option<String>,
        base_url: &str,
        settings: GenerationSettings,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            kind,
            api_key,
            base_url: trim_base_url(base_url),
            settings,
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
        self.client = build_client(timeout)?;
        Ok(())
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
    ) -> Result<Completion, ProviderError> {
        let start_time = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let body = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: false,
        };

        debug!(
            provider = %self.kind,
            model,
            "Sending chat completion: {}",
            preview(prompt, 50)
        );

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(error_from_response(self.kind, response).await);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::unknown(format!("{} returned an unreadable body: {e}", self.kind))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::unknown(format!("Empty response from {}", self.kind)))?
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(ProviderError::unknown(format!("Empty response from {}", self.kind)));
        }

        let (tokens_in, tokens_out) = match parsed.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => {
                let system_tokens = system_prompt.map_or(0, CostEstimator::estimate_tokens);
                (
                    CostEstimator::estimate_tokens(prompt) + system_tokens,
                    CostEstimator::estimate_tokens(&text),
                )
            }
        };

        info!(
            provider = %self.kind,
            model,
            tokens_in,
            tokens_out,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Chat completion received"
        );

        Ok(Completion::new(text, tokens_in, tokens_out))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    inner: ChatCompletionsClient,
}

impl OpenAIProvider {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        settings: GenerationSettings,
    ) -> Result<Self, ConfigError> {
        let api_key = require_api_key(ProviderKind::OpenAI, api_key)?;
        let base_url = endpoint.unwrap_or_else(|| OPENAI_BASE_URL.to_string());
        Ok(Self {
            inner: ChatCompletionsClient::new(
                ProviderKind::OpenAI,
                Some(api_key),
                &base_url,
                settings,
            )?,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        self.inner.set_timeout(timeout)?;
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        self.inner.base_url()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    async fn send(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
    ) -> Result<Completion, ProviderError> {
        self.inner.complete(prompt, system_prompt, model).await
    }
}

// Chat completions API structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let result = OpenAIProvider::new(String::new(), None, GenerationSettings::default());
        assert_eq!(
            result.unwrap_err(),
            ConfigError::Missing("OPENAI_API_KEY".to_string())
        );
    }

    #[test]
    fn test_default_endpoint() {
        let provider =
            OpenAIProvider::new("sk-test".to_string(), None, GenerationSettings::default()).unwrap();
        assert_eq!(provider.endpoint(), OPENAI_BASE_URL);
        assert_eq!(provider.kind(), ProviderKind::OpenAI);
    }

    #[test]
    fn test_request_serialization() {
        let body = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 1000,
            temperature: 0.2,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }
}
