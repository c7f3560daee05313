use super::openai_provider::ChatCompletionsClient;
use super::{require_api_key, GenerationSettings, ProviderAdapter};
use async_trait::async_trait;
use common::ConfigError;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::types::{Completion, ProviderKind};

pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Mistral's chat API, which follows the OpenAI wire format.
#[derive(Debug, Clone)]
pub struct MistralProvider {
    inner: ChatCompletionsClient,
}

impl MistralProvider {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        settings: GenerationSettings,
    ) -> Result<Self, ConfigError> {
        let api_key = require_api_key(ProviderKind::Mistral, api_key)?;
        let base_url = endpoint.unwrap_or_else(|| MISTRAL_BASE_URL.to_string());
        Ok(Self {
            inner: ChatCompletionsClient::new(
                ProviderKind::Mistral,
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
impl ProviderAdapter for MistralProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
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
