use super::openai_provider::ChatCompletionsClient;
use super::{trim_base_url, GenerationSettings, ProviderAdapter};
use async_trait::async_trait;
use common::ConfigError;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::types::{Completion, ProviderKind};

pub const LOCAL_BASE_URL: &str = "http://localhost:8080/v1";

/// Local models are slow to warm up
pub const LOCAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Self-hosted inference server exposing an OpenAI-compatible API
/// (llama.cpp server, vLLM, Ollama, LM Studio). No authentication.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    inner: ChatCompletionsClient,
}

impl LocalProvider {
    pub fn new(endpoint: Option<String>, settings: GenerationSettings) -> Result<Self, ConfigError> {
        let endpoint = endpoint.unwrap_or_else(|| LOCAL_BASE_URL.to_string());
        let base_url = normalize_endpoint(&endpoint);
        if base_url.is_empty() {
            return Err(ConfigError::invalid(
                "LOCAL_LLM_ENDPOINT",
                endpoint,
                "endpoint cannot be empty",
            ));
        }

        let mut inner = ChatCompletionsClient::new(ProviderKind::Local, None, &base_url, settings)?;
        inner.set_timeout(LOCAL_TIMEOUT)?;
        Ok(Self { inner })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        self.inner.set_timeout(timeout)?;
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        self.inner.base_url()
    }
}

/// Accept either a base URL or the full completions URL.
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = trim_base_url(endpoint);
    trimmed
        .strip_suffix("/chat/completions")
        .map(str::to_string)
        .unwrap_or(trimmed)
}

#[async_trait]
impl ProviderAdapter for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("http://gpu:8000/v1/"), "http://gpu:8000/v1");
        assert_eq!(
            normalize_endpoint("http://gpu:8000/v1/chat/completions"),
            "http://gpu:8000/v1"
        );
    }

    #[test]
    fn test_default_and_empty_endpoint() {
        let provider = LocalProvider::new(None, GenerationSettings::new(512, 0.0)).unwrap();
        assert_eq!(provider.endpoint(), LOCAL_BASE_URL);
        assert!(LocalProvider::new(Some("  ".to_string()), GenerationSettings::default()).is_err());
    }
}
