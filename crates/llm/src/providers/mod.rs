use async_trait::async_trait;
use common::ConfigError;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::errors::ProviderError;
use crate::types::{Completion, ProviderKind};

pub mod anthropic_provider;
pub mod local_provider;
pub mod mistral_provider;
pub mod openai_provider;

pub use anthropic_provider::AnthropicProvider;
pub use local_provider::LocalProvider;
pub use mistral_provider::MistralProvider;
pub use openai_provider::OpenAIProvider;

/// Default HTTP timeout for provider calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Uniform call surface over one text-generation backend.
///
/// Implementations classify every failure into an
/// [`ErrorClass`](crate::ErrorClass); the router never sees
/// provider-specific types.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn send(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
    ) -> Result<Completion, ProviderError>;
}

/// Per-provider sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.2,
        }
    }
}

impl GenerationSettings {
    pub fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::invalid("http_client", format!("{timeout:?}"), e.to_string()))
}

pub(crate) fn require_api_key(kind: ProviderKind, api_key: String) -> Result<String, ConfigError> {
    if api_key.trim().is_empty() {
        return Err(ConfigError::Missing(format!("{}API_KEY", kind.env_prefix())));
    }
    Ok(api_key)
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Turn a non-2xx response into a classified error.
pub(crate) async fn error_from_response(kind: ProviderKind, response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));

    warn!(provider = %kind, status, "Provider API error: {}", preview(&body, 200));
    ProviderError::from_status(status, format!("{kind} API error ({status}): {body}"))
}

/// First `max_chars` characters, for log lines.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
