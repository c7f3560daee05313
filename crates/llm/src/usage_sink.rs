use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::usage_tracker::RequestOutcome;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Usage sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize usage record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for persisted request outcomes.
///
/// Called from the tracker's background flusher, never from the request path.
#[async_trait]
pub trait UsageSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write_batch(&self, batch: &[RequestOutcome]) -> Result<(), SinkError>;
}

/// Appends one JSON object per outcome to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UsageSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write_batch(&self, batch: &[RequestOutcome]) -> Result<(), SinkError> {
        let mut payload = String::new();
        for outcome in batch {
            payload.push_str(&serde_json::to_string(outcome)?);
            payload.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(payload.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Emits each outcome as a structured log event.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

#[async_trait]
impl UsageSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn write_batch(&self, batch: &[RequestOutcome]) -> Result<(), SinkError> {
        for outcome in batch {
            info!(
                target: "llm::usage",
                request_id = %outcome.request_id,
                candidate = %outcome.candidate.identity(),
                attempt = outcome.attempt_number,
                success = outcome.success,
                error_class = outcome.error_class.map(|c| c.as_str()).unwrap_or("-"),
                tokens_in = outcome.tokens_in,
                tokens_out = outcome.tokens_out,
                cost = outcome.cost,
                latency_ms = outcome.latency_ms,
                "usage"
            );
        }
        Ok(())
    }
}
