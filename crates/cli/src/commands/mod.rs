mod candidates;
mod generate;

pub use candidates::CandidatesCommand;
pub use generate::GenerateCommand;

use anyhow::{Context, Result};
use common::EnvSource;
use llm::{ProviderFactory, Router, RouterConfig, UsageTracker};
use std::sync::Arc;

/// Reads the process environment, after loading `.env` if present.
fn load_config() -> Result<RouterConfig> {
    RouterConfig::from_env().context("Invalid router configuration")
}

fn build_router(config: &RouterConfig, tracker: Arc<UsageTracker>) -> Result<Router> {
    ProviderFactory::build_router(config, &EnvSource::process(), tracker)
        .context("No usable LLM provider configured")
}
