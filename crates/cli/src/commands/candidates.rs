use anyhow::Result;
use clap::Args;
use console::style;
use llm::{PriorityHint, RouterRequest, UsageTracker};
use std::sync::Arc;

use super::{build_router, load_config};

/// Print the routing order for a hypothetical request.
#[derive(Debug, Args)]
pub struct CandidatesCommand {
    /// Priority hint used for ranking (low, medium, high)
    #[arg(long, default_value = "medium")]
    priority: PriorityHint,

    /// Advisory budget in USD
    #[arg(long)]
    max_cost: Option<f64>,

    /// Sample prompt used for the cost column
    #[arg(long, default_value = "")]
    prompt: String,
}

impl CandidatesCommand {
    pub fn execute(self) -> Result<()> {
        let config = load_config()?;
        let router = build_router(&config, Arc::new(UsageTracker::new()))?;

        let mut request = RouterRequest::new(self.prompt, "cli").with_priority(self.priority);
        if let Some(max_cost) = self.max_cost {
            request = request.with_max_cost(max_cost);
        }

        println!("{}", style("Routing order").bold());
        for (index, candidate) in router.rank_candidates(&request).iter().enumerate() {
            let cost = router.estimate_request_cost(candidate, &request);
            let over_budget = request.max_cost.is_some_and(|max| cost > max);
            let line = format!(
                "{:>2}. {:<40} priority {:<3} ${:.5}/1K  est ${:.4}",
                index + 1,
                candidate.identity(),
                candidate.priority,
                candidate.estimated_cost_per_1k_tokens,
                cost
            );
            if over_budget {
                println!("{}", style(line).dim());
            } else {
                println!("{line}");
            }
        }

        println!();
        println!(
            "Breaker: opens after {} failures, probes after {}s",
            config.circuit_breaker.failure_threshold, config.circuit_breaker.recovery_timeout_secs
        );
        println!(
            "Retry: {} attempts per candidate, backoff {}ms..{}ms{}",
            config.retry.max_attempts,
            config.retry.base_delay_ms,
            config.retry.max_delay_ms,
            if config.retry.jitter { " with jitter" } else { "" }
        );

        Ok(())
    }
}
