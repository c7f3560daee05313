use common::OperationTimer;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::cost_estimator::CostEstimator;
use crate::emergency::{emergency_response, EMERGENCY_PROVIDER};
use crate::errors::RouterError;
use crate::providers::ProviderAdapter;
use crate::retry::{GiveUpReason, RetryDecision, RetryPolicy};
use crate::types::{Candidate, PriorityHint, ProviderKind, RouterRequest, RouterResponse};
use crate::usage_tracker::{RequestOutcome, UsageTracker};

/// Expected completion length when a provider has no configured limit
pub const DEFAULT_EXPECTED_OUTPUT_TOKENS: u32 = 1000;

/// Candidate-ranking router with per-provider circuit breaking, bounded
/// retries and a deterministic emergency reply.
///
/// `generate` never fails because of provider errors. It imposes no
/// overall deadline: callers that need one wrap the call in
/// `tokio::time::timeout` and fall back to [`Router::emergency_response`].
pub struct Router {
    candidates: Vec<Candidate>,
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    circuit_breaker: Arc<CircuitBreaker>,
    usage_tracker: Arc<UsageTracker>,
    retry_policy: RetryPolicy,
    cost_estimator: CostEstimator,
    expected_output_tokens: HashMap<ProviderKind, u32>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("candidates", &self.candidates)
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn usage_tracker(&self) -> &Arc<UsageTracker> {
        &self.usage_tracker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn cost_estimator(&self) -> &CostEstimator {
        &self.cost_estimator
    }

    fn expected_output_tokens(&self, kind: ProviderKind) -> u32 {
        self.expected_output_tokens
            .get(&kind)
            .copied()
            .unwrap_or(DEFAULT_EXPECTED_OUTPUT_TOKENS)
    }

    fn prompt_tokens(request: &RouterRequest) -> u32 {
        CostEstimator::estimate_tokens(&request.prompt)
            + request
                .system_prompt
                .as_deref()
                .map_or(0, CostEstimator::estimate_tokens)
    }

    /// Estimated cost of serving `request` with `candidate`.
    pub fn estimate_request_cost(&self, candidate: &Candidate, request: &RouterRequest) -> f64 {
        self.cost_estimator.estimate(
            candidate,
            Self::prompt_tokens(request),
            self.expected_output_tokens(candidate.provider),
        )
    }

    /// Order in which candidates are tried for `request`.
    ///
    /// Static priority always dominates. Within one priority tier:
    /// cheaper candidates go first when a budget is set or the hint is
    /// `low`; pricier (more capable) ones go first for `high` without a
    /// budget; `medium` keeps configuration order.
    pub fn rank_candidates(&self, request: &RouterRequest) -> Vec<Candidate> {
        let cheapest_first =
            request.max_cost.is_some() || request.priority_hint == PriorityHint::Low;
        let costliest_first = !cheapest_first && request.priority_hint == PriorityHint::High;

        let mut ranked = self.candidates.clone();
        ranked.sort_by(|a, b| {
            let by_cost = a
                .estimated_cost_per_1k_tokens
                .total_cmp(&b.estimated_cost_per_1k_tokens);
            let within_tier = if cheapest_first {
                by_cost
            } else if costliest_first {
                by_cost.reverse()
            } else {
                Ordering::Equal
            };
            a.priority.cmp(&b.priority).then(within_tier)
        });

        if let Some(max_cost) = request.max_cost {
            let within_budget = ranked
                .iter()
                .any(|c| self.estimate_request_cost(c, request) <= max_cost);
            if !within_budget {
                warn!(
                    max_cost,
                    "No candidate fits the requested budget, trying in priority order anyway"
                );
            }
        }

        ranked
    }

    /// Generate text for `request`.
    ///
    /// Only a malformed request is an error; provider failures end in the
    /// emergency reply.
    pub async fn generate(&self, request: &RouterRequest) -> Result<RouterResponse, RouterError> {
        request.validate()?;

        let request_id = Uuid::new_v4();
        let mut timer = OperationTimer::new("router.generate");
        timer.add_field("request_id", request_id.to_string());
        timer.add_field("user_id", &request.user_id);

        let ranked = self.rank_candidates(request);
        debug!(
            %request_id,
            candidates = ?ranked.iter().map(Candidate::identity).collect::<Vec<_>>(),
            "Ranked candidates"
        );

        let mut outcomes = Vec::new();
        for candidate in &ranked {
            if let Some(text) = self
                .try_candidate(request_id, candidate, request, &mut outcomes)
                .await
            {
                timer.add_field("provider_used", candidate.identity());
                timer.add_field("attempts", outcomes.len());
                let response = RouterResponse {
                    text,
                    provider_used: candidate.identity(),
                    outcomes,
                };
                timer.finish();
                return Ok(response);
            }
        }

        error!(
            %request_id,
            attempts = outcomes.len(),
            "All LLM candidates failed or were skipped, using emergency response"
        );
        timer.add_field("provider_used", EMERGENCY_PROVIDER);
        timer.add_field("attempts", outcomes.len());
        timer.finish();

        Ok(self.emergency_with(request_id, request, outcomes))
    }

    /// Run one candidate through breaker admission and the retry loop.
    async fn try_candidate(
        &self,
        request_id: Uuid,
        candidate: &Candidate,
        request: &RouterRequest,
        outcomes: &mut Vec<RequestOutcome>,
    ) -> Option<String> {
        let key = candidate.provider.as_str();
        let identity = candidate.identity();

        let Some(adapter) = self.adapters.get(&candidate.provider) else {
            error!(candidate = %identity, "No adapter registered, skipping candidate");
            return None;
        };

        let Some(mut permit) = self.circuit_breaker.acquire(key) else {
            info!(%request_id, candidate = %identity, "Circuit breaker open, skipping candidate");
            return None;
        };

        let mut retry = self.retry_policy.start();
        loop {
            let attempt = retry.begin_attempt();
            let started = tokio::time::Instant::now();
            let result = adapter
                .send(&request.prompt, request.system_prompt.as_deref(), &candidate.model)
                .await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(completion) => {
                    let cost = self.cost_estimator.actual_cost(candidate, &completion);
                    self.record(
                        outcomes,
                        RequestOutcome::success(
                            request_id,
                            candidate.clone(),
                            attempt,
                            latency_ms,
                            completion.tokens_in,
                            completion.tokens_out,
                            cost,
                        ),
                    );
                    permit.record_success();

                    info!(
                        %request_id,
                        candidate = %identity,
                        attempt,
                        latency_ms,
                        cost,
                        "LLM call succeeded"
                    );
                    return Some(completion.text);
                }
                Err(error) => {
                    self.record(
                        outcomes,
                        RequestOutcome::failure(
                            request_id,
                            candidate.clone(),
                            attempt,
                            latency_ms,
                            error.class,
                        ),
                    );
                    permit.record_error(error.class);

                    if self.circuit_breaker.state(key) == CircuitState::Open {
                        warn!(
                            %request_id,
                            candidate = %identity,
                            attempt,
                            "Circuit opened for provider, abandoning candidate: {}",
                            error
                        );
                        return None;
                    }

                    match retry.on_failure(error.class) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                %request_id,
                                candidate = %identity,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "LLM call failed, retrying: {}",
                                error
                            );
                            tokio::time::sleep(delay).await;

                            if self.circuit_breaker.state(key) == CircuitState::Open {
                                info!(
                                    %request_id,
                                    candidate = %identity,
                                    "Circuit opened during backoff, abandoning candidate"
                                );
                                return None;
                            }
                        }
                        RetryDecision::GiveUp(reason) => {
                            match reason {
                                GiveUpReason::Terminal(class) => warn!(
                                    %request_id,
                                    candidate = %identity,
                                    attempt,
                                    class = %class,
                                    "Non-retryable failure, moving to next candidate: {}",
                                    error
                                ),
                                GiveUpReason::Exhausted => warn!(
                                    %request_id,
                                    candidate = %identity,
                                    attempts = attempt,
                                    "Retries exhausted, moving to next candidate: {}",
                                    error
                                ),
                            }
                            return None;
                        }
                    }
                }
            }
        }
    }

    fn record(&self, outcomes: &mut Vec<RequestOutcome>, outcome: RequestOutcome) {
        self.usage_tracker.record(outcome.clone());
        outcomes.push(outcome);
    }

    /// Emergency reply for `request`, recorded as one successful zero-cost
    /// outcome. Used directly by callers whose deadline expired.
    pub fn emergency_response(&self, request: &RouterRequest) -> RouterResponse {
        self.emergency_with(Uuid::new_v4(), request, Vec::new())
    }

    fn emergency_with(
        &self,
        request_id: Uuid,
        request: &RouterRequest,
        mut outcomes: Vec<RequestOutcome>,
    ) -> RouterResponse {
        let text = emergency_response(&request.prompt);
        let outcome = RequestOutcome::success(
            request_id,
            Candidate::emergency(),
            1,
            0.0,
            Self::prompt_tokens(request),
            CostEstimator::estimate_tokens(&text),
            0.0,
        );
        self.record(&mut outcomes, outcome);

        RouterResponse {
            text,
            provider_used: EMERGENCY_PROVIDER.to_string(),
            outcomes,
        }
    }

    /// Human-readable breaker and usage overview.
    pub fn status_report(&self, window: Option<Duration>) -> String {
        let summary = self.usage_tracker.summarize(window);
        let circuits: HashMap<String, String> = self
            .circuit_breaker
            .snapshot()
            .into_iter()
            .map(|s| (s.key.clone(), s.describe()))
            .collect();

        let mut report = String::new();
        report.push_str("LLM Router Status\n");
        let _ = writeln!(
            report,
            "Overall: {} attempts for {} requests ({:.1}% success), {} emergency responses",
            summary.total_requests,
            summary.unique_requests,
            summary.success_rate * 100.0,
            summary.emergency_responses
        );
        let _ = writeln!(report, "Total cost: ${:.4}", summary.total_cost);
        report.push_str("\nCandidates:\n");

        for candidate in &self.candidates {
            let identity = candidate.identity();
            let circuit = circuits
                .get(candidate.provider.as_str())
                .cloned()
                .unwrap_or_else(|| "CLOSED (failures: 0)".to_string());
            let _ = write!(
                report,
                "  • {} [priority {}, ${:.5}/1K] - {}",
                identity, candidate.priority, candidate.estimated_cost_per_1k_tokens, circuit
            );

            match summary.per_provider.get(&identity) {
                Some(usage) => {
                    let _ = writeln!(
                        report,
                        " - {} attempts ({} ok, {} failed, {:.0}ms avg, ${:.4})",
                        usage.requests,
                        usage.successes,
                        usage.failures,
                        usage.avg_latency_ms,
                        usage.total_cost
                    );
                }
                None => report.push('\n'),
            }
        }

        report
    }
}

/// Assembles a [`Router`] from its collaborators.
pub struct RouterBuilder {
    candidates: Vec<Candidate>,
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    usage_tracker: Option<Arc<UsageTracker>>,
    retry_policy: RetryPolicy,
    cost_estimator: CostEstimator,
    expected_output_tokens: HashMap<ProviderKind, u32>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            adapters: HashMap::new(),
            circuit_breaker: None,
            usage_tracker: None,
            retry_policy: RetryPolicy::default(),
            cost_estimator: CostEstimator::default(),
            expected_output_tokens: HashMap::new(),
        }
    }
}

impl RouterBuilder {
    pub fn candidate(mut self, candidate: Candidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn candidates(mut self, candidates: impl IntoIterator<Item = Candidate>) -> Self {
        self.candidates.extend(candidates);
        self
    }

    /// Register the adapter serving every candidate of its kind.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn usage_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.usage_tracker = Some(tracker);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn cost_estimator(mut self, estimator: CostEstimator) -> Self {
        self.cost_estimator = estimator;
        self
    }

    pub fn expected_output_tokens(mut self, kind: ProviderKind, tokens: u32) -> Self {
        self.expected_output_tokens.insert(kind, tokens);
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        if self.candidates.is_empty() {
            return Err(RouterError::NoCandidates);
        }

        if let Some(missing) = self
            .candidates
            .iter()
            .find(|c| !self.adapters.contains_key(&c.provider))
        {
            return Err(RouterError::MissingAdapter(missing.provider));
        }

        info!(
            candidates = self.candidates.len(),
            adapters = self.adapters.len(),
            "Router initialized"
        );

        Ok(Router {
            candidates: self.candidates,
            adapters: self.adapters,
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            usage_tracker: self.usage_tracker.unwrap_or_default(),
            retry_policy: self.retry_policy,
            cost_estimator: self.cost_estimator,
            expected_output_tokens: self.expected_output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::types::Completion;
    use async_trait::async_trait;

    struct EchoAdapter(ProviderKind);

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        fn kind(&self) -> ProviderKind {
            self.0
        }

        async fn send(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            model: &str,
        ) -> Result<Completion, ProviderError> {
            Ok(Completion::new(format!("{model}: {prompt}"), 1, 1))
        }
    }

    fn router(candidates: Vec<Candidate>) -> Router {
        let mut builder = Router::builder().candidates(candidates);
        for kind in ProviderKind::ALL {
            builder = builder.adapter(Arc::new(EchoAdapter(kind)));
        }
        builder.retry_policy(RetryPolicy::immediate(3)).build().unwrap()
    }

    fn identities(candidates: &[Candidate]) -> Vec<String> {
        candidates.iter().map(Candidate::identity).collect()
    }

    #[test]
    fn test_build_requires_candidates_and_adapters() {
        assert!(matches!(
            Router::builder().build(),
            Err(RouterError::NoCandidates)
        ));

        let result = Router::builder()
            .candidate(Candidate::new(ProviderKind::Anthropic, "claude", 1, 0.01))
            .adapter(Arc::new(EchoAdapter(ProviderKind::OpenAI)))
            .build();
        assert!(matches!(
            result,
            Err(RouterError::MissingAdapter(ProviderKind::Anthropic))
        ));
    }

    #[test]
    fn test_ranking_by_priority_then_cost() {
        let router = router(vec![
            Candidate::new(ProviderKind::Anthropic, "haiku", 2, 0.0007),
            Candidate::new(ProviderKind::OpenAI, "gpt-4o", 1, 0.006),
            Candidate::new(ProviderKind::Anthropic, "opus", 2, 0.045),
            Candidate::new(ProviderKind::OpenAI, "gpt-3.5-turbo", 1, 0.001),
        ]);

        let medium = RouterRequest::new("p", "u");
        assert_eq!(
            identities(&router.rank_candidates(&medium)),
            vec!["openai:gpt-4o", "openai:gpt-3.5-turbo", "anthropic:haiku", "anthropic:opus"]
        );

        let high = RouterRequest::new("p", "u").with_priority(PriorityHint::High);
        assert_eq!(
            identities(&router.rank_candidates(&high)),
            vec!["openai:gpt-4o", "openai:gpt-3.5-turbo", "anthropic:opus", "anthropic:haiku"]
        );

        let budget = RouterRequest::new("p", "u").with_max_cost(0.01);
        assert_eq!(
            identities(&router.rank_candidates(&budget)),
            vec!["openai:gpt-3.5-turbo", "openai:gpt-4o", "anthropic:haiku", "anthropic:opus"]
        );

        let low = RouterRequest::new("p", "u").with_priority(PriorityHint::Low);
        assert_eq!(
            identities(&router.rank_candidates(&low)),
            identities(&router.rank_candidates(&budget))
        );

        let high_with_budget = RouterRequest::new("p", "u")
            .with_priority(PriorityHint::High)
            .with_max_cost(0.01);
        assert_eq!(
            identities(&router.rank_candidates(&high_with_budget)),
            identities(&router.rank_candidates(&budget))
        );
    }

    #[test]
    fn test_budget_is_advisory() {
        let router = router(vec![Candidate::new(ProviderKind::OpenAI, "gpt-4o", 1, 0.006)]);
        let request = RouterRequest::new("p", "u").with_max_cost(0.0);
        assert_eq!(router.rank_candidates(&request).len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_response_records_outcome() {
        let router = router(vec![Candidate::new(ProviderKind::Local, "llama", 4, 0.0)]);
        let request = RouterRequest::new("Today was long.", "u");

        let response = router.emergency_response(&request);
        assert!(response.is_emergency());
        assert_eq!(response.outcomes.len(), 1);
        assert!(response.outcomes[0].success);
        assert_eq!(response.outcomes[0].cost, 0.0);
        assert_eq!(router.usage_tracker().summarize(None).emergency_responses, 1);
    }

    #[tokio::test]
    async fn test_status_report_lists_candidates() {
        let router = router(vec![Candidate::new(ProviderKind::Mistral, "mistral-small-latest", 3, 0.0004)]);
        router
            .generate(&RouterRequest::new("hello", "u"))
            .await
            .unwrap();

        let report = router.status_report(None);
        assert!(report.contains("mistral:mistral-small-latest"));
        assert!(report.contains("1 attempts (1 ok, 0 failed"));
    }
}
