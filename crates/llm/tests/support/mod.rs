#![allow(dead_code)]

use async_trait::async_trait;
use llm::{
    CircuitBreaker, CircuitBreakerConfig, Completion, ErrorClass, ProviderAdapter, ProviderError,
    ProviderKind, RetryPolicy, Router, UsageTracker,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Reply = Result<Completion, ProviderError>;

/// Adapter that plays back a fixed script, repeating the last reply.
pub struct ScriptedAdapter {
    kind: ProviderKind,
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn sequence(kind: ProviderKind, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        })
    }

    pub fn always(kind: ProviderKind, reply: Reply) -> Arc<Self> {
        Self::sequence(kind, vec![reply])
    }

    pub fn failing(kind: ProviderKind, class: ErrorClass) -> Arc<Self> {
        Self::always(kind, Err(ProviderError::new(class, format!("scripted {class}"))))
    }

    pub fn ok(kind: ProviderKind, text: &str) -> Arc<Self> {
        Self::always(kind, Ok(Completion::new(text, 120, 80)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
        model: &str,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().unwrap().push(model.to_string());

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ProviderError::unknown("empty script"))),
        }
    }
}

/// Adapter whose calls never complete.
pub struct HangingAdapter {
    kind: ProviderKind,
    pub calls: AtomicUsize,
}

impl HangingAdapter {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProviderAdapter for HangingAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
        _model: &str,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

pub fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new(
        threshold,
        Duration::from_secs(30),
    )))
}

pub fn no_jitter() -> RetryPolicy {
    RetryPolicy::default().with_jitter(false)
}

/// Router with a fresh tracker, the given breaker and the default
/// backoff without jitter.
pub fn router_with(
    candidates: Vec<llm::Candidate>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    breaker: Arc<CircuitBreaker>,
) -> Router {
    let mut builder = Router::builder()
        .candidates(candidates)
        .circuit_breaker(breaker)
        .usage_tracker(Arc::new(UsageTracker::new()))
        .retry_policy(no_jitter());
    for adapter in adapters {
        builder = builder.adapter(adapter);
    }
    builder.build().expect("router builds")
}
