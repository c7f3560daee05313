//! Multi-provider LLM routing with circuit breaking, bounded retries and
//! usage accounting.

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod cost_estimator;
pub mod diary;
pub mod emergency;
pub mod errors;
pub mod factory;
pub mod providers;
pub mod retry;
pub mod router;
pub mod types;
pub mod usage_sink;
pub mod usage_tracker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ProviderSettings, RouterConfig};
pub use cost_estimator::{CostEstimator, CostTable, ModelRate};
pub use diary::{build_diary_prompt, save_note, DiaryError, DiaryNote, DiaryNoteGenerator};
pub use emergency::{emergency_response, EMERGENCY_MODEL, EMERGENCY_PROVIDER};
pub use errors::{ErrorClass, ProviderError, RouterError};
pub use factory::ProviderFactory;
pub use providers::{
    AnthropicProvider, GenerationSettings, LocalProvider, MistralProvider, OpenAIProvider,
    ProviderAdapter,
};
pub use retry::{GiveUpReason, RetryDecision, RetryPolicy, RetryState};
pub use router::{Router, RouterBuilder};
pub use types::{Candidate, Completion, PriorityHint, ProviderKind, RouterRequest, RouterResponse};
pub use usage_sink::{JsonLinesSink, SinkError, TracingSink, UsageSink};
pub use usage_tracker::{ProviderUsage, RequestOutcome, UsageSummary, UsageTracker};
