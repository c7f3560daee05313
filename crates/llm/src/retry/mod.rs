//! Retry policy for provider calls
//!
//! Retries are driven by an explicit state machine: the caller asks
//! [`RetryState::on_failure`] what to do after each failed attempt and
//! gets back either a delay or a reason to give up on the candidate.
//!
//! ## Rules
//! - `VALIDATION` and `AUTH` failures are terminal
//! - `UNKNOWN` failures are retried once
//! - Everything else is retried until `max_attempts` is reached
//! - Delay after attempt `n` is `min(base * 2^(n-1), max)`, plus uniform
//!   jitter in `[0, base)` when enabled

use common::RetryConfigBase;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::errors::ErrorClass;

/// Retries allowed for failures that could not be classified
const UNKNOWN_RETRY_LIMIT: u32 = 1;

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries per candidate, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap applied before jitter
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_base(&RetryConfigBase::default())
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_base(base: &RetryConfigBase) -> Self {
        Self {
            max_attempts: base.max_attempts.max(1),
            base_delay: Duration::from_millis(base.base_delay_ms),
            max_delay: Duration::from_millis(base.max_delay_ms),
            jitter: base.jitter,
        }
    }

    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic part of the delay after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff delay plus jitter, if enabled.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let base_ms = self.base_delay.as_millis() as u64;

        if !self.jitter || base_ms == 0 {
            return delay;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..base_ms);
        delay + Duration::from_millis(jitter_ms)
    }

    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempt: 0,
            unknown_retries: 0,
        }
    }
}

/// Why a candidate was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure class is never retried
    Terminal(ErrorClass),
    /// Attempt budget used up
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

/// Retry bookkeeping for one candidate within one request.
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    unknown_retries: u32,
}

impl RetryState<'_> {
    /// Start the next attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn on_failure(&mut self, class: ErrorClass) -> RetryDecision {
        if class.is_terminal() {
            debug!(attempt = self.attempt, class = %class, "Terminal failure, not retrying");
            return RetryDecision::GiveUp(GiveUpReason::Terminal(class));
        }

        if class == ErrorClass::Unknown {
            if self.unknown_retries >= UNKNOWN_RETRY_LIMIT {
                debug!(attempt = self.attempt, "Repeated UNKNOWN failure, not retrying");
                return RetryDecision::GiveUp(GiveUpReason::Terminal(class));
            }
            self.unknown_retries += 1;
        }

        if self.attempt >= self.policy.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }

        RetryDecision::RetryAfter(self.policy.delay_with_jitter(self.attempt))
    }
}
