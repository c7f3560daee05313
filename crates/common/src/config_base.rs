use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::{ConfigError, ConfigResult};

/// Batching for asynchronous sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfigBase {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Records beyond this many in flight are dropped, never awaited
    pub channel_capacity: usize,
}

impl Default for BatchConfigBase {
    fn default() -> Self {
        Self {
            batch_size: 64,
            flush_interval_ms: 1000,
            channel_capacity: 4096,
        }
    }
}

impl BatchConfigBase {
    pub fn small() -> Self {
        Self {
            batch_size: 8,
            flush_interval_ms: 250,
            channel_capacity: 256,
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfigBase {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfigBase {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
        }
    }
}

/// Retry with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfigBase {
    /// Total tries per candidate, including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfigBase {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

/// Key/value source for configuration, usually the process environment.
///
/// Tests build one from a closure so they never touch global state.
pub struct EnvSource<'a> {
    lookup: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl EnvSource<'static> {
    pub fn process() -> Self {
        Self::from_fn(|key| std::env::var(key).ok())
    }
}

impl<'a> EnvSource<'a> {
    pub fn from_fn(lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Trimmed value; blank values count as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn parse_opt<T>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    pub fn flag(&self, key: &str, default: bool) -> ConfigResult<bool> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };

        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    pub fn require(&self, key: &str) -> ConfigResult<String> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }
}
