use common::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::ProviderKind;

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Malformed request for this provider; retrying cannot help
    Validation,
    /// Bad credentials or permissions
    Auth,
    RateLimit,
    Timeout,
    TransientServerError,
    Unknown,
}

impl ErrorClass {
    /// Map an HTTP status code to an error class.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 404 | 405 | 409 | 413 | 415 | 422 => ErrorClass::Validation,
            401 | 403 => ErrorClass::Auth,
            408 | 504 => ErrorClass::Timeout,
            429 => ErrorClass::RateLimit,
            500..=599 => ErrorClass::TransientServerError,
            _ => ErrorClass::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorClass::Validation | ErrorClass::Auth)
    }

    /// Validation errors describe the request, not the provider's health.
    pub fn counts_toward_breaker(self) -> bool {
        !matches!(self, ErrorClass::Validation)
    }

    /// Auth failures open the circuit without waiting for the threshold.
    pub fn trips_immediately(self) -> bool {
        matches!(self, ErrorClass::Auth)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Validation => "VALIDATION",
            ErrorClass::Auth => "AUTH",
            ErrorClass::RateLimit => "RATE_LIMIT",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::TransientServerError => "TRANSIENT_SERVER_ERROR",
            ErrorClass::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure returned by a [`ProviderAdapter`](crate::ProviderAdapter).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{class}: {message}")]
pub struct ProviderError {
    pub class: ErrorClass,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Auth, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::RateLimit, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Timeout, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TransientServerError, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unknown, message)
    }

    /// Error for a non-success HTTP response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::new(ErrorClass::from_status(status_code), body).with_status_code(status_code)
    }

    /// Error for a transport-level failure.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let class = if error.is_timeout() {
            ErrorClass::Timeout
        } else if error.is_connect() {
            ErrorClass::TransientServerError
        } else if error.is_builder() {
            ErrorClass::Validation
        } else if let Some(status) = error.status() {
            ErrorClass::from_status(status.as_u16())
        } else {
            ErrorClass::Unknown
        };

        Self {
            class,
            message: error.to_string(),
            status_code: error.status().map(|s| s.as_u16()),
        }
    }
}

/// Errors surfaced by the router itself. Provider failures never appear here.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Router has no candidates configured")]
    NoCandidates,

    #[error("No adapter registered for provider {0}")]
    MissingAdapter(ProviderKind),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
