//! The tagged error shared by every herald crate.
//!
//! Rather than a hierarchy of error types, failures carry an [`ErrorCode`]
//! that decides how they propagate, a human readable message, and a flat map
//! of structured details (ids, limits, SMTP replies) for operators.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure, which decides how it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Campaign, subscriber, queue item, log or template absent. Never retried.
    NotFound,
    /// Operation attempted on an entity in the wrong status. Nothing was mutated.
    InvalidState,
    /// Transport, authentication or recipient rejection from the gateway.
    DeliveryFailure,
    /// Missing or malformed field on entity creation. Never persisted.
    ValidationFailure,
    /// Sending volume over the configured thresholds; defer and try again.
    RateLimitExceeded,
    /// A template failed to compile or render.
    Template,
    /// The persistence layer failed.
    Storage,
    /// Invalid or incomplete configuration.
    Configuration,
    /// An operation exceeded its deadline.
    Timeout,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::DeliveryFailure => "delivery_failure",
            Self::ValidationFailure => "validation_failure",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::Template => "template",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Timeout => "timeout",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct HeraldError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

pub type Result<T, E = HeraldError> = std::result::Result<T, E>;

impl HeraldError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    /// Attach a structured detail, replacing any previous value for `key`.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    pub fn not_found(resource: &str, id: impl Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{resource} {id} not found"))
            .with_detail("resource", resource)
            .with_detail("id", id)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailure, message)
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeliveryFailure, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Storage, message)
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Template, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Returns `true` if trying again later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::DeliveryFailure | ErrorCode::RateLimitExceeded | ErrorCode::Timeout
        )
    }
}
