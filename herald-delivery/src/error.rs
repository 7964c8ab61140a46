//! Typed errors raised by delivery gateways.
//!
//! Gateway failures are split the way SMTP splits them:
//! - Permanent failures (5xx replies, rejected credentials) - don't retry
//! - Temporary failures (4xx replies, connection trouble) - retry with backoff
//!
//! Everything converts into the shared [`HeraldError`] once it leaves the
//! gateway.

use std::time::Duration;

use herald_common::{ErrorCode, HeraldError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The server rejected the message for good (5xx, bad credentials).
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The server or the network failed transiently (4xx, I/O).
    #[error("Temporary failure: {0}")]
    Temporary(String),

    /// The send did not complete within the configured deadline.
    #[error("Timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The message could not be assembled (bad address, bad header).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The gateway itself is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Classify a raw transport error by the SMTP reply codes it mentions.
    ///
    /// Codes are matched on digit boundaries, so a `550` inside an address
    /// does not count.
    pub fn classify(error: impl Into<String>) -> Self {
        let error = error.into();
        let lowered = error.to_lowercase();
        let has_code = |code: &str| {
            error
                .split(|c: char| !c.is_ascii_digit())
                .any(|segment| segment == code)
        };

        let permanent = lowered.contains("authentication")
            || lowered.contains("invalid credentials")
            || ["535", "550", "551", "552", "553", "554"]
                .into_iter()
                .any(has_code);

        if permanent {
            Self::Permanent(error)
        } else {
            Self::Temporary(error)
        }
    }

    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_) | Self::Timeout(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        !self.is_temporary()
    }
}

impl From<GatewayError> for HeraldError {
    fn from(error: GatewayError) -> Self {
        let permanent = error.is_permanent();
        let code = match &error {
            GatewayError::Timeout(_) => ErrorCode::Timeout,
            GatewayError::Configuration(_) => ErrorCode::Configuration,
            GatewayError::Permanent(_)
            | GatewayError::Temporary(_)
            | GatewayError::InvalidMessage(_) => ErrorCode::DeliveryFailure,
        };

        Self::new(code, error.to_string()).with_detail("permanent", permanent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permanent_codes() {
        assert!(GatewayError::classify("550 5.1.1 mailbox unavailable").is_permanent());
        assert!(GatewayError::classify("535 Authentication credentials invalid").is_permanent());
        assert!(GatewayError::classify("permanent error (554): rejected").is_permanent());
    }

    #[test]
    fn test_classify_temporary() {
        assert!(GatewayError::classify("421 Service not available").is_temporary());
        assert!(GatewayError::classify("connection refused").is_temporary());
        // A code-looking fragment inside an address is not a reply code
        assert!(GatewayError::classify("timeout talking to user5501@example.com").is_temporary());
    }

    #[test]
    fn test_conversion_keeps_kind() {
        let err: HeraldError = GatewayError::Timeout(Duration::from_secs(300)).into();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.detail("permanent"), Some("false"));

        let err: HeraldError = GatewayError::Permanent(String::from("550 nope")).into();
        assert_eq!(err.code, ErrorCode::DeliveryFailure);
        assert_eq!(err.detail("permanent"), Some("true"));
    }
}
