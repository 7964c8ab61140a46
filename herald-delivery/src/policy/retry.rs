//! Retry policy shared by queued emails and newsletter deliveries.
//!
//! Both kinds of work retry the same way: a bounded number of attempts with
//! exponential backoff and jitter. The policy is plain data so it can be
//! deserialised from configuration and reasoned about in isolation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before giving up.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// The actual delay is calculated as: `base * 2^(attempts - 1)`
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Maximum retry delay (in seconds).
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// The delay is randomized within ±`jitter_factor`.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the number of attempts is less than `max_attempts`.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Returns `0` once max attempts has been reached.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    /// Delay before the attempt following `attempt_count` failures.
    ///
    /// `delay = min(base * 2^(attempts - 1), max_delay) * (1 ± jitter)`
    #[must_use]
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_retry_delay_secs
        } else {
            let multiplier = 1u64 << exponent;
            self.base_retry_delay_secs
                .saturating_mul(multiplier)
                .min(self.max_retry_delay_secs)
        };

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let jitter_range = (delay as f64) * self.retry_jitter_factor;
            let jitter: f64 = if jitter_range > 0.0 {
                rand::rng().random_range(-jitter_range..=jitter_range)
            } else {
                0.0
            };
            ((delay as f64) + jitter).max(0.0) as u64
        };

        Duration::from_secs(jittered)
    }

    /// When the next attempt should be made, `attempt_count` failures in.
    #[must_use]
    pub fn calculate_next_retry(&self, attempt_count: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.backoff(attempt_count))
            .unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_retry_delay_secs() -> u64 {
        60
    }

    pub const fn max_retry_delay_secs() -> u64 {
        600
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.1
    }
}
