//! Sending rate limits using the token bucket algorithm
//!
//! Outbound volume is capped over three windows at once (per minute, per
//! hour, per day), with optional tighter per-minute limits for individual
//! recipient domains. A send must find a token in every applicable bucket;
//! otherwise nothing is consumed and the caller is told how long to wait.
//!
//! # Token Bucket Algorithm
//!
//! - Each bucket holds at most `limit` tokens and starts full
//! - Tokens refill continuously at `limit / window`
//! - Each message consumes one token from every bucket it is subject to
//!
//! A limit of zero is refused when configuration is read; `None` is the way
//! to switch a window off.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use herald_common::tracing;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages allowed per minute (omit for no limit)
    #[serde(default = "default_per_minute", deserialize_with = "non_zero")]
    pub per_minute: Option<u32>,

    /// Messages allowed per hour (omit for no limit)
    #[serde(default = "default_per_hour", deserialize_with = "non_zero")]
    pub per_hour: Option<u32>,

    /// Messages allowed per day (omit for no limit)
    #[serde(default = "default_per_day", deserialize_with = "non_zero")]
    pub per_day: Option<u32>,

    /// Per recipient domain messages-per-minute overrides
    #[serde(default, deserialize_with = "non_zero_domains")]
    pub domain_limits: ahash::AHashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            per_day: default_per_day(),
            domain_limits: ahash::AHashMap::default(),
        }
    }
}

impl RateLimitConfig {
    /// A configuration that never limits.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            per_minute: None,
            per_hour: None,
            per_day: None,
            domain_limits: ahash::AHashMap::default(),
        }
    }
}

fn non_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    match Option::<u32>::deserialize(deserializer)? {
        Some(0) => Err(D::Error::custom(
            "a rate limit of 0 never allows a send, use None to disable the limit",
        )),
        limit => Ok(limit),
    }
}

fn non_zero_domains<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ahash::AHashMap<String, u32>, D::Error> {
    let limits = ahash::AHashMap::<String, u32>::deserialize(deserializer)?;
    if let Some((domain, _)) = limits.iter().find(|(_, limit)| **limit == 0) {
        return Err(D::Error::custom(format!(
            "rate limit for {domain} is 0, remove the entry to disable it"
        )));
    }
    Ok(limits)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_per_minute() -> Option<u32> {
    Some(60)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_per_hour() -> Option<u32> {
    Some(1000)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_per_day() -> Option<u32> {
    Some(10_000)
}

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: u32, window: Duration) -> Self {
        let capacity = f64::from(limit);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / window.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    /// Time until one token is available, zero if one already is.
    fn wait_time(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else if self.refill_rate <= 0.0 {
            Duration::MAX
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

/// A zero limit can only come from code (deserialisation refuses it) and is
/// treated as no limit, since an empty bucket would never refill.
fn bucket(limit: Option<u32>, window: Duration) -> Option<TokenBucket> {
    match limit {
        Some(0) => {
            tracing::warn!(window_secs = window.as_secs(), "Ignoring a rate limit of 0");
            None
        }
        limit => limit.map(|limit| TokenBucket::new(limit, window)),
    }
}

/// Global and per-domain send limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    global: Mutex<Vec<TokenBucket>>,
    domains: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let global = [
            (config.per_minute, MINUTE),
            (config.per_hour, HOUR),
            (config.per_day, DAY),
        ]
        .into_iter()
        .filter_map(|(limit, window)| bucket(limit, window))
        .collect();

        Self {
            config,
            global: Mutex::new(global),
            domains: DashMap::new(),
        }
    }

    fn domain_bucket(&self, domain: &str) -> Option<Arc<Mutex<TokenBucket>>> {
        let limit = *self.config.domain_limits.get(domain)?;
        if limit == 0 {
            return None;
        }

        Some(
            self.domains
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(limit, MINUTE))))
                .clone(),
        )
    }

    /// Check whether a message to `recipient` can be sent now.
    ///
    /// Returns `Ok(())` and consumes a token if allowed, `Err(Duration)`
    /// with the wait time if rate limited.
    pub fn check(&self, recipient: &str) -> Result<(), Duration> {
        let domain = recipient
            .rsplit_once('@')
            .map_or(recipient, |(_, domain)| domain)
            .to_ascii_lowercase();

        let now = Instant::now();
        let domain_bucket = self.domain_bucket(&domain);

        // Lock order is always global, then domain
        let mut global = self.global.lock();
        let mut local = domain_bucket.as_ref().map(|bucket| bucket.lock());

        let mut wait = Duration::ZERO;
        for bucket in global.iter_mut().chain(local.as_deref_mut()) {
            bucket.refill(now);
            wait = wait.max(bucket.wait_time());
        }

        if wait > Duration::ZERO {
            drop(local);
            drop(global);
            tracing::debug!(
                domain = %domain,
                wait_seconds = wait.as_secs_f64(),
                "Rate limit exceeded, must wait"
            );
            return Err(wait);
        }

        for bucket in global.iter_mut().chain(local.as_deref_mut()) {
            bucket.tokens -= 1.0;
        }

        Ok(())
    }
}
