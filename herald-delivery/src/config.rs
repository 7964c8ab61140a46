use std::time::Duration;

use serde::Deserialize;

use crate::policy::{RateLimitConfig, RetryPolicy};

const fn default_process_interval() -> u64 {
    10
}

const fn default_schedule_interval() -> u64 {
    60
}

const fn default_maintenance_interval() -> u64 {
    3600
}

const fn default_batch_size() -> usize {
    50
}

const fn default_max_concurrent_deliveries() -> usize {
    10
}

const fn default_send_timeout() -> u64 {
    300
}

const fn default_failed_email_max_age_days() -> u64 {
    7
}

const fn default_campaign_max_age_days() -> u64 {
    30
}

fn default_from() -> String {
    String::from("noreply@localhost")
}

fn default_site_url() -> String {
    String::from("http://localhost:8000")
}

/// Settings shared by the queue processor and the campaign orchestrator
///
/// Built once at startup and never mutated afterwards.
///
/// ```ron
/// delivery: (
///     process_interval_secs: 10,
///     batch_size: 50,
///     default_from: "news@example.org",
///     site_url: "https://example.org",
///     retry: (max_attempts: 3),
///     rate_limit: (per_minute: Some(60)),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// How often the email queue is drained (in seconds)
    #[serde(default = "default_process_interval")]
    pub process_interval_secs: u64,

    /// How often scheduled campaigns are checked (in seconds)
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_secs: u64,

    /// How often retry and cleanup jobs run (in seconds)
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Queue items picked up per pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on gateway calls in flight, for queue passes and for each
    /// campaign dispatch
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// Deadline for a single gateway send (in seconds)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Sender used for campaign mail
    #[serde(default = "default_from")]
    pub default_from: String,

    /// Base URL used to build unsubscribe links
    #[serde(default = "default_site_url")]
    pub site_url: String,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Failed queue items untouched for this long are deleted
    #[serde(default = "default_failed_email_max_age_days")]
    pub failed_email_max_age_days: u64,

    /// Finished campaigns older than this are deleted with their logs
    #[serde(default = "default_campaign_max_age_days")]
    pub campaign_max_age_days: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            process_interval_secs: default_process_interval(),
            schedule_interval_secs: default_schedule_interval(),
            maintenance_interval_secs: default_maintenance_interval(),
            batch_size: default_batch_size(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            send_timeout_secs: default_send_timeout(),
            default_from: default_from(),
            site_url: default_site_url(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            failed_email_max_age_days: default_failed_email_max_age_days(),
            campaign_max_age_days: default_campaign_max_age_days(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Concurrency bound, never below one.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_deliveries.max(1)
    }

    #[must_use]
    pub fn failed_email_max_age(&self) -> chrono::Duration {
        days(self.failed_email_max_age_days)
    }

    #[must_use]
    pub fn campaign_max_age(&self) -> chrono::Duration {
        days(self.campaign_max_age_days)
    }
}

fn days(days: u64) -> chrono::Duration {
    i64::try_from(days)
        .ok()
        .and_then(chrono::Duration::try_days)
        .unwrap_or(chrono::Duration::MAX)
}
