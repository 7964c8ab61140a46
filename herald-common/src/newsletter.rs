//! Per-subscriber record of one campaign delivery.
//!
//! Engagement only ever moves forward: `sent -> opened -> clicked`. The first
//! open and first click timestamps are kept forever, so repeated tracking
//! callbacks (webmail prefetchers, double clicks) are harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    id::{CampaignId, LogId, SubscriberId},
    status::LogStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterDeliveryLog {
    pub id: LogId,
    pub campaign: CampaignId,
    pub subscriber: SubscriberId,
    pub status: LogStatus,
    pub retry_count: u32,
    pub error_message: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewsletterDeliveryLog {
    #[must_use]
    pub fn new(campaign: CampaignId, subscriber: SubscriberId) -> Self {
        let now = Utc::now();
        Self {
            id: LogId::generate(),
            campaign,
            subscriber,
            status: LogStatus::Pending,
            retry_count: 0,
            error_message: String::new(),
            sent_at: None,
            opened_at: None,
            clicked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_as_sending(&mut self) {
        self.status = LogStatus::Sending;
        self.touch();
    }

    pub fn mark_as_sent(&mut self) {
        let now = Utc::now();
        self.status = LogStatus::Sent;
        self.sent_at.get_or_insert(now);
        self.updated_at = now;
    }

    pub fn mark_as_failed(&mut self, error_message: impl Into<String>) {
        self.status = LogStatus::Failed;
        self.error_message = error_message.into();
        self.retry_count += 1;
        self.touch();
    }

    pub fn mark_as_bounced(&mut self, error_message: impl Into<String>) {
        self.status = LogStatus::Bounced;
        self.error_message = error_message.into();
        self.touch();
    }

    /// Record an open. Returns `true` only for the first one.
    pub fn mark_as_opened(&mut self) -> bool {
        let now = Utc::now();
        let first = self.opened_at.is_none();
        self.opened_at.get_or_insert(now);

        if self.status != LogStatus::Clicked {
            self.status = LogStatus::Opened;
        }

        self.updated_at = now;
        first
    }

    /// Record a click. Returns `true` only for the first one.
    pub fn mark_as_clicked(&mut self) -> bool {
        let now = Utc::now();
        let first = self.clicked_at.is_none();
        self.clicked_at.get_or_insert(now);
        self.status = LogStatus::Clicked;
        self.updated_at = now;
        first
    }

    /// Queue a failed delivery for another attempt.
    ///
    /// Only `failed` logs with attempts left are moved back to `pending`;
    /// anything else is left untouched and `false` is returned.
    pub fn retry(&mut self, max_retries: u32) -> bool {
        if self.status == LogStatus::Failed && self.retry_count < max_retries {
            self.status = LogStatus::Pending;
            self.error_message.clear();
            self.touch();
            true
        } else {
            false
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
