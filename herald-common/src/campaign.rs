//! Newsletter campaigns.
//!
//! The campaign row only carries aggregate counters. They are never written
//! through this struct once a dispatch has begun; the store applies
//! [`CampaignCounter`] increments atomically on behalf of the aggregator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{HeraldError, Result},
    id::{CampaignId, SubscriberId},
    status::CampaignStatus,
    subscriber::Subscriber,
};

/// Which subscribers a campaign goes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRule {
    All,
    #[default]
    Active,
    Inactive,
    /// Active subscribers with the given language code
    Language(String),
    Custom(Vec<SubscriberId>),
}

impl TargetRule {
    /// Whether `subscriber` is selected by this rule.
    #[must_use]
    pub fn matches(&self, subscriber: &Subscriber) -> bool {
        match self {
            Self::All => true,
            Self::Active => subscriber.is_active,
            Self::Inactive => !subscriber.is_active,
            Self::Language(code) => {
                subscriber.is_active && subscriber.language.eq_ignore_ascii_case(code)
            }
            Self::Custom(ids) => ids.contains(&subscriber.id),
        }
    }
}

/// Aggregate counter on a [`NewsletterCampaign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignCounter {
    Sent,
    Failed,
    Opened,
    Clicked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterCampaign {
    pub id: CampaignId,
    pub title: String,
    /// Subject line template
    pub subject: String,
    /// HTML body template
    pub content: String,
    /// Registered template wrapping `content`; the built-in layout when unset
    #[serde(default)]
    pub template_name: Option<String>,
    pub status: CampaignStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target: TargetRule,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub sent_count: u64,
    pub failed_count: u64,
    pub opened_count: u64,
    pub clicked_count: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewsletterCampaign {
    /// Create a draft campaign.
    ///
    /// # Errors
    ///
    /// `ValidationFailure` when the title, subject or content is empty.
    pub fn new(
        title: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self> {
        let campaign = Self {
            id: CampaignId::generate(),
            title: title.into(),
            subject: subject.into(),
            content: content.into(),
            template_name: None,
            status: CampaignStatus::Draft,
            scheduled_at: None,
            target: TargetRule::default(),
            variables: BTreeMap::new(),
            sent_count: 0,
            failed_count: 0,
            opened_count: 0,
            clicked_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        for (field, value) in [
            ("title", &campaign.title),
            ("subject", &campaign.subject),
            ("content", &campaign.content),
        ] {
            if value.trim().is_empty() {
                return Err(HeraldError::validation(format!(
                    "campaign {field} must not be empty"
                ))
                .with_detail("field", field));
            }
        }

        Ok(campaign)
    }

    #[must_use]
    pub fn target(mut self, target: TargetRule) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn template(mut self, name: impl Into<String>) -> Self {
        self.template_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Schedule the campaign for `at`, moving it out of draft.
    #[must_use]
    pub const fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self.status = CampaignStatus::Scheduled;
        self
    }

    #[must_use]
    pub fn can_be_sent(&self) -> bool {
        self.can_be_sent_at(Utc::now())
    }

    #[must_use]
    pub fn can_be_sent_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, CampaignStatus::Draft | CampaignStatus::Scheduled)
            && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Percentage of attempted deliveries that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.sent_count + self.failed_count;
        if attempted == 0 {
            0.0
        } else {
            self.sent_count as f64 / attempted as f64 * 100.0
        }
    }

    #[must_use]
    pub const fn counter(&self, counter: CampaignCounter) -> u64 {
        match counter {
            CampaignCounter::Sent => self.sent_count,
            CampaignCounter::Failed => self.failed_count,
            CampaignCounter::Opened => self.opened_count,
            CampaignCounter::Clicked => self.clicked_count,
        }
    }

    /// Apply a signed delta to a counter, saturating at zero.
    ///
    /// Only the store calls this, while holding the campaign row.
    pub fn adjust(&mut self, counter: CampaignCounter, delta: i64) {
        let slot = match counter {
            CampaignCounter::Sent => &mut self.sent_count,
            CampaignCounter::Failed => &mut self.failed_count,
            CampaignCounter::Opened => &mut self.opened_count,
            CampaignCounter::Clicked => &mut self.clicked_count,
        };

        *slot = slot.saturating_add_signed(delta);
    }

    /// Move to `status`, stamping `started_at`/`completed_at` as appropriate.
    pub fn set_status(&mut self, status: CampaignStatus) {
        let now = Utc::now();
        match status {
            CampaignStatus::Sending => self.started_at = Some(now),
            CampaignStatus::Completed | CampaignStatus::Failed => self.completed_at = Some(now),
            CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Cancelled => {}
        }
        self.status = status;
    }
}
