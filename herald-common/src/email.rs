//! Outbound email queue entity and its state machine.
//!
//! ```text
//!            claim                send ok
//! Pending ──────────▶ Processing ─────────▶ Sent
//!    ▲  │                  │
//!    │  │ cancel           │ send failed
//!    │  ▼                  ▼
//!    │ Cancelled         Failed ──(retries exhausted)──▶ terminal
//!    │                     │
//!    └─────── retry() ─────┘
//! ```
//!
//! The entity does not lock. Callers claim an item through the store's
//! atomic compare-and-swap before invoking the transition methods.

use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};

use crate::{
    error::{HeraldError, Result},
    id::EmailId,
    status::{Priority, QueueStatus},
};

const fn default_max_retries() -> u32 {
    3
}

/// Everything needed to put a message on the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html_body: String,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl NewEmail {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: None,
            priority: Priority::default(),
            scheduled_for: None,
            max_retries: default_max_retries(),
        }
    }

    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn validate(&self) -> Result<()> {
        for (field, address) in [("to", &self.to), ("from", &self.from)] {
            if !EmailAddress::is_valid(address) {
                return Err(
                    HeraldError::validation(format!("invalid {field} address '{address}'"))
                        .with_detail("field", field),
                );
            }
        }

        for (field, value) in [("subject", &self.subject), ("html_body", &self.html_body)] {
            if value.trim().is_empty() {
                return Err(HeraldError::validation(format!("{field} must not be empty"))
                    .with_detail("field", field));
            }
        }

        Ok(())
    }
}

/// A single outbound email awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailQueueItem {
    pub id: EmailId,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub priority: Priority,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Last delivery error, empty when there is none
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl EmailQueueItem {
    /// Build a pending item from `email`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationFailure` if either address is malformed or the
    /// subject or HTML body is empty.
    pub fn new(email: NewEmail) -> Result<Self> {
        email.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: EmailId::generate(),
            to: email.to,
            from: email.from,
            subject: email.subject,
            html_body: email.html_body,
            text_body: email.text_body.filter(|text| !text.is_empty()),
            priority: email.priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: email.max_retries,
            scheduled_for: email.scheduled_for,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
            sent_at: None,
        })
    }

    /// Whether a worker may pick this item up right now.
    #[must_use]
    pub fn can_be_sent(&self) -> bool {
        self.can_be_sent_at(Utc::now())
    }

    /// [`can_be_sent`](Self::can_be_sent) evaluated against an explicit clock.
    #[must_use]
    pub fn can_be_sent_at(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.scheduled_for.is_none_or(|at| at <= now)
            && self.retry_count < self.max_retries
    }

    /// The caller must have just checked [`can_be_sent`](Self::can_be_sent).
    pub fn mark_as_processing(&mut self) {
        self.status = QueueStatus::Processing;
        self.touch();
    }

    pub fn mark_as_sent(&mut self) {
        let now = Utc::now();
        self.status = QueueStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_as_failed(&mut self, error_message: impl Into<String>) {
        self.status = QueueStatus::Failed;
        self.error_message = error_message.into();
        self.retry_count += 1;
        self.touch();
    }

    /// Fail for good: the attempt counter is raised to `max_retries` so
    /// [`retry`](Self::retry) refuses the item.
    pub fn mark_as_rejected(&mut self, error_message: impl Into<String>) {
        self.mark_as_failed(error_message);
        self.retry_count = self.retry_count.max(self.max_retries);
    }

    /// Put a failed item back on the queue.
    ///
    /// Returns `false`, leaving the item untouched, once `max_retries` is
    /// exhausted.
    pub fn retry(&mut self) -> bool {
        if self.retry_count < self.max_retries {
            self.status = QueueStatus::Pending;
            self.error_message.clear();
            self.touch();
            true
        } else {
            false
        }
    }

    /// # Errors
    ///
    /// `InvalidState` unless the item is still pending.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status != QueueStatus::Pending {
            return Err(HeraldError::invalid_state(format!(
                "email {} is {} and can no longer be cancelled",
                self.id, self.status
            ))
            .with_detail("status", self.status));
        }

        self.status = QueueStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// No further automatic or manual progress is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self.status {
            QueueStatus::Sent | QueueStatus::Cancelled => true,
            QueueStatus::Failed => self.retry_count >= self.max_retries,
            QueueStatus::Pending | QueueStatus::Processing => false,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
