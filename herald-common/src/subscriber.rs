use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};

use crate::{
    error::{HeraldError, Result},
    id::SubscriberId,
};

fn default_language() -> String {
    String::from("en")
}

/// A newsletter recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "default_language")]
    pub language: String,
    pub subscribed_at: DateTime<Utc>,
}

const fn default_active() -> bool {
    true
}

impl Subscriber {
    /// # Errors
    ///
    /// `ValidationFailure` if `email` is not a valid address.
    pub fn new(email: impl Into<String>) -> Result<Self> {
        let email = email.into();
        if !EmailAddress::is_valid(&email) {
            return Err(
                HeraldError::validation(format!("invalid subscriber address '{email}'"))
                    .with_detail("field", "email"),
            );
        }

        Ok(Self {
            id: SubscriberId::generate(),
            email,
            first_name: None,
            last_name: None,
            is_active: true,
            language: default_language(),
            subscribed_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn named(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub const fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// "First Last", or "Subscriber" when neither name is known.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if full.is_empty() {
            String::from("Subscriber")
        } else {
            full
        }
    }
}
