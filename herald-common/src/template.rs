use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HeraldError, Result};

/// A named, reusable message template.
///
/// The subject and bodies are template sources, rendered with a key-value
/// context at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub text: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailTemplate {
    /// # Errors
    ///
    /// `ValidationFailure` if the name, subject or HTML source is empty.
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Result<Self> {
        let template = Self {
            name: name.into(),
            subject: subject.into(),
            html: html.into(),
            text: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        for (field, value) in [
            ("name", &template.name),
            ("subject", &template.subject),
            ("html", &template.html),
        ] {
            if value.trim().is_empty() {
                return Err(HeraldError::validation(format!(
                    "template {field} must not be empty"
                ))
                .with_detail("field", field));
            }
        }

        Ok(template)
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}
