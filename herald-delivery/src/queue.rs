//! Producer side of the transactional email queue.

use std::sync::Arc;

use herald_common::{
    EmailId, EmailQueueItem, HeraldError, NewEmail, Priority, internal,
    tracing::{info, warn},
};
use herald_store::Store;

use crate::template::{TemplateContext, TemplateRenderer};

/// Validates, renders and persists emails for the queue processor to send
#[derive(Debug, Clone)]
pub struct EmailQueue {
    store: Arc<dyn Store>,
    renderer: Arc<TemplateRenderer>,
    default_from: String,
    max_retries: u32,
}

impl EmailQueue {
    pub fn new(
        store: Arc<dyn Store>,
        renderer: Arc<TemplateRenderer>,
        default_from: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            renderer,
            default_from: default_from.into(),
            max_retries,
        }
    }

    /// Persist a new pending item.
    ///
    /// # Errors
    ///
    /// `ValidationFailure` for a malformed email, `Storage` if the store
    /// refuses the write.
    pub async fn enqueue(&self, email: NewEmail) -> Result<EmailQueueItem, HeraldError> {
        let item = EmailQueueItem::new(email)?;
        self.store.insert_email(&item).await?;

        internal!(
            level = DEBUG,
            "Queued email {} to {} ({})",
            item.id,
            item.to,
            item.priority
        );
        Ok(item)
    }

    /// Render the named template and queue the result.
    ///
    /// `from` falls back to the configured default sender.
    ///
    /// # Errors
    ///
    /// `NotFound` if the template is missing or inactive, `Template` if it
    /// fails to render, plus anything [`enqueue`](Self::enqueue) returns.
    pub async fn send_template_email(
        &self,
        template: &str,
        context: &TemplateContext,
        to: &str,
        from: Option<&str>,
        priority: Priority,
    ) -> Result<EmailQueueItem, HeraldError> {
        let stored = self.store.template(template).await?;
        if !stored.is_active {
            return Err(HeraldError::not_found("template", template).with_detail("active", false));
        }

        let rendered = self.renderer.render(&stored, context)?;
        let mut email = NewEmail::new(
            to,
            from.unwrap_or(&self.default_from),
            rendered.subject,
            rendered.html,
        )
        .priority(priority)
        .max_retries(self.max_retries);

        if let Some(text) = rendered.text {
            email = email.text_body(text);
        }

        self.enqueue(email).await
    }

    /// Render and queue one email per `(context, recipient)` pair.
    ///
    /// Individual failures are logged and skipped. Returns how many items
    /// were queued.
    ///
    /// # Errors
    ///
    /// `NotFound` if the template is missing or inactive; nothing is queued.
    pub async fn send_bulk_template_emails(
        &self,
        template: &str,
        recipients: &[(TemplateContext, String)],
        from: Option<&str>,
        priority: Priority,
    ) -> Result<usize, HeraldError> {
        let stored = self.store.template(template).await?;
        if !stored.is_active {
            return Err(HeraldError::not_found("template", template).with_detail("active", false));
        }

        let mut queued = 0;
        for (context, to) in recipients {
            match self
                .send_template_email(template, context, to, from, priority)
                .await
            {
                Ok(_) => queued += 1,
                Err(err) => {
                    warn!(template, recipient = %to, error = %err, "Skipping bulk email");
                }
            }
        }

        info!(
            template,
            queued,
            requested = recipients.len(),
            "Bulk template emails queued"
        );
        Ok(queued)
    }

    /// Cancel a pending item.
    ///
    /// # Errors
    ///
    /// `NotFound` if the item does not exist, `InvalidState` unless it is
    /// still pending.
    pub async fn cancel(&self, id: EmailId) -> Result<EmailQueueItem, HeraldError> {
        let mut item = self.store.email(id).await?;
        item.cancel()?;
        self.store.update_email(&item).await?;

        internal!(level = DEBUG, "Cancelled email {}", id);
        Ok(item)
    }
}
