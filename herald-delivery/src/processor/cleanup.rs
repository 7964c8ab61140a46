//! Periodic maintenance: requeueing failed emails and pruning old rows.

use chrono::Utc;
use herald_common::{
    CampaignStatus, HeraldError, QueueStatus,
    tracing::{self, error, info, warn},
};
use herald_tracing::traced;

use crate::processor::QueueProcessor;

impl QueueProcessor {
    /// Run every maintenance job once, logging failures.
    pub async fn run_maintenance(&self) {
        if let Err(e) = self.retry_failed_emails().await {
            error!(error = %e, "Failed to requeue failed emails");
        }

        if let Err(e) = self
            .cleanup_failed_emails(self.config.failed_email_max_age())
            .await
        {
            error!(error = %e, "Failed to clean up failed emails");
        }

        if let Err(e) = self
            .cleanup_finished_campaigns(self.config.campaign_max_age())
            .await
        {
            error!(error = %e, "Failed to clean up finished campaigns");
        }
    }

    /// Put every failed email with attempts left back on the queue.
    ///
    /// Returns the number requeued.
    ///
    /// # Errors
    ///
    /// `Storage` if the store cannot be read or written.
    #[traced(instrument(skip(self), ret, err, level = tracing::Level::DEBUG))]
    pub async fn retry_failed_emails(&self) -> Result<usize, HeraldError> {
        let mut requeued = 0;

        for mut item in self.store.emails_with_status(QueueStatus::Failed).await? {
            if item.retry() {
                item.scheduled_for = None;
                self.store.update_email(&item).await?;
                requeued += 1;
            }
        }

        if requeued > 0 {
            info!(requeued, "Failed emails requeued");
        }

        Ok(requeued)
    }

    /// Delete failed emails not updated for `max_age`.
    ///
    /// # Errors
    ///
    /// `Storage` if the store cannot be read or written.
    #[traced(instrument(skip(self), ret, err, level = tracing::Level::DEBUG))]
    pub async fn cleanup_failed_emails(
        &self,
        max_age: chrono::Duration,
    ) -> Result<usize, HeraldError> {
        let cutoff = Utc::now() - max_age;
        let mut deleted = 0;

        for item in self.store.emails_with_status(QueueStatus::Failed).await? {
            if item.updated_at < cutoff {
                self.store.delete_email(item.id).await?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(deleted, "Old failed emails removed");
        }

        Ok(deleted)
    }

    /// Delete completed and failed campaigns, with their logs, that
    /// finished more than `max_age` ago.
    ///
    /// # Errors
    ///
    /// `Storage` if the store cannot be read or written.
    #[traced(instrument(skip(self), ret, err, level = tracing::Level::DEBUG))]
    pub async fn cleanup_finished_campaigns(
        &self,
        max_age: chrono::Duration,
    ) -> Result<usize, HeraldError> {
        let cutoff = Utc::now() - max_age;
        let mut deleted = 0;

        for status in [CampaignStatus::Completed, CampaignStatus::Failed] {
            for campaign in self.store.campaigns_with_status(status).await? {
                if campaign.completed_at.is_some_and(|at| at < cutoff) {
                    self.store.delete_campaign(campaign.id).await?;
                    deleted += 1;
                }
            }
        }

        if deleted > 0 {
            info!(deleted, "Old campaigns removed");
        }

        Ok(deleted)
    }

    /// Probe the gateway.
    ///
    /// # Errors
    ///
    /// The gateway failure, converted.
    pub async fn test_connection(&self) -> Result<(), HeraldError> {
        self.gateway.test_connection().await.map_err(|e| {
            warn!(error = %e, "Gateway connection test failed");
            HeraldError::from(e)
        })
    }
}
