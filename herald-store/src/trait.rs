use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{
    CampaignCounter, CampaignId, CampaignStatus, EmailId, EmailQueueItem, EmailTemplate,
    NewsletterCampaign, NewsletterDeliveryLog, QueueStatus, Subscriber, SubscriberId, TargetRule,
};

/// Persistence port for every herald entity.
///
/// Entity methods never lock. Whenever more than one worker may touch the
/// same row, the store offers a single conditional update (`claim_email`,
/// `transition_campaign`, `adjust_counter`) that the caller must use instead
/// of a read-modify-write.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    // -- queue items --

    /// Persist a new queue item.
    ///
    /// # Errors
    /// If an item with the same id exists, or the backend is full
    async fn insert_email(&self, item: &EmailQueueItem) -> crate::Result<()>;

    /// # Errors
    /// If the item does not exist
    async fn email(&self, id: EmailId) -> crate::Result<EmailQueueItem>;

    /// Replace a stored queue item.
    ///
    /// # Errors
    /// If the item does not exist
    async fn update_email(&self, item: &EmailQueueItem) -> crate::Result<()>;

    /// Atomically move an item from `pending` to `processing`.
    ///
    /// Succeeds only if the stored item still satisfies
    /// `can_be_sent_at(now)`; returns `None` when another worker won or the
    /// item is no longer eligible.
    ///
    /// # Errors
    /// If the item does not exist
    async fn claim_email(
        &self,
        id: EmailId,
        now: DateTime<Utc>,
    ) -> crate::Result<Option<EmailQueueItem>>;

    /// Items that may be sent at `now`, highest priority first, oldest first
    /// within a priority.
    ///
    /// # Errors
    /// If the backend cannot be read
    async fn ready_emails(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> crate::Result<Vec<EmailQueueItem>>;

    /// # Errors
    /// If the backend cannot be read
    async fn emails_with_status(&self, status: QueueStatus) -> crate::Result<Vec<EmailQueueItem>>;

    /// # Errors
    /// If the item does not exist
    async fn delete_email(&self, id: EmailId) -> crate::Result<()>;

    // -- campaigns --

    /// # Errors
    /// If a campaign with the same id exists
    async fn insert_campaign(&self, campaign: &NewsletterCampaign) -> crate::Result<()>;

    /// # Errors
    /// If the campaign does not exist
    async fn campaign(&self, id: CampaignId) -> crate::Result<NewsletterCampaign>;

    /// Compare-and-swap the campaign status.
    ///
    /// Moves to `to` only when the current status is one of `from`, stamping
    /// `started_at`/`completed_at`. Returns whether the transition happened.
    ///
    /// # Errors
    /// If the campaign does not exist
    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> crate::Result<bool>;

    /// Atomically add `delta` to one of the campaign's counters.
    ///
    /// # Errors
    /// If the campaign does not exist
    async fn adjust_counter(
        &self,
        id: CampaignId,
        counter: CampaignCounter,
        delta: i64,
    ) -> crate::Result<()>;

    /// # Errors
    /// If the backend cannot be read
    async fn campaigns_with_status(
        &self,
        status: CampaignStatus,
    ) -> crate::Result<Vec<NewsletterCampaign>>;

    /// Remove a campaign together with its delivery logs.
    ///
    /// # Errors
    /// If the campaign does not exist
    async fn delete_campaign(&self, id: CampaignId) -> crate::Result<()>;

    // -- subscribers --

    /// # Errors
    /// If a subscriber with the same id exists
    async fn insert_subscriber(&self, subscriber: &Subscriber) -> crate::Result<()>;

    /// # Errors
    /// If the subscriber does not exist
    async fn subscriber(&self, id: SubscriberId) -> crate::Result<Subscriber>;

    /// Subscribers selected by `rule`, ordered by id.
    ///
    /// # Errors
    /// If a `Custom` rule names a subscriber that does not exist
    async fn resolve_subscribers(&self, rule: &TargetRule) -> crate::Result<Vec<Subscriber>>;

    // -- delivery logs --

    /// Persist a new log.
    ///
    /// # Errors
    /// If a log for the same (campaign, subscriber) pair already exists
    async fn insert_log(&self, log: &NewsletterDeliveryLog) -> crate::Result<()>;

    /// # Errors
    /// If there is no log for the pair
    async fn log(
        &self,
        campaign: CampaignId,
        subscriber: SubscriberId,
    ) -> crate::Result<NewsletterDeliveryLog>;

    /// # Errors
    /// If the log does not exist
    async fn update_log(&self, log: &NewsletterDeliveryLog) -> crate::Result<()>;

    /// # Errors
    /// If the backend cannot be read
    async fn campaign_logs(&self, campaign: CampaignId)
    -> crate::Result<Vec<NewsletterDeliveryLog>>;

    // -- templates --

    /// Store a template, replacing any previous one with the same name.
    ///
    /// # Errors
    /// If the backend refuses the write
    async fn save_template(&self, template: &EmailTemplate) -> crate::Result<()>;

    /// # Errors
    /// If no template has that name
    async fn template(&self, name: &str) -> crate::Result<EmailTemplate>;
}
