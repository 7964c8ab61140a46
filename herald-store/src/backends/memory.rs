use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::{
    CampaignCounter, CampaignId, CampaignStatus, EmailId, EmailQueueItem, EmailTemplate,
    NewsletterCampaign, NewsletterDeliveryLog, QueueStatus, Subscriber, SubscriberId, TargetRule,
};

use crate::{StoreError, r#trait::Store};

#[derive(Debug, Default)]
struct Tables {
    emails: DashMap<EmailId, EmailQueueItem>,
    campaigns: DashMap<CampaignId, NewsletterCampaign>,
    subscribers: DashMap<SubscriberId, Subscriber>,
    /// Keyed by the pair so the uniqueness constraint is the map key itself
    logs: DashMap<(CampaignId, SubscriberId), NewsletterDeliveryLog>,
    templates: DashMap<String, EmailTemplate>,
}

/// In-memory store
///
/// Each table is a `DashMap`, so every conditional update runs under the
/// shard lock of the row it touches. Clones share the same tables.
///
/// # Capacity Management
/// The queue table can be bounded; once full, `insert_email` fails until
/// items are deleted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
    /// Maximum number of queued emails (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store holding at most `capacity` queued emails
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tables: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of queued emails, in any status
    #[must_use]
    pub fn email_count(&self) -> usize {
        self.tables.emails.len()
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

fn insert_unique<K, V>(
    table: &DashMap<K, V>,
    key: K,
    value: &V,
    resource: &'static str,
    id: impl ToString,
) -> crate::Result<()>
where
    K: Eq + std::hash::Hash,
    V: Clone,
{
    match table.entry(key) {
        Entry::Occupied(_) => Err(StoreError::already_exists(resource, id)),
        Entry::Vacant(slot) => {
            slot.insert(value.clone());
            Ok(())
        }
    }
}

fn get_cloned<K, V>(
    table: &DashMap<K, V>,
    key: &K,
    resource: &'static str,
    id: impl ToString,
) -> crate::Result<V>
where
    K: Eq + std::hash::Hash,
    V: Clone,
{
    table
        .get(key)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| StoreError::not_found(resource, id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_email(&self, item: &EmailQueueItem) -> crate::Result<()> {
        if let Some(capacity) = self.capacity {
            let used = self.tables.emails.len();
            if used >= capacity {
                return Err(StoreError::CapacityExceeded { used, capacity });
            }
        }

        insert_unique(&self.tables.emails, item.id, item, "email", item.id)
    }

    async fn email(&self, id: EmailId) -> crate::Result<EmailQueueItem> {
        get_cloned(&self.tables.emails, &id, "email", id)
    }

    async fn update_email(&self, item: &EmailQueueItem) -> crate::Result<()> {
        let mut stored = self
            .tables
            .emails
            .get_mut(&item.id)
            .ok_or_else(|| StoreError::not_found("email", item.id))?;
        *stored = item.clone();
        Ok(())
    }

    async fn claim_email(
        &self,
        id: EmailId,
        now: DateTime<Utc>,
    ) -> crate::Result<Option<EmailQueueItem>> {
        let mut item = self
            .tables
            .emails
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("email", id))?;

        if !item.can_be_sent_at(now) {
            return Ok(None);
        }

        item.mark_as_processing();
        Ok(Some(item.value().clone()))
    }

    async fn ready_emails(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> crate::Result<Vec<EmailQueueItem>> {
        let mut ready: Vec<EmailQueueItem> = self
            .tables
            .emails
            .iter()
            .filter(|entry| entry.can_be_sent_at(now))
            .map(|entry| entry.value().clone())
            .collect();

        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        ready.truncate(limit);

        Ok(ready)
    }

    async fn emails_with_status(&self, status: QueueStatus) -> crate::Result<Vec<EmailQueueItem>> {
        let mut items: Vec<EmailQueueItem> = self
            .tables
            .emails
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();

        // ULIDs are lexicographically sortable by creation time
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn delete_email(&self, id: EmailId) -> crate::Result<()> {
        self.tables
            .emails
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("email", id))
    }

    async fn insert_campaign(&self, campaign: &NewsletterCampaign) -> crate::Result<()> {
        insert_unique(
            &self.tables.campaigns,
            campaign.id,
            campaign,
            "campaign",
            campaign.id,
        )
    }

    async fn campaign(&self, id: CampaignId) -> crate::Result<NewsletterCampaign> {
        get_cloned(&self.tables.campaigns, &id, "campaign", id)
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> crate::Result<bool> {
        let mut campaign = self
            .tables
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("campaign", id))?;

        if from.contains(&campaign.status) {
            campaign.set_status(to);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn adjust_counter(
        &self,
        id: CampaignId,
        counter: CampaignCounter,
        delta: i64,
    ) -> crate::Result<()> {
        self.tables
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("campaign", id))?
            .adjust(counter, delta);
        Ok(())
    }

    async fn campaigns_with_status(
        &self,
        status: CampaignStatus,
    ) -> crate::Result<Vec<NewsletterCampaign>> {
        let mut campaigns: Vec<NewsletterCampaign> = self
            .tables
            .campaigns
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();

        campaigns.sort_by_key(|campaign| campaign.id);
        Ok(campaigns)
    }

    async fn delete_campaign(&self, id: CampaignId) -> crate::Result<()> {
        self.tables
            .campaigns
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("campaign", id))?;

        self.tables.logs.retain(|(campaign, _), _| *campaign != id);
        Ok(())
    }

    async fn insert_subscriber(&self, subscriber: &Subscriber) -> crate::Result<()> {
        insert_unique(
            &self.tables.subscribers,
            subscriber.id,
            subscriber,
            "subscriber",
            subscriber.id,
        )
    }

    async fn subscriber(&self, id: SubscriberId) -> crate::Result<Subscriber> {
        get_cloned(&self.tables.subscribers, &id, "subscriber", id)
    }

    async fn resolve_subscribers(&self, rule: &TargetRule) -> crate::Result<Vec<Subscriber>> {
        let mut selected = if let TargetRule::Custom(ids) = rule {
            ids.iter()
                .map(|id| get_cloned(&self.tables.subscribers, id, "subscriber", id))
                .collect::<crate::Result<Vec<_>>>()?
        } else {
            self.tables
                .subscribers
                .iter()
                .filter(|entry| rule.matches(entry.value()))
                .map(|entry| entry.value().clone())
                .collect()
        };

        selected.sort_by_key(|subscriber| subscriber.id);
        selected.dedup_by_key(|subscriber| subscriber.id);
        Ok(selected)
    }

    async fn insert_log(&self, log: &NewsletterDeliveryLog) -> crate::Result<()> {
        insert_unique(
            &self.tables.logs,
            (log.campaign, log.subscriber),
            log,
            "delivery log",
            format!("{}/{}", log.campaign, log.subscriber),
        )
    }

    async fn log(
        &self,
        campaign: CampaignId,
        subscriber: SubscriberId,
    ) -> crate::Result<NewsletterDeliveryLog> {
        get_cloned(
            &self.tables.logs,
            &(campaign, subscriber),
            "delivery log",
            format!("{campaign}/{subscriber}"),
        )
    }

    async fn update_log(&self, log: &NewsletterDeliveryLog) -> crate::Result<()> {
        match self.tables.logs.get_mut(&(log.campaign, log.subscriber)) {
            Some(mut stored) if stored.id == log.id => {
                *stored = log.clone();
                Ok(())
            }
            _ => Err(StoreError::not_found("delivery log", log.id)),
        }
    }

    async fn campaign_logs(
        &self,
        campaign: CampaignId,
    ) -> crate::Result<Vec<NewsletterDeliveryLog>> {
        let mut logs: Vec<NewsletterDeliveryLog> = self
            .tables
            .logs
            .iter()
            .filter(|entry| entry.key().0 == campaign)
            .map(|entry| entry.value().clone())
            .collect();

        logs.sort_by_key(|log| log.subscriber);
        Ok(logs)
    }

    async fn save_template(&self, template: &EmailTemplate) -> crate::Result<()> {
        self.tables
            .templates
            .insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn template(&self, name: &str) -> crate::Result<EmailTemplate> {
        self.tables
            .templates
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found("template", name))
    }
}
