//! Newsletter campaign orchestration
//!
//! A dispatch resolves the campaign's audience, creates one delivery log per
//! subscriber and fans out one delivery unit per subscriber. Units report
//! over a channel to a single aggregator task, which owns every counter
//! update and the final status transition.

mod aggregator;
mod unit;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_common::{
    CampaignCounter, CampaignId, CampaignStatus, EmailTemplate, HeraldError, NewsletterCampaign,
    NewsletterDeliveryLog, SubscriberId, internal,
    tracing::{self, error, info, warn},
};
use herald_store::Store;
use herald_tracing::traced;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};

use crate::{
    DeliveryConfig, gateway::DeliveryGateway, policy::RateLimiter, template::TemplateRenderer,
};
use unit::DispatchContext;

#[derive(Debug, Clone, Copy)]
enum Engagement {
    Open,
    Click,
}

const DISPATCHABLE: [CampaignStatus; 2] = [CampaignStatus::Draft, CampaignStatus::Scheduled];

/// Final counters of a campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSummary {
    pub campaign: CampaignId,
    pub status: CampaignStatus,
    pub sent: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
    /// Percentage of attempted deliveries that succeeded
    pub success_rate: f64,
}

impl From<&NewsletterCampaign> for CampaignSummary {
    fn from(campaign: &NewsletterCampaign) -> Self {
        Self {
            campaign: campaign.id,
            status: campaign.status,
            sent: campaign.sent_count,
            failed: campaign.failed_count,
            opened: campaign.opened_count,
            clicked: campaign.clicked_count,
            success_rate: campaign.success_rate(),
        }
    }
}

/// A dispatched campaign.
///
/// Dropping the handle does not stop delivery.
#[derive(Debug)]
pub struct DispatchHandle {
    pub campaign: CampaignId,
    /// Number of delivery units started
    pub scheduled: usize,
    completion: JoinHandle<Result<CampaignSummary, HeraldError>>,
}

impl DispatchHandle {
    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    /// Wait for every unit to report and the campaign to be finalised.
    ///
    /// # Errors
    ///
    /// A store failure while finalising, or the aggregator task dying.
    pub async fn wait(self) -> Result<CampaignSummary, HeraldError> {
        self.completion.await.map_err(|e| {
            HeraldError::delivery(format!("campaign aggregator failed: {e}"))
                .with_detail("campaign", self.campaign)
        })?
    }
}

/// Drives newsletter campaigns through their lifecycle
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<DeliveryConfig>,
    store: Arc<dyn Store>,
    gateway: Arc<dyn DeliveryGateway>,
    limiter: Arc<RateLimiter>,
    renderer: Arc<TemplateRenderer>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<DeliveryConfig>,
        store: Arc<dyn Store>,
        gateway: Arc<dyn DeliveryGateway>,
        limiter: Arc<RateLimiter>,
        renderer: Arc<TemplateRenderer>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            limiter,
            renderer,
        }
    }

    /// Start delivering a campaign to its audience.
    ///
    /// Returns once every unit has been spawned; use
    /// [`DispatchHandle::wait`] to wait for completion.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the campaign or its named template does not exist
    /// - `InvalidState` if the campaign cannot be sent, or another dispatch
    ///   won the race to start it
    /// - any error resolving the audience, after marking the campaign failed
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    pub async fn dispatch(&self, id: CampaignId) -> Result<DispatchHandle, HeraldError> {
        let campaign = self.store.campaign(id).await?;

        if !campaign.can_be_sent() {
            return Err(HeraldError::invalid_state(format!(
                "campaign {id} is {} and cannot be sent",
                campaign.status
            ))
            .with_detail("status", campaign.status));
        }

        let layout = self.layout_for(&campaign).await?;

        let subscribers = match self.store.resolve_subscribers(&campaign.target).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                let err = HeraldError::from(e).with_detail("campaign", id);
                error!(campaign = %id, error = %err, "Failed to resolve campaign audience");
                self.store
                    .transition_campaign(id, &DISPATCHABLE, CampaignStatus::Failed)
                    .await?;
                return Err(err);
            }
        };

        if !self
            .store
            .transition_campaign(id, &DISPATCHABLE, CampaignStatus::Sending)
            .await?
        {
            return Err(HeraldError::invalid_state(format!(
                "campaign {id} was dispatched concurrently"
            )));
        }

        if subscribers.is_empty() {
            self.store
                .transition_campaign(id, &[CampaignStatus::Sending], CampaignStatus::Completed)
                .await?;
            let summary = CampaignSummary::from(&self.store.campaign(id).await?);
            info!(campaign = %id, "Campaign has no subscribers, completed");

            return Ok(DispatchHandle {
                campaign: id,
                scheduled: 0,
                completion: tokio::spawn(std::future::ready(Ok(summary))),
            });
        }

        for subscriber in &subscribers {
            let log = NewsletterDeliveryLog::new(id, subscriber.id);
            if let Err(e) = self.store.insert_log(&log).await {
                self.store
                    .transition_campaign(id, &[CampaignStatus::Sending], CampaignStatus::Failed)
                    .await?;
                return Err(HeraldError::from(e).with_detail("campaign", id));
            }
        }

        let expected = subscribers.len();
        let (tx, rx) = mpsc::channel(expected);
        let completion = tokio::spawn(aggregator::run(self.store.clone(), id, expected, rx));

        let context = Arc::new(self.context(campaign, layout));
        for subscriber in subscribers {
            tokio::spawn(unit::run(context.clone(), subscriber, tx.clone()));
        }
        drop(tx);

        internal!(level = INFO, "Dispatched campaign {} to {} subscribers", id, expected);

        Ok(DispatchHandle {
            campaign: id,
            scheduled: expected,
            completion,
        })
    }

    /// Dispatch every scheduled campaign due at `now`.
    ///
    /// Campaigns that fail to dispatch are logged and skipped.
    ///
    /// # Errors
    ///
    /// `Storage` if scheduled campaigns cannot be listed.
    pub async fn dispatch_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DispatchHandle>, HeraldError> {
        let mut handles = Vec::new();

        for campaign in self
            .store
            .campaigns_with_status(CampaignStatus::Scheduled)
            .await?
        {
            if !campaign.can_be_sent_at(now) {
                continue;
            }

            match self.dispatch(campaign.id).await {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(campaign = %campaign.id, error = %e, "Scheduled campaign not dispatched"),
            }
        }

        Ok(handles)
    }

    /// Deliver a failed log again.
    ///
    /// On success one unit moves from the campaign's failed counter to its
    /// sent counter. Returns the log as it ends up.
    ///
    /// # Errors
    ///
    /// `NotFound` if the campaign, subscriber, log or campaign template does
    /// not exist, `InvalidState` if the log is not failed or has no attempts
    /// left.
    pub async fn retry_delivery(
        &self,
        campaign: CampaignId,
        subscriber: SubscriberId,
    ) -> Result<NewsletterDeliveryLog, HeraldError> {
        let campaign = self.store.campaign(campaign).await?;
        let subscriber = self.store.subscriber(subscriber).await?;
        let mut log = self.store.log(campaign.id, subscriber.id).await?;

        // Resolved first so a missing layout leaves the log failed and retryable
        let layout = self.layout_for(&campaign).await?;

        if !log.retry(self.config.retry.max_attempts) {
            return Err(HeraldError::invalid_state(format!(
                "delivery of campaign {} to {} is {} after {} attempts and cannot be retried",
                campaign.id, subscriber.id, log.status, log.retry_count
            ))
            .with_detail("status", log.status)
            .with_detail("retry_count", log.retry_count));
        }
        self.store.update_log(&log).await?;

        let context = self.context(campaign, layout);

        match unit::deliver(&context, &subscriber).await {
            Ok(()) => {
                let id = context.campaign.id;
                self.store
                    .adjust_counter(id, CampaignCounter::Failed, -1)
                    .await?;
                self.store.adjust_counter(id, CampaignCounter::Sent, 1).await?;
                info!(campaign = %id, subscriber = %subscriber.id, "Retried delivery succeeded");
            }
            Err(e) => {
                warn!(
                    campaign = %context.campaign.id,
                    subscriber = %subscriber.id,
                    error = %e,
                    "Retried delivery failed"
                );
            }
        }

        Ok(self.store.log(context.campaign.id, subscriber.id).await?)
    }

    /// Record that a subscriber opened the campaign.
    ///
    /// Returns `true` for the first open, which is the only one counted.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no log, `InvalidState` if the message was
    /// never delivered.
    pub async fn record_open(
        &self,
        campaign: CampaignId,
        subscriber: SubscriberId,
    ) -> Result<bool, HeraldError> {
        self.record_engagement(campaign, subscriber, Engagement::Open)
            .await
    }

    /// Record that a subscriber clicked a link in the campaign.
    ///
    /// Returns `true` for the first click, which is the only one counted.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no log, `InvalidState` if the message was
    /// never delivered.
    pub async fn record_click(
        &self,
        campaign: CampaignId,
        subscriber: SubscriberId,
    ) -> Result<bool, HeraldError> {
        self.record_engagement(campaign, subscriber, Engagement::Click)
            .await
    }

    async fn record_engagement(
        &self,
        campaign: CampaignId,
        subscriber: SubscriberId,
        engagement: Engagement,
    ) -> Result<bool, HeraldError> {
        let mut log = self.store.log(campaign, subscriber).await?;

        if !log.status.is_delivered() {
            return Err(HeraldError::invalid_state(format!(
                "delivery of campaign {campaign} to {subscriber} is {}",
                log.status
            ))
            .with_detail("status", log.status));
        }

        let (first, counter) = match engagement {
            Engagement::Open => (log.mark_as_opened(), CampaignCounter::Opened),
            Engagement::Click => (log.mark_as_clicked(), CampaignCounter::Clicked),
        };
        self.store.update_log(&log).await?;

        if first {
            self.store.adjust_counter(campaign, counter, 1).await?;
        }

        Ok(first)
    }

    /// Cancel a campaign that has not started.
    ///
    /// # Errors
    ///
    /// `NotFound` if the campaign does not exist, `InvalidState` unless it
    /// is a draft or scheduled.
    pub async fn cancel(&self, id: CampaignId) -> Result<(), HeraldError> {
        if self
            .store
            .transition_campaign(id, &DISPATCHABLE, CampaignStatus::Cancelled)
            .await?
        {
            internal!(level = DEBUG, "Cancelled campaign {}", id);
            Ok(())
        } else {
            let status = self.store.campaign(id).await?.status;
            Err(
                HeraldError::invalid_state(format!("campaign {id} is {status} and cannot be cancelled"))
                    .with_detail("status", status),
            )
        }
    }

    /// The registered layout named by the campaign, if any.
    async fn layout_for(
        &self,
        campaign: &NewsletterCampaign,
    ) -> Result<Option<EmailTemplate>, HeraldError> {
        let Some(name) = campaign.template_name.as_deref() else {
            return Ok(None);
        };

        let template = self.store.template(name).await?;
        if template.is_active {
            Ok(Some(template))
        } else {
            Err(HeraldError::not_found("template", name).with_detail("active", false))
        }
    }

    fn context(
        &self,
        campaign: NewsletterCampaign,
        layout: Option<EmailTemplate>,
    ) -> DispatchContext {
        DispatchContext {
            config: self.config.clone(),
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            limiter: self.limiter.clone(),
            renderer: self.renderer.clone(),
            campaign,
            layout,
            permits: Arc::new(Semaphore::new(self.config.concurrency())),
        }
    }
}
