//! One campaign delivery: one subscriber, one message.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use herald_common::{
    EmailTemplate, HeraldError, NewsletterCampaign, Subscriber, SubscriberId,
    tracing::{debug, error, info, warn},
};
use herald_store::Store;
use tokio::sync::{Semaphore, mpsc};

use crate::{
    DeliveryConfig,
    gateway::{DeliveryGateway, OutgoingEmail, send_with_timeout},
    policy::RateLimiter,
    template::{RenderedEmail, TemplateContext, TemplateRenderer},
};

/// Longest single sleep while waiting out a rate limit; the limiter is
/// consulted again afterwards.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Completion report sent from a unit to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryEvent {
    Sent(SubscriberId),
    Failed(SubscriberId),
}

/// Everything the units of one dispatch share.
#[derive(Debug)]
pub(crate) struct DispatchContext {
    pub config: Arc<DeliveryConfig>,
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn DeliveryGateway>,
    pub limiter: Arc<RateLimiter>,
    pub renderer: Arc<TemplateRenderer>,
    pub campaign: NewsletterCampaign,
    pub layout: Option<EmailTemplate>,
    pub permits: Arc<Semaphore>,
}

impl DispatchContext {
    /// Template variables for one subscriber.
    ///
    /// Campaign variables are applied last so a campaign can override the
    /// defaults.
    pub fn context_for(&self, subscriber: &Subscriber) -> TemplateContext {
        let name = subscriber.display_name();
        let site_url = self.config.site_url.trim_end_matches('/');

        let mut context = TemplateContext::from([
            (String::from("name"), name.clone()),
            (String::from("subscriber_name"), name),
            (String::from("email"), subscriber.email.clone()),
            (
                String::from("unsubscribe_url"),
                format!("{site_url}/newsletter/unsubscribe/{}/", subscriber.id),
            ),
            (
                String::from("current_date"),
                Utc::now().format("%d/%m/%Y").to_string(),
            ),
            (String::from("campaign_title"), self.campaign.title.clone()),
        ]);

        context.extend(
            self.campaign
                .variables
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        context
    }

    pub fn render_for(&self, subscriber: &Subscriber) -> Result<RenderedEmail, HeraldError> {
        self.renderer.render_campaign(
            &self.campaign,
            self.layout.as_ref(),
            &self.context_for(subscriber),
        )
    }
}

/// Deliver the campaign to `subscriber` and report the result.
///
/// Never fails: every error ends up in the delivery log and as a `Failed`
/// event.
pub(crate) async fn run(
    context: Arc<DispatchContext>,
    subscriber: Subscriber,
    events: mpsc::Sender<DeliveryEvent>,
) {
    // The semaphore is never closed
    let _permit = context.permits.clone().acquire_owned().await.ok();

    let event = match deliver(&context, &subscriber).await {
        Ok(()) => DeliveryEvent::Sent(subscriber.id),
        Err(err) => {
            error!(
                campaign = %context.campaign.id,
                subscriber = %subscriber.id,
                error = %err,
                "Newsletter delivery failed"
            );
            DeliveryEvent::Failed(subscriber.id)
        }
    };

    if events.send(event).await.is_err() {
        warn!(
            campaign = %context.campaign.id,
            subscriber = %subscriber.id,
            "Aggregator gone before delivery was reported"
        );
    }
}

pub(crate) async fn deliver(context: &DispatchContext, subscriber: &Subscriber) -> Result<(), HeraldError> {
    let store = context.store.as_ref();
    let campaign = &context.campaign;

    let mut log = store.log(campaign.id, subscriber.id).await?;
    log.mark_as_sending();
    store.update_log(&log).await?;

    while let Err(wait) = context.limiter.check(&subscriber.email) {
        debug!(
            campaign = %campaign.id,
            subscriber = %subscriber.id,
            wait_secs = wait.as_secs_f64(),
            "Rate limited, waiting"
        );
        tokio::time::sleep(wait.min(MAX_RATE_LIMIT_WAIT)).await;
    }

    let result = match context.render_for(subscriber) {
        Ok(rendered) => {
            let email = OutgoingEmail {
                from: context.config.default_from.clone(),
                to: subscriber.email.clone(),
                subject: rendered.subject,
                html: rendered.html,
                text: rendered.text,
            };

            send_with_timeout(
                context.gateway.as_ref(),
                &email,
                context.config.send_timeout(),
            )
            .await
            .map_err(HeraldError::from)
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => {
            log.mark_as_sent();
            store.update_log(&log).await?;
            info!(
                campaign = %campaign.id,
                subscriber = %subscriber.id,
                "Newsletter delivered"
            );
            Ok(())
        }
        Err(err) => {
            log.mark_as_failed(err.message.clone());
            store.update_log(&log).await?;
            Err(err)
        }
    }
}
