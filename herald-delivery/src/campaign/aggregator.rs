//! Single consumer of delivery events for one dispatch.
//!
//! Units never touch campaign counters themselves. They report here, and
//! this task applies one atomic store increment per event, then finalises
//! the campaign once every unit has reported.

use std::sync::Arc;

use ahash::AHashSet;
use herald_common::{
    CampaignCounter, CampaignId, CampaignStatus, HeraldError, LogStatus, internal,
    tracing::{error, info, warn},
};
use herald_store::Store;
use tokio::sync::mpsc;

use super::{CampaignSummary, unit::DeliveryEvent};

pub(crate) async fn run(
    store: Arc<dyn Store>,
    campaign: CampaignId,
    expected: usize,
    mut events: mpsc::Receiver<DeliveryEvent>,
) -> Result<CampaignSummary, HeraldError> {
    let mut reported = AHashSet::with_capacity(expected);

    while reported.len() < expected {
        let Some(event) = events.recv().await else {
            break;
        };

        let (subscriber, counter) = match event {
            DeliveryEvent::Sent(subscriber) => (subscriber, CampaignCounter::Sent),
            DeliveryEvent::Failed(subscriber) => (subscriber, CampaignCounter::Failed),
        };

        if !reported.insert(subscriber) {
            warn!(%campaign, %subscriber, "Duplicate delivery event ignored");
            continue;
        }

        if let Err(e) = store.adjust_counter(campaign, counter, 1).await {
            error!(%campaign, error = %e, "Failed to update campaign counter");
        }
    }

    let missing = expected.saturating_sub(reported.len());
    if missing > 0 {
        warn!(
            %campaign,
            missing,
            "Delivery units ended without reporting, counting them as failed"
        );
        abandon_unreported(store.as_ref(), campaign, &reported).await?;
        store
            .adjust_counter(
                campaign,
                CampaignCounter::Failed,
                i64::try_from(missing).unwrap_or(i64::MAX),
            )
            .await?;
    }

    if !store
        .transition_campaign(campaign, &[CampaignStatus::Sending], CampaignStatus::Completed)
        .await?
    {
        warn!(%campaign, "Campaign left the sending state before completion");
    }

    let summary = CampaignSummary::from(&store.campaign(campaign).await?);
    info!(
        %campaign,
        sent = summary.sent,
        failed = summary.failed,
        success_rate = summary.success_rate,
        "Campaign delivery finished"
    );
    Ok(summary)
}

/// Fail the logs of units that never reported.
async fn abandon_unreported(
    store: &dyn Store,
    campaign: CampaignId,
    reported: &AHashSet<herald_common::SubscriberId>,
) -> Result<(), HeraldError> {
    for mut log in store.campaign_logs(campaign).await? {
        if reported.contains(&log.subscriber)
            || !matches!(log.status, LogStatus::Pending | LogStatus::Sending)
        {
            continue;
        }

        log.mark_as_failed("delivery task ended without reporting");
        store.update_log(&log).await?;
        internal!(
            level = DEBUG,
            "Marked unreported delivery {} of campaign {} as failed",
            log.subscriber,
            campaign
        );
    }

    Ok(())
}
