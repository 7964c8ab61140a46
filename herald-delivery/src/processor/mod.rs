//! Queue processor orchestration

pub mod cleanup;
pub mod process;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use herald_common::{
    HeraldError, Signal, internal,
    tracing::{self, debug, error, info},
};
use herald_store::Store;
use herald_tracing::traced;

pub use process::{PassSummary, SendOutcome};

use crate::{
    DeliveryConfig,
    campaign::{DispatchHandle, Orchestrator},
    gateway::DeliveryGateway,
    policy::RateLimiter,
    queue::EmailQueue,
    template::TemplateRenderer,
};

/// Background worker for the email queue and for scheduled campaigns
///
/// One processor owns the rate limiter shared by every send, so queue items
/// and campaign deliveries draw from the same budget. Clones share state.
#[derive(Debug, Clone)]
pub struct QueueProcessor {
    pub(crate) config: Arc<DeliveryConfig>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gateway: Arc<dyn DeliveryGateway>,
    pub(crate) limiter: Arc<RateLimiter>,
    queue: EmailQueue,
    orchestrator: Orchestrator,
}

impl QueueProcessor {
    pub fn new(
        config: DeliveryConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn DeliveryGateway>,
    ) -> Self {
        let config = Arc::new(config);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let renderer = Arc::new(TemplateRenderer::new());

        let queue = EmailQueue::new(
            store.clone(),
            renderer.clone(),
            config.default_from.clone(),
            config.retry.max_attempts,
        );
        let orchestrator = Orchestrator::new(
            config.clone(),
            store.clone(),
            gateway.clone(),
            limiter.clone(),
            renderer,
        );

        internal!(
            "Queue processor initialised with batch_size={}, max_concurrent={}, send_timeout={}s",
            config.batch_size,
            config.concurrency(),
            config.send_timeout_secs
        );

        Self {
            config,
            store,
            gateway,
            limiter,
            queue,
            orchestrator,
        }
    }

    pub const fn queue(&self) -> &EmailQueue {
        &self.queue
    }

    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Run until a shutdown signal is received.
    ///
    /// Drains the queue every `process_interval_secs`, dispatches due
    /// campaigns every `schedule_interval_secs` and runs the maintenance
    /// jobs every `maintenance_interval_secs`. A pass that is running when
    /// the signal arrives completes before the loop exits, and campaigns
    /// dispatched by this loop are waited on so none is left `sending`.
    ///
    /// # Errors
    ///
    /// Currently infallible; individual pass failures are logged.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HeraldError> {
        internal!("Queue processor starting");

        let mut process_timer = interval(self.config.process_interval_secs);
        let mut schedule_timer = interval(self.config.schedule_interval_secs);
        let mut maintenance_timer = interval(self.config.maintenance_interval_secs);

        // Skip the first maintenance tick so startup is not slowed by cleanup
        maintenance_timer.tick().await;

        let mut campaigns: Vec<DispatchHandle> = Vec::new();

        loop {
            tokio::select! {
                _ = process_timer.tick() => {
                    match self.process_queue().await {
                        Ok(summary) if summary.picked > 0 => {
                            info!(?summary, "Processed email queue");
                        }
                        Ok(_) => debug!("Processed email queue, nothing ready"),
                        Err(e) => error!("Error processing email queue: {e}"),
                    }
                }
                _ = schedule_timer.tick() => {
                    match self.orchestrator.dispatch_due(Utc::now()).await {
                        Ok(handles) if !handles.is_empty() => {
                            info!(count = handles.len(), "Dispatched scheduled campaigns");
                            campaigns.retain(|handle| !handle.is_finished());
                            campaigns.extend(handles);
                        }
                        Ok(_) => debug!("No scheduled campaigns due"),
                        Err(e) => error!("Error dispatching scheduled campaigns: {e}"),
                    }
                }
                _ = maintenance_timer.tick() => {
                    self.run_maintenance().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Queue processor received shutdown signal");
                        }
                        Err(e) => {
                            error!("Queue processor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        drain_campaigns(campaigns).await;

        internal!("Queue processor shutdown complete");
        Ok(())
    }
}

async fn drain_campaigns(campaigns: Vec<DispatchHandle>) {
    let in_flight: Vec<_> = campaigns
        .into_iter()
        .filter(|handle| !handle.is_finished())
        .collect();

    if !in_flight.is_empty() {
        internal!("Waiting for {} in-flight campaigns", in_flight.len());
    }

    for handle in in_flight {
        let campaign = handle.campaign;
        if let Err(e) = handle.wait().await {
            error!(%campaign, error = %e, "Campaign did not finish cleanly during shutdown");
        }
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut timer = tokio::time::interval(Duration::from_secs(secs.max(1)));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer
}
