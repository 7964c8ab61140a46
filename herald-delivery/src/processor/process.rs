//! Queue processing logic for delivery attempts

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_common::{
    EmailId, HeraldError,
    tracing::{debug, error, info, warn},
};
use tokio::task::JoinSet;

use crate::{
    error::GatewayError,
    gateway::{OutgoingEmail, send_with_timeout},
    processor::QueueProcessor,
};

/// What happened to one queue item during a send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The gateway accepted the message
    Sent,
    /// Not eligible, or another worker claimed it first
    Skipped,
    /// Rate limited; still pending, try again after the wait
    Deferred(Duration),
    /// Failed transiently and was rescheduled
    Retrying(DateTime<Utc>),
    /// Failed for good
    Failed(GatewayError),
}

/// Counts from one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub picked: usize,
    pub sent: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub retrying: usize,
    pub failed: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: &SendOutcome) {
        match outcome {
            SendOutcome::Sent => self.sent += 1,
            SendOutcome::Skipped => self.skipped += 1,
            SendOutcome::Deferred(_) => self.deferred += 1,
            SendOutcome::Retrying(_) => self.retrying += 1,
            SendOutcome::Failed(_) => self.failed += 1,
        }
    }
}

impl QueueProcessor {
    /// Attempt delivery of a single queue item.
    ///
    /// The item is claimed through the store before the gateway is called,
    /// so two workers racing on the same id send it at most once.
    ///
    /// # Errors
    ///
    /// `NotFound` if the item does not exist, `Storage` if the store fails.
    /// Gateway failures are reported through the returned [`SendOutcome`].
    pub async fn send_queued(&self, id: EmailId) -> Result<SendOutcome, HeraldError> {
        let now = Utc::now();
        let item = self.store.email(id).await?;

        if !item.can_be_sent_at(now) {
            debug!(email = %id, status = %item.status, "Email cannot be sent, skipping");
            return Ok(SendOutcome::Skipped);
        }

        if let Err(wait) = self.limiter.check(&item.to) {
            debug!(
                email = %id,
                wait_secs = wait.as_secs_f64(),
                "Rate limited, leaving email pending"
            );
            return Ok(SendOutcome::Deferred(wait));
        }

        let Some(mut item) = self.store.claim_email(id, now).await? else {
            debug!(email = %id, "Email claimed by another worker");
            return Ok(SendOutcome::Skipped);
        };

        let result = send_with_timeout(
            self.gateway.as_ref(),
            &OutgoingEmail::from(&item),
            self.config.send_timeout(),
        )
        .await;

        let outcome = match result {
            Ok(()) => {
                item.mark_as_sent();
                info!(email = %id, to = %item.to, "Email sent");
                SendOutcome::Sent
            }
            Err(err) => {
                if err.is_temporary() {
                    item.mark_as_failed(err.to_string());
                } else {
                    item.mark_as_rejected(err.to_string());
                }

                if err.is_temporary() && item.retry() {
                    let next = self.config.retry.calculate_next_retry(item.retry_count);
                    item.scheduled_for = Some(next);
                    warn!(
                        email = %id,
                        attempt = item.retry_count,
                        next_retry = %next,
                        error = %err,
                        "Email delivery failed, will retry"
                    );
                    SendOutcome::Retrying(next)
                } else {
                    error!(
                        email = %id,
                        attempts = item.retry_count,
                        error = %err,
                        "Email delivery failed"
                    );
                    SendOutcome::Failed(err)
                }
            }
        };

        self.store.update_email(&item).await?;
        Ok(outcome)
    }

    /// Send up to `batch_size` ready items, at most
    /// `max_concurrent_deliveries` at a time.
    ///
    /// Items are taken highest priority first, oldest first within a
    /// priority.
    ///
    /// # Errors
    ///
    /// `Storage` if the ready items cannot be listed. Per-item failures are
    /// logged and counted.
    pub async fn process_queue(&self) -> Result<PassSummary, HeraldError> {
        let ready = self
            .store
            .ready_emails(Utc::now(), self.config.batch_size)
            .await?;

        let mut summary = PassSummary {
            picked: ready.len(),
            ..PassSummary::default()
        };

        if ready.is_empty() {
            return Ok(summary);
        }

        info!(
            pending_count = ready.len(),
            max_concurrent = self.config.concurrency(),
            "Processing email queue with parallel workers"
        );

        let mut join_set: JoinSet<Result<SendOutcome, HeraldError>> = JoinSet::new();
        let mut pending = ready.into_iter().map(|item| item.id);

        let spawn = |join_set: &mut JoinSet<_>, id: EmailId| {
            let processor = self.clone();
            join_set.spawn(async move { processor.send_queued(id).await });
        };

        for id in pending.by_ref().take(self.config.concurrency()) {
            spawn(&mut join_set, id);
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => summary.record(&outcome),
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to process queued email");
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!(error = %e, "Delivery task panicked");
                    summary.skipped += 1;
                }
            }

            if let Some(id) = pending.next() {
                spawn(&mut join_set, id);
            }
        }

        Ok(summary)
    }
}
