use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use herald_common::outgoing;
use parking_lot::Mutex;

use super::{DeliveryGateway, OutgoingEmail};
use crate::error::GatewayError;

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<OutgoingEmail>,
    attempts: usize,
    /// Scripted failures per recipient, consumed front to back
    failures: AHashMap<String, Vec<GatewayError>>,
    /// Recipients that always fail
    rejected: AHashMap<String, GatewayError>,
    delay: Option<Duration>,
    offline: bool,
}

/// Gateway that keeps messages in memory
///
/// Used for dry runs and tests. Failures can be scripted per recipient.
/// Clones share the same mailbox.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send to `recipient` with `error`.
    #[must_use]
    pub fn reject(self, recipient: impl Into<String>, error: GatewayError) -> Self {
        self.inner.lock().rejected.insert(recipient.into(), error);
        self
    }

    /// Fail the next send to `recipient` with `error`; later sends succeed.
    #[must_use]
    pub fn fail_once(self, recipient: impl Into<String>, error: GatewayError) -> Self {
        self.inner
            .lock()
            .failures
            .entry(recipient.into())
            .or_default()
            .push(error);
        self
    }

    /// Wait this long before answering each send.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().delay = Some(delay);
        self
    }

    /// Make connection probes fail.
    #[must_use]
    pub fn offline(self) -> Self {
        self.inner.lock().offline = true;
        self
    }

    /// Messages accepted so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.inner.lock().sent.clone()
    }

    /// Number of sends attempted, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    fn outcome(&self, email: &OutgoingEmail) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        inner.attempts += 1;

        if let Some(error) = inner.rejected.get(&email.to) {
            return Err(error.clone());
        }

        if let Some(pending) = inner.failures.get_mut(&email.to) {
            if !pending.is_empty() {
                return Err(pending.remove(0));
            }
        }

        inner.sent.push(email.clone());
        Ok(())
    }
}

#[async_trait]
impl DeliveryGateway for MemoryGateway {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), GatewayError> {
        let delay = self.inner.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        outgoing!(level = DEBUG, "Captured message to {}", email.to);
        self.outcome(email)
    }

    async fn test_connection(&self) -> Result<(), GatewayError> {
        if self.inner.lock().offline {
            Err(GatewayError::Temporary(String::from("memory gateway is offline")))
        } else {
            Ok(())
        }
    }
}
