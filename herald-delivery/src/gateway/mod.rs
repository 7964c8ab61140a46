//! Delivery gateways: where rendered messages actually leave the process.

pub mod memory;
pub mod smtp;

use std::time::Duration;

use async_trait::async_trait;
use herald_common::EmailQueueItem;

pub use memory::MemoryGateway;
pub use smtp::{SmtpConfig, SmtpGateway, TlsMode};

use crate::error::GatewayError;

/// A message ready to be handed to a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

impl From<&EmailQueueItem> for OutgoingEmail {
    fn from(item: &EmailQueueItem) -> Self {
        Self {
            from: item.from.clone(),
            to: item.to.clone(),
            subject: item.subject.clone(),
            html: item.html_body.clone(),
            text: item.text_body.clone(),
        }
    }
}

/// Send through `gateway`, giving up after `timeout`.
///
/// # Errors
///
/// The gateway's own error, or [`GatewayError::Timeout`].
pub async fn send_with_timeout(
    gateway: &dyn DeliveryGateway,
    email: &OutgoingEmail,
    timeout: Duration,
) -> Result<(), GatewayError> {
    tokio::time::timeout(timeout, gateway.send(email))
        .await
        .unwrap_or(Err(GatewayError::Timeout(timeout)))
}

/// Sends one message to one recipient.
///
/// Implementations open (or reuse) a connection, send, and report success or
/// a classified failure. They do not retry; retrying is the caller's job.
#[async_trait]
pub trait DeliveryGateway: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// A [`GatewayError`] describing why the message was not accepted.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), GatewayError>;

    /// Check that the remote end is reachable and accepts us.
    ///
    /// # Errors
    ///
    /// A [`GatewayError`] if the probe fails.
    async fn test_connection(&self) -> Result<(), GatewayError>;
}
