//! Shared building blocks for herald.
//!
//! Everything that more than one crate needs to agree on lives here: the
//! persisted entities and their state machines, the status enums, the tagged
//! error type and the logging setup.

pub mod campaign;
pub mod email;
pub mod error;
pub mod id;
pub mod logging;
pub mod newsletter;
pub mod status;
pub mod subscriber;
pub mod template;

pub use campaign::{CampaignCounter, NewsletterCampaign, TargetRule};
pub use email::{EmailQueueItem, NewEmail};
pub use error::{ErrorCode, HeraldError, Result};
pub use id::{CampaignId, EmailId, LogId, SubscriberId};
pub use newsletter::NewsletterDeliveryLog;
pub use status::{CampaignStatus, LogStatus, Priority, QueueStatus};
pub use subscriber::Subscriber;
pub use template::EmailTemplate;
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
