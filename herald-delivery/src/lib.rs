//! Delivery side of herald
//!
//! This crate provides:
//! - The transactional email queue and its background processor
//! - The newsletter campaign orchestrator
//! - Delivery gateways (SMTP, in-memory)
//! - Template rendering, rate limiting and the shared retry policy

pub mod campaign;
mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod template;

pub use campaign::{CampaignSummary, DispatchHandle, Orchestrator};
pub use config::DeliveryConfig;
pub use error::GatewayError;
pub use gateway::{
    DeliveryGateway, MemoryGateway, OutgoingEmail, SmtpConfig, SmtpGateway, TlsMode,
};
pub use policy::{RateLimitConfig, RateLimiter, RetryPolicy};
pub use processor::{PassSummary, QueueProcessor, SendOutcome};
pub use queue::EmailQueue;
pub use template::{RenderedEmail, TemplateContext, TemplateRenderer};
