//! Shared fixtures for delivery integration tests
#![allow(dead_code)] // Not every test binary uses every helper
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use herald_common::{NewsletterCampaign, Subscriber};
use herald_delivery::{DeliveryConfig, MemoryGateway, QueueProcessor, RateLimitConfig};
use herald_store::{MemoryStore, Store};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: MemoryGateway,
    pub processor: QueueProcessor,
}

impl Harness {
    pub fn new(gateway: MemoryGateway) -> Self {
        Self::with_config(gateway, config())
    }

    pub fn with_config(gateway: MemoryGateway, config: DeliveryConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let processor = QueueProcessor::new(config, store.clone(), Arc::new(gateway.clone()));
        Self {
            store,
            gateway,
            processor,
        }
    }

    pub async fn subscriber(&self, email: &str) -> Subscriber {
        let subscriber = Subscriber::new(email).unwrap();
        self.store.insert_subscriber(&subscriber).await.unwrap();
        subscriber
    }

    pub async fn campaign(&self, campaign: NewsletterCampaign) -> NewsletterCampaign {
        self.store.insert_campaign(&campaign).await.unwrap();
        campaign
    }
}

/// Defaults without rate limits, so tests never wait on a bucket.
pub fn config() -> DeliveryConfig {
    DeliveryConfig {
        site_url: String::from("https://example.org"),
        default_from: String::from("news@example.org"),
        rate_limit: RateLimitConfig::unlimited(),
        ..DeliveryConfig::default()
    }
}

pub fn newsletter() -> NewsletterCampaign {
    NewsletterCampaign::new(
        "Spring edition",
        "Spring news for {{ name }}",
        "<p>Hello {{ name }}, {{ missing }}welcome to {{ campaign_title }}</p>",
    )
    .unwrap()
}
