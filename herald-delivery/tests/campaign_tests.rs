//! End-to-end campaign dispatch scenarios against the in-memory store and gateway
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use chrono::{Duration, Utc};
use herald_common::{
    CampaignId, CampaignStatus, EmailTemplate, ErrorCode, LogStatus, Subscriber, SubscriberId,
    TargetRule,
};
use herald_delivery::{DeliveryConfig, GatewayError, MemoryGateway, RateLimitConfig};
use herald_store::Store;
use pretty_assertions::assert_eq;
use support::{Harness, newsletter};

#[tokio::test]
async fn test_two_subscribers_both_delivered() {
    let harness = Harness::new(MemoryGateway::new());
    let ada = Subscriber::new("ada@example.com")
        .unwrap()
        .named("Ada", "Lovelace");
    harness.store.insert_subscriber(&ada).await.unwrap();
    harness.subscriber("grace@example.com").await;
    let campaign = harness.campaign(newsletter()).await;

    let handle = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap();
    assert_eq!(handle.scheduled, 2);

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.status, CampaignStatus::Completed);
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 0);
    assert!((summary.success_rate - 100.0).abs() < f64::EPSILON);

    let stored = harness.store.campaign(campaign.id).await.unwrap();
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());

    let logs = harness.store.campaign_logs(campaign.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.status == LogStatus::Sent && log.sent_at.is_some()));

    let mut sent = harness.gateway.sent();
    sent.sort_by(|a, b| a.to.cmp(&b.to));
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].from, "news@example.org");
    assert_eq!(sent[0].subject, "Spring news for Ada Lovelace");
    assert!(sent[0].html.contains("Hello Ada Lovelace, welcome to Spring edition"));
    assert!(sent[0].text.as_deref().unwrap().contains(&format!(
        "https://example.org/newsletter/unsubscribe/{}/",
        ada.id
    )));
    // Context values are escaped in the HTML part
    assert!(sent[0].html.contains(&format!(
        "example.org&#x2f;newsletter&#x2f;unsubscribe&#x2f;{}&#x2f;",
        ada.id
    )));
    assert_eq!(sent[1].subject, "Spring news for Subscriber");
}

#[tokio::test]
async fn test_one_failure_does_not_abort_siblings() {
    let harness = Harness::new(MemoryGateway::new().reject(
        "bounce@example.com",
        GatewayError::Permanent(String::from("550 mailbox unavailable")),
    ));
    let good = harness.subscriber("good@example.com").await;
    let bad = harness.subscriber("bounce@example.com").await;
    let campaign = harness.campaign(newsletter()).await;

    let summary = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.status, CampaignStatus::Completed);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);

    let good_log = harness.store.log(campaign.id, good.id).await.unwrap();
    assert_eq!(good_log.status, LogStatus::Sent);

    let bad_log = harness.store.log(campaign.id, bad.id).await.unwrap();
    assert_eq!(bad_log.status, LogStatus::Failed);
    assert_eq!(bad_log.retry_count, 1);
    assert!(bad_log.error_message.contains("550"));
}

#[tokio::test]
async fn test_dispatch_rejects_unsendable_campaigns() {
    let harness = Harness::new(MemoryGateway::new());
    harness.subscriber("ada@example.com").await;
    let orchestrator = harness.processor.orchestrator();

    let err = orchestrator.dispatch(CampaignId::generate()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let future = harness
        .campaign(newsletter().scheduled(Utc::now() + Duration::hours(1)))
        .await;
    let err = orchestrator.dispatch(future.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
    assert_eq!(
        harness.store.campaign(future.id).await.unwrap().status,
        CampaignStatus::Scheduled
    );

    let campaign = harness.campaign(newsletter()).await;
    orchestrator.dispatch(campaign.id).await.unwrap().wait().await.unwrap();
    let err = orchestrator.dispatch(campaign.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
    assert_eq!(harness.gateway.sent().len(), 1);
}

#[tokio::test]
async fn test_empty_audience_completes_immediately() {
    let harness = Harness::new(MemoryGateway::new());
    harness.subscriber("ada@example.com").await;
    let campaign = harness
        .campaign(newsletter().target(TargetRule::Language(String::from("fr"))))
        .await;

    let handle = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap();
    assert_eq!(handle.scheduled, 0);

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.status, CampaignStatus::Completed);
    assert_eq!((summary.sent, summary.failed), (0, 0));
    assert!(harness.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_unresolvable_audience_fails_campaign() {
    let harness = Harness::new(MemoryGateway::new());
    let known = harness.subscriber("ada@example.com").await;
    let campaign = harness
        .campaign(newsletter().target(TargetRule::Custom(vec![known.id, SubscriberId::generate()])))
        .await;

    let err = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let stored = harness.store.campaign(campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Failed);
    assert!(harness.store.campaign_logs(campaign.id).await.unwrap().is_empty());
    assert_eq!(harness.gateway.attempts(), 0);
}

#[tokio::test]
async fn test_missing_layout_leaves_campaign_untouched() {
    let harness = Harness::new(MemoryGateway::new());
    harness.subscriber("ada@example.com").await;
    let campaign = harness.campaign(newsletter().template("brand")).await;

    let err = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(
        harness.store.campaign(campaign.id).await.unwrap().status,
        CampaignStatus::Draft
    );
}

#[tokio::test]
async fn test_registered_layout_wraps_content() {
    let harness = Harness::new(MemoryGateway::new());
    harness.subscriber("ada@example.com").await;
    harness
        .store
        .save_template(
            &EmailTemplate::new("brand", "unused", "<main>{{ content }}</main>")
                .unwrap()
                .with_text("{{ email }}"),
        )
        .await
        .unwrap();
    let campaign = harness
        .campaign(newsletter().template("brand").variable("name", "friend"))
        .await;

    harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let sent = harness.gateway.sent();
    assert_eq!(sent[0].subject, "Spring news for friend");
    assert_eq!(
        sent[0].html,
        "<main><p>Hello friend, welcome to Spring edition</p></main>"
    );
    assert_eq!(sent[0].text.as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn test_dispatch_due_only_sends_due_campaigns() {
    let harness = Harness::new(MemoryGateway::new());
    harness.subscriber("ada@example.com").await;
    let due = harness
        .campaign(newsletter().scheduled(Utc::now() - Duration::minutes(5)))
        .await;
    let later = harness
        .campaign(newsletter().scheduled(Utc::now() + Duration::hours(2)))
        .await;
    let draft = harness.campaign(newsletter()).await;

    let handles = harness
        .processor
        .orchestrator()
        .dispatch_due(Utc::now())
        .await
        .unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].campaign, due.id);

    for handle in handles {
        handle.wait().await.unwrap();
    }

    let status = |id| {
        let store = harness.store.clone();
        async move { store.campaign(id).await.unwrap().status }
    };
    assert_eq!(status(due.id).await, CampaignStatus::Completed);
    assert_eq!(status(later.id).await, CampaignStatus::Scheduled);
    assert_eq!(status(draft.id).await, CampaignStatus::Draft);
}

#[tokio::test]
async fn test_retry_delivery_moves_counter() {
    let harness = Harness::new(MemoryGateway::new().fail_once(
        "ada@example.com",
        GatewayError::Temporary(String::from("421 try later")),
    ));
    let ada = harness.subscriber("ada@example.com").await;
    let campaign = harness.campaign(newsletter()).await;
    let orchestrator = harness.processor.orchestrator();

    let summary = orchestrator
        .dispatch(campaign.id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!((summary.sent, summary.failed), (0, 1));

    let log = orchestrator.retry_delivery(campaign.id, ada.id).await.unwrap();
    assert_eq!(log.status, LogStatus::Sent);
    assert_eq!(log.retry_count, 1);
    assert!(log.error_message.is_empty());

    let stored = harness.store.campaign(campaign.id).await.unwrap();
    assert_eq!((stored.sent_count, stored.failed_count), (1, 0));

    // Delivered logs cannot be retried
    let err = orchestrator.retry_delivery(campaign.id, ada.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn test_retry_delivery_respects_attempt_limit() {
    let harness = Harness::new(MemoryGateway::new().reject(
        "ada@example.com",
        GatewayError::Temporary(String::from("421 try later")),
    ));
    let ada = harness.subscriber("ada@example.com").await;
    let campaign = harness.campaign(newsletter()).await;
    let orchestrator = harness.processor.orchestrator();

    orchestrator.dispatch(campaign.id).await.unwrap().wait().await.unwrap();

    // Attempts two and three fail as well
    for attempt in 2..=3 {
        let log = orchestrator.retry_delivery(campaign.id, ada.id).await.unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert_eq!(log.retry_count, attempt);
    }

    let err = orchestrator.retry_delivery(campaign.id, ada.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);

    let stored = harness.store.campaign(campaign.id).await.unwrap();
    assert_eq!((stored.sent_count, stored.failed_count), (0, 1));
    assert_eq!(harness.gateway.attempts(), 3);
}

#[tokio::test]
async fn test_retry_delivery_without_layout_keeps_log_retryable() {
    let harness = Harness::new(MemoryGateway::new().fail_once(
        "ada@example.com",
        GatewayError::Temporary(String::from("421 try later")),
    ));
    let mut brand = EmailTemplate::new("brand", "unused", "<main>{{ content }}</main>").unwrap();
    harness.store.save_template(&brand).await.unwrap();
    let ada = harness.subscriber("ada@example.com").await;
    let campaign = harness.campaign(newsletter().template("brand")).await;
    let orchestrator = harness.processor.orchestrator();

    orchestrator.dispatch(campaign.id).await.unwrap().wait().await.unwrap();

    brand.deactivate();
    harness.store.save_template(&brand).await.unwrap();

    let err = orchestrator.retry_delivery(campaign.id, ada.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let log = harness.store.log(campaign.id, ada.id).await.unwrap();
    assert_eq!(log.status, LogStatus::Failed);
    assert_eq!(log.retry_count, 1);

    brand.is_active = true;
    harness.store.save_template(&brand).await.unwrap();

    let log = orchestrator.retry_delivery(campaign.id, ada.id).await.unwrap();
    assert_eq!(log.status, LogStatus::Sent);

    let stored = harness.store.campaign(campaign.id).await.unwrap();
    assert_eq!((stored.sent_count, stored.failed_count), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_units_wait_and_deliver() {
    let harness = Harness::with_config(
        MemoryGateway::new(),
        DeliveryConfig {
            rate_limit: RateLimitConfig {
                per_minute: Some(1),
                ..RateLimitConfig::unlimited()
            },
            ..support::config()
        },
    );
    harness.subscriber("ada@example.com").await;
    harness.subscriber("grace@example.com").await;
    let campaign = harness.campaign(newsletter()).await;

    let started = tokio::time::Instant::now();
    let summary = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!((summary.sent, summary.failed), (2, 0));
    assert_eq!(harness.gateway.sent().len(), 2);
    // The second message had to wait for the bucket to refill
    assert!(started.elapsed() >= std::time::Duration::from_secs(59));
}

#[tokio::test(start_paused = true)]
async fn test_zero_rate_limit_does_not_stall_campaign() {
    let harness = Harness::with_config(
        MemoryGateway::new(),
        DeliveryConfig {
            rate_limit: RateLimitConfig {
                per_minute: Some(0),
                ..RateLimitConfig::unlimited()
            },
            ..support::config()
        },
    );
    harness.subscriber("ada@example.com").await;
    let campaign = harness.campaign(newsletter()).await;

    let handle = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap();
    let summary = tokio::time::timeout(std::time::Duration::from_secs(3600), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.status, CampaignStatus::Completed);
    assert_eq!(summary.sent, 1);
}

#[tokio::test]
async fn test_open_and_click_tracking() {
    let harness = Harness::new(
        MemoryGateway::new().reject("gone@example.com", GatewayError::Permanent(String::from("550"))),
    );
    let ada = harness.subscriber("ada@example.com").await;
    let gone = harness.subscriber("gone@example.com").await;
    let campaign = harness.campaign(newsletter()).await;
    let orchestrator = harness.processor.orchestrator();

    orchestrator.dispatch(campaign.id).await.unwrap().wait().await.unwrap();

    assert!(orchestrator.record_open(campaign.id, ada.id).await.unwrap());
    assert!(!orchestrator.record_open(campaign.id, ada.id).await.unwrap());
    let opened_at = harness.store.log(campaign.id, ada.id).await.unwrap().opened_at;

    assert!(orchestrator.record_click(campaign.id, ada.id).await.unwrap());
    assert!(!orchestrator.record_click(campaign.id, ada.id).await.unwrap());

    // A late open does not downgrade a click or move the first open time
    assert!(!orchestrator.record_open(campaign.id, ada.id).await.unwrap());
    let log = harness.store.log(campaign.id, ada.id).await.unwrap();
    assert_eq!(log.status, LogStatus::Clicked);
    assert_eq!(log.opened_at, opened_at);

    let stored = harness.store.campaign(campaign.id).await.unwrap();
    assert_eq!((stored.opened_count, stored.clicked_count), (1, 1));

    let err = orchestrator.record_open(campaign.id, gone.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);

    let err = orchestrator
        .record_click(campaign.id, SubscriberId::generate())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_cancel_only_before_sending() {
    let harness = Harness::new(MemoryGateway::new());
    harness.subscriber("ada@example.com").await;
    let orchestrator = harness.processor.orchestrator();

    let draft = harness.campaign(newsletter()).await;
    orchestrator.cancel(draft.id).await.unwrap();
    assert_eq!(
        harness.store.campaign(draft.id).await.unwrap().status,
        CampaignStatus::Cancelled
    );
    assert_eq!(
        orchestrator.dispatch(draft.id).await.unwrap_err().code,
        ErrorCode::InvalidState
    );

    let sent = harness.campaign(newsletter()).await;
    orchestrator.dispatch(sent.id).await.unwrap().wait().await.unwrap();
    assert_eq!(
        orchestrator.cancel(sent.id).await.unwrap_err().code,
        ErrorCode::InvalidState
    );

    assert_eq!(
        orchestrator.cancel(CampaignId::generate()).await.unwrap_err().code,
        ErrorCode::NotFound
    );
}

#[tokio::test]
async fn test_large_audience_with_bounded_concurrency() {
    let harness = Harness::with_config(
        MemoryGateway::new().with_delay(std::time::Duration::from_millis(1)),
        herald_delivery::DeliveryConfig {
            max_concurrent_deliveries: 4,
            ..support::config()
        },
    );
    for n in 0..40 {
        harness.subscriber(&format!("reader{n}@example.com")).await;
    }
    let campaign = harness.campaign(newsletter()).await;

    let summary = harness
        .processor
        .orchestrator()
        .dispatch(campaign.id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.sent, 40);
    assert_eq!(summary.failed, 0);
    assert_eq!(harness.gateway.sent().len(), 40);
}
