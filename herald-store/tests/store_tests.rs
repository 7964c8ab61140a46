#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::Utc;
use herald_common::{
    CampaignCounter, CampaignStatus, EmailQueueItem, EmailTemplate, NewEmail, NewsletterCampaign,
    NewsletterDeliveryLog, QueueStatus, Subscriber, SubscriberId, TargetRule,
};
use herald_store::{MemoryStore, Store, StoreError};
use pretty_assertions::assert_eq;

fn campaign() -> NewsletterCampaign {
    NewsletterCampaign::new("Weekly", "This week", "<p>News</p>").unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claim_has_a_single_winner() {
    let store = Arc::new(MemoryStore::new());
    let item = EmailQueueItem::new(NewEmail::new(
        "reader@example.com",
        "news@example.org",
        "Hello",
        "<p>Hi</p>",
    ))
    .unwrap();
    store.insert_email(&item).await.unwrap();
    let id = item.id;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.claim_email(id, Utc::now()).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(
        store.email(item.id).await.unwrap().status,
        QueueStatus::Processing
    );
}

#[tokio::test]
async fn claim_rejects_ineligible_items() {
    let store = MemoryStore::new();
    let mut item = EmailQueueItem::new(NewEmail::new(
        "reader@example.com",
        "news@example.org",
        "Hello",
        "<p>Hi</p>",
    ))
    .unwrap();
    item.scheduled_for = Some(Utc::now() + chrono::Duration::hours(1));
    store.insert_email(&item).await.unwrap();

    assert!(store.claim_email(item.id, Utc::now()).await.unwrap().is_none());
    assert_eq!(
        store.email(item.id).await.unwrap().status,
        QueueStatus::Pending
    );

    let missing = EmailQueueItem::new(NewEmail::new(
        "other@example.com",
        "news@example.org",
        "Hello",
        "<p>Hi</p>",
    ))
    .unwrap();
    assert!(matches!(
        store.claim_email(missing.id, Utc::now()).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn delivery_logs_are_unique_per_pair() {
    let store = MemoryStore::new();
    let campaign = campaign();
    let subscriber = SubscriberId::generate();

    store
        .insert_log(&NewsletterDeliveryLog::new(campaign.id, subscriber))
        .await
        .unwrap();

    let duplicate = store
        .insert_log(&NewsletterDeliveryLog::new(campaign.id, subscriber))
        .await;
    assert!(matches!(duplicate, Err(StoreError::AlreadyExists { .. })));
}

#[tokio::test]
async fn update_log_requires_matching_id() {
    let store = MemoryStore::new();
    let campaign = campaign();
    let subscriber = SubscriberId::generate();
    let mut log = NewsletterDeliveryLog::new(campaign.id, subscriber);
    store.insert_log(&log).await.unwrap();

    log.mark_as_sent();
    store.update_log(&log).await.unwrap();
    assert_eq!(store.log(campaign.id, subscriber).await.unwrap(), log);

    let stranger = NewsletterDeliveryLog::new(campaign.id, subscriber);
    assert!(store.update_log(&stranger).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counter_increments_are_not_lost() {
    let store = Arc::new(MemoryStore::new());
    let campaign = campaign();
    store.insert_campaign(&campaign).await.unwrap();
    let id = campaign.id;

    let mut handles = Vec::new();
    for i in 0..200 {
        let store = Arc::clone(&store);
        let counter = if i % 4 == 0 {
            CampaignCounter::Failed
        } else {
            CampaignCounter::Sent
        };
        handles.push(tokio::spawn(async move {
            store.adjust_counter(id, counter, 1).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = store.campaign(id).await.unwrap();
    assert_eq!(stored.sent_count, 150);
    assert_eq!(stored.failed_count, 50);
}

#[tokio::test]
async fn campaign_transition_is_conditional() {
    let store = MemoryStore::new();
    let campaign = campaign();
    store.insert_campaign(&campaign).await.unwrap();

    let sendable = [CampaignStatus::Draft, CampaignStatus::Scheduled];
    assert!(
        store
            .transition_campaign(campaign.id, &sendable, CampaignStatus::Sending)
            .await
            .unwrap()
    );
    assert!(
        !store
            .transition_campaign(campaign.id, &sendable, CampaignStatus::Sending)
            .await
            .unwrap()
    );

    let stored = store.campaign(campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Sending);
    assert!(stored.started_at.is_some());
}

#[tokio::test]
async fn resolve_by_rule() {
    let store = MemoryStore::new();
    let en = Subscriber::new("en@example.com").unwrap();
    let fr = Subscriber::new("fr@example.com").unwrap().language("fr");
    let gone = Subscriber::new("gone@example.com").unwrap().active(false);
    for subscriber in [&en, &fr, &gone] {
        store.insert_subscriber(subscriber).await.unwrap();
    }

    let emails = |subscribers: Vec<Subscriber>| {
        let mut emails: Vec<_> = subscribers.into_iter().map(|s| s.email).collect();
        emails.sort();
        emails
    };

    assert_eq!(
        emails(store.resolve_subscribers(&TargetRule::All).await.unwrap()),
        ["en@example.com", "fr@example.com", "gone@example.com"]
    );
    assert_eq!(
        emails(store.resolve_subscribers(&TargetRule::Active).await.unwrap()),
        ["en@example.com", "fr@example.com"]
    );
    assert_eq!(
        emails(store.resolve_subscribers(&TargetRule::Inactive).await.unwrap()),
        ["gone@example.com"]
    );
    assert_eq!(
        emails(
            store
                .resolve_subscribers(&TargetRule::Language(String::from("fr")))
                .await
                .unwrap()
        ),
        ["fr@example.com"]
    );
    assert_eq!(
        emails(
            store
                .resolve_subscribers(&TargetRule::Custom(vec![gone.id, en.id, gone.id]))
                .await
                .unwrap()
        ),
        ["en@example.com", "gone@example.com"]
    );
}

#[tokio::test]
async fn custom_rule_with_unknown_subscriber_fails() {
    let store = MemoryStore::new();
    let known = Subscriber::new("known@example.com").unwrap();
    store.insert_subscriber(&known).await.unwrap();

    let result = store
        .resolve_subscribers(&TargetRule::Custom(vec![known.id, SubscriberId::generate()]))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::NotFound {
            resource: "subscriber",
            ..
        })
    ));
}

#[tokio::test]
async fn deleting_a_campaign_drops_its_logs() {
    let store = MemoryStore::new();
    let doomed = campaign();
    let kept = campaign();
    store.insert_campaign(&doomed).await.unwrap();
    store.insert_campaign(&kept).await.unwrap();

    let subscriber = SubscriberId::generate();
    store
        .insert_log(&NewsletterDeliveryLog::new(doomed.id, subscriber))
        .await
        .unwrap();
    store
        .insert_log(&NewsletterDeliveryLog::new(kept.id, subscriber))
        .await
        .unwrap();

    store.delete_campaign(doomed.id).await.unwrap();

    assert!(store.campaign(doomed.id).await.is_err());
    assert!(store.campaign_logs(doomed.id).await.unwrap().is_empty());
    assert_eq!(store.campaign_logs(kept.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn templates_are_replaced_by_name() {
    let store = MemoryStore::new();
    let first = EmailTemplate::new("welcome", "Hi", "<p>v1</p>").unwrap();
    let second = EmailTemplate::new("welcome", "Hi", "<p>v2</p>").unwrap();

    store.save_template(&first).await.unwrap();
    store.save_template(&second).await.unwrap();

    assert_eq!(store.template("welcome").await.unwrap().html, "<p>v2</p>");
    assert!(matches!(
        store.template("missing").await,
        Err(StoreError::NotFound { .. })
    ));
}
