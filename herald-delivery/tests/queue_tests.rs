//! Queue processor behaviour across several items and workers
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::collections::BTreeMap;

use herald_common::{EmailTemplate, NewEmail, Priority, QueueStatus};
use herald_delivery::{GatewayError, MemoryGateway, SendOutcome};
use herald_store::Store;
use pretty_assertions::assert_eq;
use support::Harness;

fn email(to: &str) -> NewEmail {
    NewEmail::new(to, "news@example.org", "Hello", "<p>Hello</p>")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_workers_send_once() {
    let harness = Harness::new(
        MemoryGateway::new().with_delay(std::time::Duration::from_millis(5)),
    );
    let item = harness
        .processor
        .queue()
        .enqueue(email("ada@example.com"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let processor = harness.processor.clone();
        let id = item.id;
        tasks.push(tokio::spawn(async move { processor.send_queued(id).await }));
    }

    let mut sent = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            SendOutcome::Sent => sent += 1,
            SendOutcome::Skipped => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(sent, 1);
    assert_eq!(harness.gateway.attempts(), 1);
    assert_eq!(
        harness.store.email(item.id).await.unwrap().status,
        QueueStatus::Sent
    );
}

#[tokio::test]
async fn test_retries_until_exhausted() {
    let harness = Harness::new(MemoryGateway::new().reject(
        "ada@example.com",
        GatewayError::Temporary(String::from("421 busy")),
    ));
    let item = harness
        .processor
        .queue()
        .enqueue(email("ada@example.com"))
        .await
        .unwrap();

    // First two failures are rescheduled
    for attempt in 1..=2 {
        let outcome = harness.processor.send_queued(item.id).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Retrying(_)), "{outcome:?}");

        // Make the item due again without waiting out the backoff
        let mut stored = harness.store.email(item.id).await.unwrap();
        assert_eq!(stored.retry_count, attempt);
        stored.scheduled_for = None;
        harness.store.update_email(&stored).await.unwrap();
    }

    let outcome = harness.processor.send_queued(item.id).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Failed(_)));

    let mut stored = harness.store.email(item.id).await.unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.retry_count, 3);
    assert!(stored.is_terminal());
    assert!(!stored.retry());

    assert_eq!(harness.processor.retry_failed_emails().await.unwrap(), 0);
}

#[tokio::test]
async fn test_process_queue_mixed_results() {
    let harness = Harness::new(
        MemoryGateway::new()
            .reject("gone@example.com", GatewayError::Permanent(String::from("550 unknown user")))
            .fail_once("busy@example.com", GatewayError::Temporary(String::from("451 later"))),
    );
    let queue = harness.processor.queue();

    for to in ["ok@example.com", "gone@example.com", "busy@example.com"] {
        queue.enqueue(email(to)).await.unwrap();
    }
    let cancelled = queue.enqueue(email("cancel@example.com")).await.unwrap();
    queue.cancel(cancelled.id).await.unwrap();

    let summary = harness.processor.process_queue().await.unwrap();
    assert_eq!(summary.picked, 3);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retrying, 1);

    // The rescheduled item is not due yet
    let summary = harness.processor.process_queue().await.unwrap();
    assert_eq!(summary.picked, 0);

    assert_eq!(
        harness
            .store
            .emails_with_status(QueueStatus::Cancelled)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_template_email_reaches_gateway() {
    let harness = Harness::new(MemoryGateway::new());
    harness
        .store
        .save_template(
            &EmailTemplate::new(
                "reset",
                "Reset for {{ user }}",
                "<a href=\"{{ link }}\">Reset</a>{{ footer }}",
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let context = BTreeMap::from([
        (String::from("user"), String::from("ada")),
        (String::from("link"), String::from("https://example.org/r/1")),
    ]);
    let item = harness
        .processor
        .queue()
        .send_template_email("reset", &context, "ada@example.com", None, Priority::Urgent)
        .await
        .unwrap();

    assert_eq!(
        harness.processor.send_queued(item.id).await.unwrap(),
        SendOutcome::Sent
    );

    let sent = harness.gateway.sent();
    assert_eq!(sent[0].subject, "Reset for ada");
    assert_eq!(
        sent[0].html,
        "<a href=\"https:&#x2f;&#x2f;example.org&#x2f;r&#x2f;1\">Reset</a>"
    );
    assert_eq!(sent[0].text, None);
}
