//! Integration tests for push queue delivery over HTTP
//!
//! These tests verify:
//! - Claimed messages leave the visible queue immediately
//! - Per-subscriber delivery status and acknowledgment
//! - Retry exhaustion and unicast failover
//! - Deferred acknowledgment for `202 Accepted` responses

mod common;

use common::{bodies, fast_push_config, test_env_with, wait_for_completion, wait_for_push};
use queue_engine_core::{DeliveryMode, DeliveryStatus, PostOptions, QueueUpdate, Subscriber};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

/// Verify that subscribe + post claims the message and delivers to every subscriber
#[tokio::test]
async fn test_multicast_delivery() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let env = test_env_with(fast_push_config());
    let queue = env.registry.queue("events").unwrap();
    let a = format!("{}/a", server.uri());
    let b = format!("{}/b", server.uri());
    queue.subscribe(&a).await.unwrap();
    queue.subscribe(&b).await.unwrap();

    // Act
    let ids = queue.post(bodies(&["event"]), PostOptions::new()).await.unwrap();

    // Assert: claimed immediately
    let info = queue.info().await;
    assert!(info.is_push_queue());
    assert_eq!(info.size, 0);
    assert_eq!(info.total_messages, 1);

    let status = queue.get_push_message(&ids[0]).await.unwrap();
    assert_eq!(status.subscriptions.len(), 2);

    let done = wait_for_completion(&queue, &ids[0]).await;
    assert!(done
        .subscriptions
        .iter()
        .all(|s| s.status == DeliveryStatus::Acknowledged));

    assert!(queue.acknowledge(&ids[0], &a).await.unwrap());
    assert!(queue.acknowledge(&ids[0], &a).await.unwrap());

    assert_eq!(requests_to(&server, "/a").await, 1);
    assert_eq!(requests_to(&server, "/b").await, 1);
}

/// Verify that push requests carry the body and delivery headers
#[tokio::test]
async fn test_push_request_format() {
    let server = MockServer::start().await;
    let env = test_env_with(fast_push_config());
    let queue = env.registry.queue("formatted").unwrap();
    queue
        .subscribe(&format!("{}/hook", server.uri()))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("X-Queue-Name", "formatted"))
        .and(header("X-Delivery-Attempt", "1"))
        .and(body_string("{\"order\":42}"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let ids = queue
        .post(bodies(&["{\"order\":42}"]), PostOptions::new())
        .await
        .unwrap();
    let done = wait_for_completion(&queue, &ids[0]).await;

    assert_eq!(done.subscriptions[0].last_status_code, Some(204));
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(
        requests[0]
            .headers
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok()),
        Some(ids[0].as_str())
    );
}

/// Verify that a failing subscriber is retried up to the queue's retries
#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fail"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let env = test_env_with(fast_push_config());
    let queue = env.registry.queue("failing").unwrap();
    queue
        .update(QueueUpdate {
            push_type: Some(DeliveryMode::Multicast),
            retries: Some(2),
        })
        .await
        .unwrap();
    let endpoint = format!("{}/fail", server.uri());
    queue.subscribe(&endpoint).await.unwrap();

    let ids = queue.post(bodies(&["doomed"]), PostOptions::new()).await.unwrap();
    let done = wait_for_completion(&queue, &ids[0]).await;

    let status = done
        .subscription(&Subscriber::new(&endpoint).unwrap())
        .unwrap();
    assert_eq!(status.status, DeliveryStatus::Exhausted);
    assert_eq!(status.attempts, 2);
    assert_eq!(status.last_status_code, Some(500));
    assert_eq!(requests_to(&server, "/fail").await, 2);

    // Exhausted messages leave the queue
    assert_eq!(queue.size().await, 0);
    assert!(!queue.delete(&ids[0]).await);
}

/// Verify that unicast delivery moves to the next subscriber and stops at the first success
#[tokio::test]
async fn test_unicast_failover() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/never"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let env = test_env_with(fast_push_config());
    let queue = env.registry.queue("unicast").unwrap();
    queue
        .update(QueueUpdate {
            push_type: Some(DeliveryMode::Unicast),
            retries: None,
        })
        .await
        .unwrap();
    for endpoint in ["/gone", "/ok", "/never"] {
        queue
            .subscribe(&format!("{}{}", server.uri(), endpoint))
            .await
            .unwrap();
    }

    let ids = queue.post(bodies(&["job"]), PostOptions::new()).await.unwrap();
    let done = wait_for_completion(&queue, &ids[0]).await;

    let statuses: Vec<_> = done.subscriptions.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            DeliveryStatus::Exhausted,
            DeliveryStatus::Acknowledged,
            DeliveryStatus::Pending,
        ]
    );
    assert_eq!(requests_to(&server, "/gone").await, 1);
}

/// Verify that a 202 response waits for an explicit acknowledgment
#[tokio::test]
async fn test_accepted_delivery_needs_acknowledgment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let env = test_env_with(fast_push_config());
    let queue = env.registry.queue("deferred").unwrap();
    let endpoint = format!("{}/async", server.uri());
    queue.subscribe(&endpoint).await.unwrap();

    let ids = queue.post(bodies(&["work"]), PostOptions::new()).await.unwrap();
    let waiting = wait_for_push(&queue, &ids[0], |m| {
        m.subscriptions[0].status == DeliveryStatus::AwaitingAck
    })
    .await;
    assert_eq!(waiting.completed_at, None);

    assert!(queue.acknowledge(&ids[0], &endpoint).await.unwrap());

    let done = queue.get_push_message(&ids[0]).await.unwrap();
    assert!(done.completed_at.is_some());
    assert_eq!(done.subscriptions[0].status, DeliveryStatus::Acknowledged);
}

/// Verify that deleting a push queue drops its push configuration
#[tokio::test]
async fn test_delete_push_queue() {
    let env = test_env_with(fast_push_config());
    let queue = env.registry.queue("short-lived").unwrap();
    queue.subscribe("http://127.0.0.1:9/hook").await.unwrap();
    assert!(queue.is_push_queue().await);

    env.registry.delete_queue("short-lived").await.unwrap();

    let info = queue.info().await;
    assert!(info.is_new());
    assert!(!info.is_push_queue());
    assert_eq!(info.subscribers, None);
}
