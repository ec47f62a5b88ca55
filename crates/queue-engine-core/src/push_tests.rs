//! Tests for push delivery.

use super::*;
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::message::{MessageId, MessageState, PostOptions};
use bytes::Bytes;
use std::sync::Mutex;

fn subscriber(url: &str) -> Subscriber {
    Subscriber::new(url).unwrap()
}

fn sample_message() -> Message {
    let now = Timestamp::now();
    Message {
        id: MessageId::new(),
        body: Bytes::from("payload"),
        state: MessageState::Reserved,
        timeout: chrono::Duration::seconds(60),
        reserved_count: 0,
        enqueued_at: now,
        visible_at: now,
        reservation_expires_at: None,
    }
}

fn connection_error() -> PushError {
    PushError::ConnectionFailed {
        endpoint: "http://a.test/hook".to_string(),
        message: "connection refused".to_string(),
    }
}

mod types {
    use super::*;

    #[test]
    fn test_push_type_parsing() {
        assert_eq!("multicast".parse::<PushType>().unwrap(), PushType::Multicast);
        assert_eq!("unicast".parse::<PushType>().unwrap(), PushType::Unicast);
        assert!("broadcast".parse::<PushType>().is_err());
        assert_eq!(
            serde_json::to_string(&PushType::Unicast).unwrap(),
            "\"unicast\""
        );
    }

    #[test]
    fn test_subscriber_validation() {
        assert!(Subscriber::new("http://localhost:8080/hook").is_ok());
        assert!(Subscriber::new("https://example.com").is_ok());
        assert!(Subscriber::new("").is_err());
        assert!(Subscriber::new("/relative/path").is_err());
        assert!(Subscriber::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_delivery_status_terminal_states() {
        assert!(DeliveryStatus::Acknowledged.is_terminal());
        assert!(DeliveryStatus::Exhausted.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::AwaitingAck.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
    }
}

mod record {
    use super::*;

    fn record(push_type: PushType, urls: &[&str]) -> (PushRecord, Vec<Subscriber>) {
        let subscribers: Vec<_> = urls.iter().map(|u| subscriber(u)).collect();
        let record = PushRecord::new(sample_message(), push_type, &subscribers, Timestamp::now());
        (record, subscribers)
    }

    #[test]
    fn test_new_record_is_pending_for_every_subscriber() {
        let (record, subscribers) =
            record(PushType::Multicast, &["http://a.test/hook", "http://b.test/hook"]);

        let message = record.to_push_message();
        assert_eq!(message.subscriptions.len(), 2);
        for s in &subscribers {
            let status = message.subscription(s).unwrap();
            assert_eq!(status.status, DeliveryStatus::Pending);
            assert_eq!(status.attempts, 0);
        }
        assert!(!record.is_complete());
        assert_eq!(message.completed_at, None);
    }

    #[test]
    fn test_successful_delivery_acknowledges() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();

        assert_eq!(record.begin_attempt(&subscribers[0], now), Some(1));
        let step = record.record_outcome(
            &subscribers[0],
            &Ok(DeliveryResponse::Delivered { status: 200 }),
            3,
            now,
        );

        assert_eq!(step, Some(NextStep::Done(DeliveryStatus::Acknowledged)));
        assert!(record.is_complete());
        let status = record.to_push_message().subscriptions[0].clone();
        assert_eq!(status.last_status_code, Some(200));
        assert_eq!(record.begin_attempt(&subscribers[0], now), None);
    }

    #[test]
    fn test_transient_failures_retry_until_limit() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();
        let sub = &subscribers[0];

        record.begin_attempt(sub, now);
        assert_eq!(
            record.record_outcome(sub, &Err(connection_error()), 2, now),
            Some(NextStep::Retry { failed_attempts: 1 })
        );
        assert_eq!(
            record.to_push_message().subscriptions[0].status,
            DeliveryStatus::Retrying
        );

        assert_eq!(record.begin_attempt(sub, now), Some(2));
        assert_eq!(
            record.record_outcome(sub, &Err(connection_error()), 2, now),
            Some(NextStep::Done(DeliveryStatus::Exhausted))
        );

        let status = record.to_push_message().subscriptions[0].clone();
        assert_eq!(status.attempts, 2);
        assert!(status.last_error.unwrap().contains("connection refused"));
        assert!(record.is_complete());
    }

    #[test]
    fn test_permanent_rejection_exhausts_immediately() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();
        let rejected = PushError::Rejected {
            endpoint: subscribers[0].to_string(),
            status: 404,
        };

        record.begin_attempt(&subscribers[0], now);
        let step = record.record_outcome(&subscribers[0], &Err(rejected), 10, now);

        assert_eq!(step, Some(NextStep::Done(DeliveryStatus::Exhausted)));
        assert_eq!(
            record.to_push_message().subscriptions[0].last_status_code,
            Some(404)
        );
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();

        assert_eq!(record.begin_attempt(&subscribers[0], now), Some(1));
        assert_eq!(
            record.record_outcome(&subscribers[0], &Err(connection_error()), 0, now),
            Some(NextStep::Done(DeliveryStatus::Exhausted))
        );
    }

    #[test]
    fn test_accepted_delivery_waits_for_acknowledgment() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();
        let sub = &subscribers[0];

        record.begin_attempt(sub, now);
        assert_eq!(
            record.record_outcome(sub, &Ok(DeliveryResponse::Accepted), 3, now),
            Some(NextStep::AwaitAck)
        );
        assert!(!record.is_complete());

        // Not acknowledged in time counts as a failed attempt
        assert_eq!(
            record.expire_ack(sub, 3, now),
            Some(NextStep::Retry { failed_attempts: 1 })
        );

        record.begin_attempt(sub, now);
        record.record_outcome(sub, &Ok(DeliveryResponse::Accepted), 3, now);
        assert!(record.acknowledge(sub, now));
        assert_eq!(
            record.expire_ack(sub, 3, now),
            Some(NextStep::Done(DeliveryStatus::Acknowledged))
        );
        assert!(record.is_complete());
    }

    #[test]
    fn test_acknowledge_is_idempotent_and_checks_subscriber() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();

        assert!(record.acknowledge(&subscribers[0], now));
        assert!(record.acknowledge(&subscribers[0], now));
        assert!(!record.acknowledge(&subscriber("http://other.test/hook"), now));
    }

    #[test]
    fn test_acknowledge_keeps_exhausted_status() {
        let (mut record, subscribers) = record(PushType::Multicast, &["http://a.test/hook"]);
        let now = Timestamp::now();
        let sub = &subscribers[0];

        record.begin_attempt(sub, now);
        record.record_outcome(sub, &Err(connection_error()), 1, now);
        assert!(record.acknowledge(sub, now));

        assert_eq!(
            record.to_push_message().subscriptions[0].status,
            DeliveryStatus::Exhausted
        );
    }

    #[test]
    fn test_multicast_completes_when_every_subscriber_is_terminal() {
        let (mut record, subscribers) =
            record(PushType::Multicast, &["http://a.test/hook", "http://b.test/hook"]);
        let now = Timestamp::now();

        record.acknowledge(&subscribers[0], now);
        assert!(!record.is_complete());

        record.begin_attempt(&subscribers[1], now);
        record.record_outcome(&subscribers[1], &Err(connection_error()), 1, now);
        assert!(record.is_complete());
    }

    #[test]
    fn test_unicast_completes_on_first_acknowledgment() {
        let (mut record, subscribers) =
            record(PushType::Unicast, &["http://a.test/hook", "http://b.test/hook"]);
        let now = Timestamp::now();

        record.acknowledge(&subscribers[1], now);

        assert!(record.is_complete());
        assert_eq!(record.begin_attempt(&subscribers[0], now), None);
    }
}

mod dispatcher {
    use super::*;

    type CallLog = Arc<Mutex<Vec<(String, u32)>>>;

    fn engine_with(
        transport: MockPushTransport,
        config: EngineConfig,
    ) -> (Arc<QueueEngine>, ManualClock) {
        let clock = ManualClock::new(Timestamp::now());
        let dispatcher = Arc::new(PushDispatcher::new(
            Arc::new(transport),
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 2.0)
                .without_jitter(),
        ));
        let engine = QueueEngine::new(
            QueueName::new("push-queue".to_string()).unwrap(),
            &config,
            Arc::new(clock.clone()),
            dispatcher,
        );
        (engine, clock)
    }

    /// Transport that records every call and answers with `respond`
    fn recording_transport(
        respond: impl Fn(&Subscriber, u32) -> Result<DeliveryResponse, PushError>
            + Send
            + Sync
            + 'static,
    ) -> (MockPushTransport, CallLog) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        let mut transport = MockPushTransport::new();
        transport.expect_deliver().returning(move |sub, request| {
            log.lock()
                .unwrap()
                .push((sub.url().to_string(), request.attempt));
            respond(sub, request.attempt)
        });
        (transport, calls)
    }

    async fn wait_for_completion(engine: &QueueEngine, id: &MessageId) -> PushMessage {
        for _ in 0..1_000 {
            if let Ok(message) = engine.get_push_message(id).await {
                if message.completed_at.is_some() {
                    return message;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("push message {} never completed", id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multicast_delivers_to_every_subscriber() {
        let (transport, calls) =
            recording_transport(|_, _| Ok(DeliveryResponse::Delivered { status: 200 }));
        let (engine, _clock) = engine_with(transport, EngineConfig::default());
        engine.subscribe("http://a.test/hook").await.unwrap();
        engine.subscribe("http://b.test/hook").await.unwrap();

        let ids = engine
            .post(vec![Bytes::from("event")], PostOptions::new())
            .await
            .unwrap();

        // Claimed by the dispatcher before post returns
        assert_eq!(engine.size().await, 0);
        assert_eq!(engine.info().await.total_messages, 1);

        let message = wait_for_completion(&engine, &ids[0]).await;
        assert_eq!(message.subscriptions.len(), 2);
        assert!(message
            .subscriptions
            .iter()
            .all(|s| s.status == DeliveryStatus::Acknowledged && s.attempts == 1));
        assert_eq!(calls.lock().unwrap().len(), 2);

        // Completed messages leave the queue
        assert!(!engine.delete(&ids[0]).await);
        assert!(engine.get(1).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_subscriber_is_exhausted_after_retries() {
        let (transport, calls) = recording_transport(|sub, _| {
            if sub.url().contains("bad") {
                Err(connection_error())
            } else {
                Ok(DeliveryResponse::Delivered { status: 204 })
            }
        });
        let (engine, _clock) = engine_with(transport, EngineConfig::default());
        engine
            .update(crate::engine::QueueUpdate {
                push_type: Some(DeliveryMode::Multicast),
                retries: Some(3),
            })
            .await
            .unwrap();
        engine.subscribe("http://good.test/hook").await.unwrap();
        engine.subscribe("http://bad.test/hook").await.unwrap();

        let ids = engine
            .post(vec![Bytes::from("event")], PostOptions::new())
            .await
            .unwrap();
        let message = wait_for_completion(&engine, &ids[0]).await;

        let good = message.subscription(&subscriber("http://good.test/hook")).unwrap();
        let bad = message.subscription(&subscriber("http://bad.test/hook")).unwrap();
        assert_eq!(good.status, DeliveryStatus::Acknowledged);
        assert_eq!(bad.status, DeliveryStatus::Exhausted);
        assert_eq!(bad.attempts, 3);

        let bad_attempts: Vec<u32> = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains("bad"))
            .map(|(_, attempt)| *attempt)
            .collect();
        assert_eq!(bad_attempts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unicast_stops_at_first_acknowledgment() {
        let (transport, calls) = recording_transport(|sub, _| {
            if sub.url().contains("first") {
                Err(PushError::Rejected {
                    endpoint: sub.to_string(),
                    status: 410,
                })
            } else {
                Ok(DeliveryResponse::Delivered { status: 200 })
            }
        });
        let (engine, _clock) = engine_with(transport, EngineConfig::default());
        engine
            .update(crate::engine::QueueUpdate {
                push_type: Some(DeliveryMode::Unicast),
                retries: None,
            })
            .await
            .unwrap();
        for url in ["http://first.test/hook", "http://second.test/hook", "http://third.test/hook"] {
            engine.subscribe(url).await.unwrap();
        }

        let ids = engine
            .post(vec![Bytes::from("job")], PostOptions::new())
            .await
            .unwrap();
        let message = wait_for_completion(&engine, &ids[0]).await;

        let statuses: Vec<_> = message.subscriptions.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                DeliveryStatus::Exhausted,
                DeliveryStatus::Acknowledged,
                DeliveryStatus::Pending
            ]
        );
        let urls: Vec<String> = calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(
            urls,
            vec!["http://first.test/hook".to_string(), "http://second.test/hook".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_delivery_completes_on_acknowledge() {
        let (transport, _calls) = recording_transport(|_, _| Ok(DeliveryResponse::Accepted));
        let (engine, _clock) = engine_with(transport, EngineConfig::default());
        engine.subscribe("http://a.test/hook").await.unwrap();

        let ids = engine
            .post(vec![Bytes::from("event")], PostOptions::new())
            .await
            .unwrap();

        let mut awaiting = false;
        for _ in 0..100 {
            let message = engine.get_push_message(&ids[0]).await.unwrap();
            if message.subscriptions[0].status == DeliveryStatus::AwaitingAck {
                awaiting = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(awaiting);

        assert!(engine.acknowledge(&ids[0], "http://a.test/hook").await.unwrap());
        assert!(engine.acknowledge(&ids[0], "http://a.test/hook").await.unwrap());

        let message = engine.get_push_message(&ids[0]).await.unwrap();
        assert!(message.completed_at.is_some());
        assert_eq!(message.subscriptions[0].status, DeliveryStatus::Acknowledged);
        assert!(matches!(
            engine
                .acknowledge(&ids[0], "http://unknown.test/hook")
                .await,
            Err(crate::error::QueueError::SubscriberNotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_racing_acknowledge_settles_once() {
        let (transport, _calls) = recording_transport(|_, _| Ok(DeliveryResponse::Accepted));
        let (engine, _clock) = engine_with(transport, EngineConfig::default());
        engine.subscribe("http://a.test/hook").await.unwrap();

        let ids = engine
            .post(vec![Bytes::from("event")], PostOptions::new())
            .await
            .unwrap();
        for _ in 0..1_000 {
            let message = engine.get_push_message(&ids[0]).await.unwrap();
            if message.subscriptions[0].status == DeliveryStatus::AwaitingAck {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let deleter = {
            let engine = Arc::clone(&engine);
            let id = ids[0].clone();
            tokio::spawn(async move { engine.delete(&id).await })
        };
        let acknowledger = {
            let engine = Arc::clone(&engine);
            let id = ids[0].clone();
            tokio::spawn(async move { engine.acknowledge(&id, "http://a.test/hook").await })
        };
        let deleted = deleter.await.unwrap();
        let acknowledged = acknowledger.await.unwrap();

        // Exactly one of the two settles the message
        match acknowledged {
            Ok(true) => {
                assert!(!deleted);
                let message = engine.get_push_message(&ids[0]).await.unwrap();
                assert!(message.completed_at.is_some());
            }
            Err(crate::error::QueueError::MessageNotFound { .. }) => {
                assert!(deleted);
                assert!(engine.get_push_message(&ids[0]).await.is_err());
            }
            other => panic!("unexpected acknowledge result: {:?}", other),
        }
        assert!(!engine.delete(&ids[0]).await);
        assert_eq!(engine.size().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_push_message_dispatches_when_due() {
        let (transport, calls) =
            recording_transport(|_, _| Ok(DeliveryResponse::Delivered { status: 200 }));
        let (engine, clock) = engine_with(transport, EngineConfig::default());
        engine.subscribe("http://a.test/hook").await.unwrap();

        let ids = engine
            .post(
                vec![Bytes::from("later")],
                PostOptions::new().with_delay(chrono::Duration::seconds(5)),
            )
            .await
            .unwrap();

        assert!(engine.get_push_message(&ids[0]).await.is_err());
        assert!(calls.lock().unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(5));
        let message = wait_for_completion(&engine, &ids[0]).await;
        assert_eq!(message.subscriptions[0].status, DeliveryStatus::Acknowledged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledging_exhausted_subscriber_keeps_status() {
        let (transport, _calls) = recording_transport(|sub, _| {
            Err(PushError::Rejected {
                endpoint: sub.to_string(),
                status: 404,
            })
        });
        let (engine, _clock) = engine_with(transport, EngineConfig::default());
        engine.subscribe("http://a.test/missing").await.unwrap();

        let ids = engine
            .post(vec![Bytes::from("lost")], PostOptions::new())
            .await
            .unwrap();
        let before = wait_for_completion(&engine, &ids[0]).await;
        assert_eq!(before.subscriptions[0].status, DeliveryStatus::Exhausted);

        assert!(engine
            .acknowledge(&ids[0], "http://a.test/missing")
            .await
            .unwrap());

        let after = engine.get_push_message(&ids[0]).await.unwrap();
        assert_eq!(after.subscriptions[0].status, DeliveryStatus::Exhausted);
        assert_eq!(after.completed_at, before.completed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_message_dispatches_after_queue_becomes_push() {
        let (transport, calls) =
            recording_transport(|_, _| Ok(DeliveryResponse::Delivered { status: 200 }));
        let (engine, clock) = engine_with(transport, EngineConfig::default());

        let ids = engine
            .post(
                vec![Bytes::from("later")],
                PostOptions::new().with_delay(chrono::Duration::seconds(5)),
            )
            .await
            .unwrap();
        engine.subscribe("http://a.test/hook").await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        let message = wait_for_completion(&engine, &ids[0]).await;

        assert_eq!(message.subscriptions[0].status, DeliveryStatus::Acknowledged);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_consumer_reservation_dispatches_after_subscribe() {
        let (transport, calls) =
            recording_transport(|_, _| Ok(DeliveryResponse::Delivered { status: 200 }));
        let (engine, clock) = engine_with(transport, EngineConfig::default());

        let ids = engine
            .post(
                vec![Bytes::from("held")],
                PostOptions::new().with_timeout(chrono::Duration::seconds(30)),
            )
            .await
            .unwrap();
        engine.get(1).await.unwrap();
        engine.subscribe("http://a.test/hook").await.unwrap();
        assert!(engine.get_push_message(&ids[0]).await.is_err());

        clock.advance(chrono::Duration::seconds(30));
        let message = wait_for_completion(&engine, &ids[0]).await;

        assert_eq!(message.subscriptions[0].status, DeliveryStatus::Acknowledged);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_limit_evicts_oldest_records() {
        let (transport, _calls) =
            recording_transport(|_, _| Ok(DeliveryResponse::Delivered { status: 200 }));
        let mut config = EngineConfig::default();
        config.push.history_limit = 1;
        let (engine, _clock) = engine_with(transport, config);
        engine.subscribe("http://a.test/hook").await.unwrap();

        let first = engine
            .post(vec![Bytes::from("one")], PostOptions::new())
            .await
            .unwrap();
        wait_for_completion(&engine, &first[0]).await;

        let second = engine
            .post(vec![Bytes::from("two")], PostOptions::new())
            .await
            .unwrap();
        wait_for_completion(&engine, &second[0]).await;

        assert!(engine.get_push_message(&first[0]).await.is_err());
        assert!(engine.get_push_message(&second[0]).await.is_ok());
    }
}

mod http_transport {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            queue: QueueName::new("orders".to_string()).unwrap(),
            message: sample_message(),
            attempt: 1,
        }
    }

    fn transport() -> HttpPushTransport {
        HttpPushTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_body_with_delivery_headers() {
        let server = MockServer::start().await;
        let request = request();

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header(QUEUE_NAME_HEADER, "orders"))
            .and(header(MESSAGE_ID_HEADER, request.message.id.as_str()))
            .and(header(ATTEMPT_HEADER, "1"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sub = subscriber(&format!("{}/hook", server.uri()));
        let response = transport().deliver(&sub, &request).await.unwrap();

        assert_eq!(response, DeliveryResponse::Delivered { status: 200 });
    }

    #[tokio::test]
    async fn test_accepted_status_defers_acknowledgment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let sub = subscriber(&format!("{}/hook", server.uri()));
        let response = transport().deliver(&sub, &request()).await.unwrap();

        assert_eq!(response, DeliveryResponse::Accepted);
    }

    #[tokio::test]
    async fn test_error_statuses_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unavailable"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let unavailable = subscriber(&format!("{}/unavailable", server.uri()));
        let error = transport()
            .deliver(&unavailable, &request())
            .await
            .unwrap_err();
        assert!(matches!(error, PushError::Rejected { status: 503, .. }));
        assert!(error.is_transient());

        let missing = subscriber(&format!("{}/missing", server.uri()));
        let error = transport().deliver(&missing, &request()).await.unwrap_err();
        assert!(matches!(error, PushError::Rejected { status: 404, .. }));
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn test_slow_subscriber_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = HttpPushTransport::new(Duration::from_millis(100)).unwrap();
        let sub = subscriber(&format!("{}/hook", server.uri()));
        let error = transport.deliver(&sub, &request()).await.unwrap_err();

        assert!(matches!(error, PushError::Timeout { .. }));
        assert!(error.is_transient());
    }
}
