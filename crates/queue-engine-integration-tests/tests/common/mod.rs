//! Common test utilities for queue engine integration tests
//!
//! This module provides:
//! - A registry wired to a manually advanced clock
//! - Push configuration with short backoff for fast retries
//! - Helpers for building bodies and waiting on push deliveries

use bytes::Bytes;
use queue_engine_core::{
    EngineConfig, HttpPushTransport, ManualClock, MessageId, PushMessage, QueueEngine,
    QueueRegistry, Timestamp,
};
use std::sync::Arc;
use std::time::Duration;

/// Registry plus the clock driving it
pub struct TestEnv {
    pub registry: QueueRegistry,
    pub clock: ManualClock,
}

/// Environment with default configuration
#[allow(dead_code)]
pub fn test_env() -> TestEnv {
    test_env_with(EngineConfig::default())
}

/// Environment with `config`
pub fn test_env_with(config: EngineConfig) -> TestEnv {
    let clock = ManualClock::new(Timestamp::now());
    let transport = HttpPushTransport::new(Duration::from_secs(config.push.request_timeout_seconds))
        .expect("Failed to build HTTP transport");
    let registry =
        QueueRegistry::with_components(config, Arc::new(clock.clone()), Arc::new(transport));
    TestEnv { registry, clock }
}

/// Configuration with millisecond backoff and no jitter
#[allow(dead_code)]
pub fn fast_push_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.push.retry_initial_delay_ms = 10;
    config.push.retry_max_delay_ms = 50;
    config.push.use_jitter = false;
    config.push.request_timeout_seconds = 2;
    config
}

/// One body per string
#[allow(dead_code)]
pub fn bodies(texts: &[&str]) -> Vec<Bytes> {
    texts.iter().map(|t| Bytes::from(t.to_string())).collect()
}

/// Poll until `predicate` holds for the push status of `id`
#[allow(dead_code)]
pub async fn wait_for_push<F>(queue: &QueueEngine, id: &MessageId, predicate: F) -> PushMessage
where
    F: Fn(&PushMessage) -> bool,
{
    for _ in 0..250 {
        if let Ok(message) = queue.get_push_message(id).await {
            if predicate(&message) {
                return message;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Push message {} did not reach the expected state", id);
}

/// Poll until every required delivery of `id` finished
#[allow(dead_code)]
pub async fn wait_for_completion(queue: &QueueEngine, id: &MessageId) -> PushMessage {
    wait_for_push(queue, id, |m| m.completed_at.is_some()).await
}
