//! # Push Delivery
//!
//! Push queues deliver messages to subscriber endpoints instead of waiting for
//! consumers to call `get`. Each posted message is claimed by the dispatcher and
//! tracked in a [`PushRecord`] holding one [`SubscriptionStatus`] per subscriber.
//!
//! ## Per-subscriber state machine
//!
//! ```text
//! Pending -> Delivering -> Acknowledged
//!                       -> AwaitingAck -> Acknowledged (explicit acknowledge)
//!                                      -> Retrying (not acknowledged in time)
//!                       -> Retrying -> Delivering ...
//!                       -> Exhausted (attempt limit reached or permanent failure)
//! ```
//!
//! - **Multicast** queues run an independent attempt sequence per subscriber;
//!   the message is complete when every subscriber is terminal.
//! - **Unicast** queues try subscribers in order and stop at the first
//!   acknowledgment; the message is complete when any subscriber acknowledged or
//!   all of them are terminal.
//!
//! Failures are recorded, never raised: a subscriber that runs out of attempts
//! ends in [`DeliveryStatus::Exhausted`].

use crate::engine::QueueEngine;
use crate::error::{ConfigurationError, PushError, ValidationError};
use crate::message::{Message, QueueName, Timestamp};
use crate::retry::BackoffPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;

// ============================================================================
// Push Configuration Types
// ============================================================================

/// Fan-out mode of a push queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushType {
    /// Every subscriber receives every message
    Multicast,
    /// Each message is delivered to the first subscriber that accepts it
    Unicast,
}

impl std::fmt::Display for PushType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multicast => write!(f, "multicast"),
            Self::Unicast => write!(f, "unicast"),
        }
    }
}

impl FromStr for PushType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multicast" => Ok(Self::Multicast),
            "unicast" => Ok(Self::Unicast),
            other => Err(ValidationError::InvalidFormat {
                field: "push_type".to_string(),
                message: format!("expected 'multicast' or 'unicast', got '{}'", other),
            }),
        }
    }
}

/// Delivery mode requested by a queue update
///
/// `Pull` turns a push queue back into a pull queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Pull,
    Multicast,
    Unicast,
}

impl DeliveryMode {
    /// Push type of the mode, `None` for pull
    pub fn push_type(self) -> Option<PushType> {
        match self {
            Self::Pull => None,
            Self::Multicast => Some(PushType::Multicast),
            Self::Unicast => Some(PushType::Unicast),
        }
    }
}

impl From<PushType> for DeliveryMode {
    fn from(push_type: PushType) -> Self {
        match push_type {
            PushType::Multicast => Self::Multicast,
            PushType::Unicast => Self::Unicast,
        }
    }
}

/// Subscriber endpoint of a push queue
///
/// Endpoints are absolute `http` or `https` URLs and are compared by their
/// normalized string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subscriber(String);

impl Subscriber {
    /// Create subscriber with URL validation
    pub fn new(endpoint: &str) -> Result<Self, ValidationError> {
        let url = url::Url::parse(endpoint).map_err(|e| ValidationError::InvalidFormat {
            field: "subscriber".to_string(),
            message: e.to_string(),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::InvalidFormat {
                field: "subscriber".to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(Self(url.to_string()))
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Subscriber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Subscription Status
// ============================================================================

/// Delivery state of one (message, subscriber) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    AwaitingAck,
    Retrying,
    Acknowledged,
    Exhausted,
}

impl DeliveryStatus {
    /// Check if no further attempts will be made
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Exhausted)
    }
}

/// Delivery progress for a single subscriber of a push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub subscriber: Subscriber,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub updated_at: Timestamp,
}

impl SubscriptionStatus {
    fn new(subscriber: Subscriber, now: Timestamp) -> Self {
        Self {
            subscriber,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_status_code: None,
            last_error: None,
            updated_at: now,
        }
    }
}

/// A push message together with its per-subscriber delivery status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub message: Message,
    pub push_type: PushType,
    pub subscriptions: Vec<SubscriptionStatus>,
    /// Set once every required delivery reached a terminal state
    pub completed_at: Option<Timestamp>,
}

impl PushMessage {
    /// Status entry for `subscriber`
    pub fn subscription(&self, subscriber: &Subscriber) -> Option<&SubscriptionStatus> {
        self.subscriptions
            .iter()
            .find(|s| &s.subscriber == subscriber)
    }
}

/// What a delivery task should do after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextStep {
    /// Wait for backoff, then attempt again
    Retry { failed_attempts: u32 },
    /// Wait up to the message timeout for an explicit acknowledgment
    AwaitAck,
    /// This subscriber reached a terminal state
    Done(DeliveryStatus),
}

/// Delivery bookkeeping for one claimed message
#[derive(Debug, Clone)]
pub(crate) struct PushRecord {
    message: Message,
    push_type: PushType,
    subscriptions: Vec<SubscriptionStatus>,
    completed_at: Option<Timestamp>,
}

impl PushRecord {
    pub(crate) fn new(
        message: Message,
        push_type: PushType,
        subscribers: &[Subscriber],
        now: Timestamp,
    ) -> Self {
        Self {
            message,
            push_type,
            subscriptions: subscribers
                .iter()
                .map(|s| SubscriptionStatus::new(s.clone(), now))
                .collect(),
            completed_at: None,
        }
    }

    fn status_mut(&mut self, subscriber: &Subscriber) -> Option<&mut SubscriptionStatus> {
        self.subscriptions
            .iter_mut()
            .find(|s| &s.subscriber == subscriber)
    }

    /// Check if the message needs no further delivery work
    pub(crate) fn is_complete(&self) -> bool {
        match self.push_type {
            PushType::Multicast => self.subscriptions.iter().all(|s| s.status.is_terminal()),
            PushType::Unicast => {
                self.subscriptions
                    .iter()
                    .any(|s| s.status == DeliveryStatus::Acknowledged)
                    || self.subscriptions.iter().all(|s| s.status.is_terminal())
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }

    pub(crate) fn mark_finished(&mut self, now: Timestamp) {
        self.completed_at = Some(now);
    }

    /// Start a delivery attempt, returning the attempt number
    ///
    /// Returns `None` when the subscriber is unknown, already terminal, or the
    /// message as a whole needs no more work.
    pub(crate) fn begin_attempt(&mut self, subscriber: &Subscriber, now: Timestamp) -> Option<u32> {
        if self.is_complete() {
            return None;
        }
        let status = self.status_mut(subscriber)?;
        if status.status.is_terminal() {
            return None;
        }

        status.status = DeliveryStatus::Delivering;
        status.attempts += 1;
        status.updated_at = now;
        Some(status.attempts)
    }

    /// Record the result of an attempt against the attempt `limit`
    pub(crate) fn record_outcome(
        &mut self,
        subscriber: &Subscriber,
        outcome: &Result<DeliveryResponse, PushError>,
        limit: u32,
        now: Timestamp,
    ) -> Option<NextStep> {
        let status = self.status_mut(subscriber)?;
        if status.status.is_terminal() {
            // Acknowledged while the request was in flight
            return Some(NextStep::Done(status.status));
        }
        status.updated_at = now;

        match outcome {
            Ok(DeliveryResponse::Delivered { status: code }) => {
                status.last_status_code = Some(*code);
                status.last_error = None;
                status.status = DeliveryStatus::Acknowledged;
                Some(NextStep::Done(DeliveryStatus::Acknowledged))
            }
            Ok(DeliveryResponse::Accepted) => {
                status.last_status_code = Some(202);
                status.last_error = None;
                status.status = DeliveryStatus::AwaitingAck;
                Some(NextStep::AwaitAck)
            }
            Err(error) => {
                if let PushError::Rejected { status: code, .. } = error {
                    status.last_status_code = Some(*code);
                }
                status.last_error = Some(error.to_string());
                Some(Self::fail(status, error.is_transient(), limit))
            }
        }
    }

    /// Treat a missing acknowledgment as a failed attempt
    pub(crate) fn expire_ack(
        &mut self,
        subscriber: &Subscriber,
        limit: u32,
        now: Timestamp,
    ) -> Option<NextStep> {
        let status = self.status_mut(subscriber)?;
        match status.status {
            DeliveryStatus::AwaitingAck => {
                status.updated_at = now;
                status.last_error = Some("acknowledgment timed out".to_string());
                Some(Self::fail(status, true, limit))
            }
            other if other.is_terminal() => Some(NextStep::Done(other)),
            _ => None,
        }
    }

    fn fail(status: &mut SubscriptionStatus, transient: bool, limit: u32) -> NextStep {
        if !transient || status.attempts >= limit.max(1) {
            status.status = DeliveryStatus::Exhausted;
            NextStep::Done(DeliveryStatus::Exhausted)
        } else {
            status.status = DeliveryStatus::Retrying;
            NextStep::Retry {
                failed_attempts: status.attempts,
            }
        }
    }

    /// Mark `subscriber` acknowledged; idempotent
    ///
    /// Terminal statuses are left unchanged, so an exhausted subscription
    /// stays exhausted.
    pub(crate) fn acknowledge(&mut self, subscriber: &Subscriber, now: Timestamp) -> bool {
        match self.status_mut(subscriber) {
            Some(status) => {
                if !status.status.is_terminal() {
                    status.status = DeliveryStatus::Acknowledged;
                    status.updated_at = now;
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn to_push_message(&self) -> PushMessage {
        PushMessage {
            message: self.message.clone(),
            push_type: self.push_type,
            subscriptions: self.subscriptions.clone(),
            completed_at: self.completed_at,
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A single delivery attempt handed to a transport
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub queue: QueueName,
    pub message: Message,
    pub attempt: u32,
}

/// Successful transport outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResponse {
    /// The subscriber processed the message
    Delivered { status: u16 },
    /// The subscriber took the message and will acknowledge it later
    Accepted,
}

/// Interface for delivering push messages to subscriber endpoints
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Perform one delivery attempt
    async fn deliver(
        &self,
        subscriber: &Subscriber,
        request: &DeliveryRequest,
    ) -> Result<DeliveryResponse, PushError>;
}

/// Header carrying the message ID on push requests
pub const MESSAGE_ID_HEADER: &str = "X-Message-Id";
/// Header carrying the queue name on push requests
pub const QUEUE_NAME_HEADER: &str = "X-Queue-Name";
/// Header carrying the attempt number on push requests
pub const ATTEMPT_HEADER: &str = "X-Delivery-Attempt";

/// Push transport posting message bodies over HTTP
///
/// `202 Accepted` means the subscriber will acknowledge later; any other `2xx`
/// acknowledges immediately.
#[derive(Debug, Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl HttpPushTransport {
    /// Create transport with a per-request timeout
    pub fn new(request_timeout: Duration) -> Result<Self, ConfigurationError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn deliver(
        &self,
        subscriber: &Subscriber,
        request: &DeliveryRequest,
    ) -> Result<DeliveryResponse, PushError> {
        let content_type = if request.message.body_str().is_some() {
            "text/plain; charset=utf-8"
        } else {
            "application/octet-stream"
        };

        let response = self
            .client
            .post(subscriber.url())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(MESSAGE_ID_HEADER, request.message.id.as_str())
            .header(QUEUE_NAME_HEADER, request.queue.as_str())
            .header(ATTEMPT_HEADER, request.attempt.to_string())
            .body(request.message.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout {
                        endpoint: subscriber.to_string(),
                    }
                } else if e.is_builder() {
                    PushError::InvalidEndpoint {
                        endpoint: subscriber.to_string(),
                    }
                } else {
                    PushError::ConnectionFailed {
                        endpoint: subscriber.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            Ok(DeliveryResponse::Accepted)
        } else if status.is_success() {
            Ok(DeliveryResponse::Delivered {
                status: status.as_u16(),
            })
        } else {
            Err(PushError::Rejected {
                endpoint: subscriber.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Delivery work for one claimed message
#[derive(Debug, Clone)]
pub(crate) struct PushJob {
    pub message: Message,
    pub push_type: PushType,
    pub subscribers: Vec<Subscriber>,
    pub retries: u32,
}

/// Spawns and drives delivery tasks for push queues
pub struct PushDispatcher {
    transport: Arc<dyn PushTransport>,
    backoff: BackoffPolicy,
}

impl PushDispatcher {
    /// Create dispatcher over `transport`
    pub fn new(transport: Arc<dyn PushTransport>, backoff: BackoffPolicy) -> Self {
        Self { transport, backoff }
    }

    /// Start delivering `job` in the background
    pub(crate) fn dispatch(&self, engine: Arc<QueueEngine>, job: PushJob) {
        let transport = Arc::clone(&self.transport);
        let backoff = self.backoff.clone();

        debug!(
            queue = %engine.name(),
            message_id = %job.message.id,
            push_type = %job.push_type,
            subscribers = job.subscribers.len(),
            "Dispatching push message"
        );

        match job.push_type {
            PushType::Multicast => {
                for subscriber in job.subscribers {
                    let engine = Arc::clone(&engine);
                    let transport = Arc::clone(&transport);
                    let backoff = backoff.clone();
                    let message = job.message.clone();
                    let retries = job.retries;
                    tokio::spawn(async move {
                        deliver_to_subscriber(
                            &engine,
                            transport.as_ref(),
                            &backoff,
                            &message,
                            &subscriber,
                            retries,
                        )
                        .await;
                        engine.finish_push(&message.id).await;
                    });
                }
            }
            PushType::Unicast => {
                tokio::spawn(async move {
                    for subscriber in &job.subscribers {
                        let status = deliver_to_subscriber(
                            &engine,
                            transport.as_ref(),
                            &backoff,
                            &job.message,
                            subscriber,
                            job.retries,
                        )
                        .await;
                        if status == Some(DeliveryStatus::Acknowledged) {
                            break;
                        }
                    }
                    engine.finish_push(&job.message.id).await;
                });
            }
        }
    }

    /// Dispatch messages of `engine` that become visible at `due`, `delay` from now
    pub(crate) fn wake_after(
        &self,
        engine: Arc<QueueEngine>,
        due: Timestamp,
        delay: Duration,
    ) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.dispatch_ready(due).await;
        });
    }
}

/// Run the attempt sequence for one subscriber
///
/// Returns the terminal status reached, or `None` when the delivery was
/// abandoned because the message or queue went away.
async fn deliver_to_subscriber(
    engine: &QueueEngine,
    transport: &dyn PushTransport,
    backoff: &BackoffPolicy,
    message: &Message,
    subscriber: &Subscriber,
    retries: u32,
) -> Option<DeliveryStatus> {
    loop {
        let attempt = engine.begin_push_attempt(&message.id, subscriber).await?;

        let request = DeliveryRequest {
            queue: engine.name().clone(),
            message: message.clone(),
            attempt,
        };
        let outcome = transport.deliver(subscriber, &request).await;

        if let Err(error) = &outcome {
            warn!(
                queue = %engine.name(),
                message_id = %message.id,
                subscriber = %subscriber,
                attempt = attempt,
                error = %error,
                "Push delivery attempt failed"
            );
        }

        let mut step = engine
            .record_push_outcome(&message.id, subscriber, &outcome, retries)
            .await?;

        if step == NextStep::AwaitAck {
            let wait = message.timeout.to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            step = engine
                .expire_push_ack(&message.id, subscriber, retries)
                .await?;
        }

        match step {
            NextStep::Done(status) => {
                info!(
                    queue = %engine.name(),
                    message_id = %message.id,
                    subscriber = %subscriber,
                    status = ?status,
                    attempts = attempt,
                    "Push delivery finished"
                );
                return Some(status);
            }
            NextStep::Retry { failed_attempts } => {
                tokio::time::sleep(backoff.delay_for(failed_attempts)).await;
            }
            NextStep::AwaitAck => {
                // expire_push_ack never asks to wait twice
                return None;
            }
        }
    }
}
