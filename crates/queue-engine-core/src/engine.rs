//! # Queue Engine
//!
//! A [`QueueEngine`] owns the messages of one named queue and implements every
//! queue-scoped operation: post, get, peek, delete, release, touch, size,
//! clear, info and the push configuration calls.
//!
//! All state lives behind a single per-queue lock. Every operation:
//!
//! 1. reads the clock once,
//! 2. promotes messages whose delay or reservation elapsed before that instant,
//! 3. performs its own transition(s),
//! 4. hands newly visible messages of a push queue to the [`PushDispatcher`],
//! 5. arms a wake-up for the earliest pending message of a push queue.
//!
//! Timers never run against the store directly, so eligibility is a pure
//! function of stored timestamps and the clock reading.

use crate::clock::Clock;
use crate::config::{EngineConfig, PushConfig, QueueSettings};
use crate::error::{PushError, QueueError, ValidationError};
use crate::message::{Message, MessageId, MessageState, PostOptions, QueueId, QueueName, Timestamp};
use crate::push::{
    DeliveryMode, DeliveryResponse, NextStep, PushDispatcher, PushJob, PushMessage, PushRecord,
    PushType, Subscriber,
};
use crate::scheduler::VisibilityScheduler;
use crate::store::MessageStore;
use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Queue metadata returned by `info`
///
/// `retries` and `subscribers` are only present for push queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: QueueName,
    /// `None` until the queue is materialized by a post or configuration update
    pub id: Option<QueueId>,
    pub size: usize,
    pub total_messages: u64,
    pub push_type: Option<PushType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<Vec<Subscriber>>,
}

impl QueueInfo {
    /// Check if the queue has never been materialized
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Check if the queue delivers by push
    pub fn is_push_queue(&self) -> bool {
        self.push_type.is_some()
    }
}

/// Push configuration change; unset fields are left as they are
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    /// New delivery mode; [`DeliveryMode::Pull`] drops push configuration
    #[serde(default)]
    pub push_type: Option<DeliveryMode>,
    #[serde(default)]
    pub retries: Option<u32>,
}

/// Mutable state of a queue, guarded by the engine lock
#[derive(Debug)]
struct QueueState {
    id: Option<QueueId>,
    push_type: Option<PushType>,
    retries: u32,
    subscribers: Vec<Subscriber>,
    store: MessageStore,
    scheduler: VisibilityScheduler,
    total_messages: u64,
    push_records: HashMap<MessageId, PushRecord>,
    finished_pushes: VecDeque<MessageId>,
    wake_at: Option<Timestamp>,
}

impl QueueState {
    fn new(retries: u32) -> Self {
        Self {
            id: None,
            push_type: None,
            retries,
            subscribers: Vec::new(),
            store: MessageStore::new(),
            scheduler: VisibilityScheduler::new(),
            total_messages: 0,
            push_records: HashMap::new(),
            finished_pushes: VecDeque::new(),
            wake_at: None,
        }
    }

    fn materialize(&mut self) {
        if self.id.is_none() {
            self.id = Some(QueueId::new());
        }
    }

    /// Promote every message whose delay or reservation elapsed by `now`
    fn refresh(&mut self, now: Timestamp) -> usize {
        let mut promoted = 0;
        for (id, due) in self.scheduler.take_due(&now) {
            let from = match self.store.state_of(&id) {
                Some(MessageState::Delayed) => MessageState::Delayed,
                Some(MessageState::Reserved) => MessageState::Reserved,
                _ => continue,
            };

            // The new enqueued_at is the instant the message became due, which
            // places expired reservations behind everything posted meanwhile.
            match self
                .store
                .transition(&id, &[from], MessageState::Queued, Some(due))
            {
                Ok(_) => {
                    if from == MessageState::Reserved {
                        debug!(message_id = %id, expired_at = %due, "Reservation expired");
                    }
                    self.scheduler.enqueue(id, due);
                    promoted += 1;
                }
                Err(error) => {
                    debug!(message_id = %id, error = %error, "Skipping stale schedule entry");
                }
            }
        }
        promoted
    }

    /// Claim every visible message for push delivery
    fn claim_for_push(&mut self, now: Timestamp) -> Vec<PushJob> {
        let Some(push_type) = self.push_type else {
            return Vec::new();
        };
        if self.subscribers.is_empty() {
            return Vec::new();
        }

        let mut jobs = Vec::new();
        while let Some(id) = self.scheduler.pop_visible() {
            match self.store.transition(
                &id,
                &[MessageState::Queued],
                MessageState::Reserved,
                None,
            ) {
                Ok(message) => {
                    self.push_records.insert(
                        id,
                        PushRecord::new(message.clone(), push_type, &self.subscribers, now),
                    );
                    jobs.push(PushJob {
                        message,
                        push_type,
                        subscribers: self.subscribers.clone(),
                        retries: self.retries,
                    });
                }
                Err(error) => {
                    debug!(message_id = %id, error = %error, "Skipping push claim candidate");
                }
            }
        }
        jobs
    }

    /// Earliest pending due time of a push queue not yet covered by a wake-up
    fn arm_wake(&mut self, now: Timestamp) -> Option<Timestamp> {
        if self.push_type.is_none() || self.subscribers.is_empty() {
            return None;
        }
        let next = self.scheduler.next_due()?;
        if self
            .wake_at
            .is_some_and(|armed| armed > now && armed <= next)
        {
            return None;
        }
        self.wake_at = Some(next);
        Some(next)
    }

    /// Finalize a push message once no delivery work remains
    ///
    /// The message leaves the queue; its record is kept for status queries
    /// until more than `history_limit` newer records have completed.
    fn finish_push(&mut self, id: &MessageId, now: Timestamp, history_limit: usize) -> bool {
        let Some(record) = self.push_records.get_mut(id) else {
            return false;
        };
        if record.is_finished() || !record.is_complete() {
            return false;
        }

        record.mark_finished(now);
        self.store.delete(id);
        self.scheduler.cancel(id);
        self.finished_pushes.push_back(id.clone());

        while self.finished_pushes.len() > history_limit {
            if let Some(evicted) = self.finished_pushes.pop_front() {
                self.push_records.remove(&evicted);
            }
        }
        true
    }

    /// Fail unless `id` is held by a consumer reservation
    fn ensure_consumer_reservation(&self, id: &MessageId) -> Result<Message, QueueError> {
        match self.store.get_by_id(id) {
            None => Err(QueueError::MessageNotFound {
                message_id: id.clone(),
            }),
            Some(message)
                if message.state == MessageState::Reserved
                    && message.reservation_expires_at.is_some() =>
            {
                Ok(message)
            }
            Some(message) => Err(QueueError::Conflict {
                message_id: id.clone(),
                actual: message.state,
                expected: vec![MessageState::Reserved],
            }),
        }
    }

    fn info(&self, name: &QueueName) -> QueueInfo {
        let push = self.push_type.is_some();
        QueueInfo {
            name: name.clone(),
            id: self.id.clone(),
            size: self.scheduler.visible_len(),
            total_messages: self.total_messages,
            push_type: self.push_type,
            retries: push.then_some(self.retries),
            subscribers: push.then(|| self.subscribers.clone()),
        }
    }
}

/// Message queue with reservation semantics and optional push delivery
pub struct QueueEngine {
    name: QueueName,
    settings: QueueSettings,
    push: PushConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<PushDispatcher>,
    state: Mutex<QueueState>,
    this: Weak<QueueEngine>,
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl QueueEngine {
    /// Create engine for queue `name`
    pub fn new(
        name: QueueName,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<PushDispatcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            settings: config.queue.clone(),
            push: config.push.clone(),
            clock,
            dispatcher,
            state: Mutex::new(QueueState::new(config.push.default_retries)),
            this: this.clone(),
        })
    }

    /// Queue name
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Run `op` under the queue lock with time-based transitions applied
    async fn with_state<R>(&self, op: impl FnOnce(&mut QueueState, Timestamp) -> R) -> R {
        let now = self.clock.now();
        let (result, jobs, wake) = {
            let mut state = self.state.lock().await;
            state.refresh(now);
            let mut jobs = state.claim_for_push(now);
            let result = op(&mut state, now);
            jobs.extend(state.claim_for_push(now));
            (result, jobs, state.arm_wake(now))
        };
        self.dispatch(jobs);
        self.schedule_wake(wake, now);
        result
    }

    fn schedule_wake(&self, due: Option<Timestamp>, now: Timestamp) {
        let Some(due) = due else {
            return;
        };
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        let delay = due.duration_since(&now).to_std().unwrap_or_default();
        debug!(queue = %self.name, due = %due, "Scheduling push wake-up");
        self.dispatcher.wake_after(engine, due, delay);
    }

    fn dispatch(&self, jobs: Vec<PushJob>) {
        if jobs.is_empty() {
            return;
        }
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        for job in jobs {
            self.dispatcher.dispatch(Arc::clone(&engine), job);
        }
    }

    fn check_count(&self, field: &str, count: usize) -> Result<(), QueueError> {
        if count == 0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        if count > self.settings.max_batch_size {
            return Err(QueueError::BatchTooLarge {
                size: count,
                max_size: self.settings.max_batch_size,
            });
        }
        Ok(())
    }

    fn check_delay(&self, delay: Duration) -> Result<(), QueueError> {
        if delay < Duration::zero() || delay > self.settings.max_delay() {
            return Err(ValidationError::OutOfRange {
                field: "delay".to_string(),
                message: format!(
                    "{}s is outside 0..={}s",
                    delay.num_seconds(),
                    self.settings.max_delay_seconds
                ),
            }
            .into());
        }
        Ok(())
    }

    fn check_timeout(&self, timeout: Duration) -> Result<(), QueueError> {
        if timeout <= Duration::zero() || timeout > self.settings.max_timeout() {
            return Err(ValidationError::OutOfRange {
                field: "timeout".to_string(),
                message: format!(
                    "{}s is outside 1..={}s",
                    timeout.num_seconds(),
                    self.settings.max_timeout_seconds
                ),
            }
            .into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pull operations
    // ------------------------------------------------------------------------

    /// Post one message per body, returning IDs in submission order
    ///
    /// A positive delay keeps the messages `Delayed` until it elapses. On push
    /// queues with subscribers, visible messages are claimed for delivery
    /// before this returns.
    pub async fn post(
        &self,
        bodies: Vec<Bytes>,
        options: PostOptions,
    ) -> Result<Vec<MessageId>, QueueError> {
        if bodies.is_empty() {
            return Err(ValidationError::Required {
                field: "bodies".to_string(),
            }
            .into());
        }
        if bodies.len() > self.settings.max_batch_size {
            return Err(QueueError::BatchTooLarge {
                size: bodies.len(),
                max_size: self.settings.max_batch_size,
            });
        }
        if let Some(body) = bodies
            .iter()
            .find(|b| b.len() > self.settings.max_body_size)
        {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size: self.settings.max_body_size,
            });
        }
        self.check_delay(options.delay)?;
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.settings.default_timeout());
        self.check_timeout(timeout)?;

        let count = bodies.len();
        let delay = options.delay;
        let ids = self
            .with_state(|state, now| {
                state.materialize();
                let ids: Vec<MessageId> = bodies
                    .into_iter()
                    .map(|body| {
                        let message = state.store.create(body, delay, timeout, now);
                        if message.state == MessageState::Delayed {
                            state.scheduler.schedule(message.id.clone(), message.visible_at);
                        } else {
                            state.scheduler.enqueue(message.id.clone(), message.visible_at);
                        }
                        message.id
                    })
                    .collect();
                state.total_messages += ids.len() as u64;
                ids
            })
            .await;

        info!(
            queue = %self.name,
            count = count,
            delay_seconds = delay.num_seconds(),
            "Posted messages"
        );
        Ok(ids)
    }

    /// Reserve up to `max` visible messages in FIFO order
    ///
    /// Each returned message is `Reserved` until `now + timeout`. An empty
    /// result means nothing is currently eligible.
    pub async fn get(&self, max: usize) -> Result<Vec<Message>, QueueError> {
        self.check_count("max", max)?;

        let messages = self
            .with_state(|state, now| {
                let mut reserved = Vec::with_capacity(max);
                while reserved.len() < max {
                    let Some(id) = state.scheduler.pop_visible() else {
                        break;
                    };
                    let Some(timeout) = state.store.get_by_id(&id).map(|m| m.timeout) else {
                        continue;
                    };

                    let expires_at = now.plus(timeout);
                    match state.store.transition(
                        &id,
                        &[MessageState::Queued],
                        MessageState::Reserved,
                        Some(expires_at),
                    ) {
                        Ok(message) => {
                            state.scheduler.schedule(id, expires_at);
                            reserved.push(message);
                        }
                        Err(error) => {
                            debug!(message_id = %id, error = %error, "Skipping reservation candidate");
                        }
                    }
                }
                reserved
            })
            .await;

        debug!(queue = %self.name, reserved = messages.len(), "Reserved messages");
        Ok(messages)
    }

    /// Copy up to `count` visible messages without changing any state
    pub async fn peek(&self, count: usize) -> Result<Vec<Message>, QueueError> {
        self.check_count("count", count)?;

        Ok(self
            .with_state(|state, _| {
                state
                    .scheduler
                    .visible()
                    .take(count)
                    .filter_map(|id| state.store.get_by_id(id))
                    .collect()
            })
            .await)
    }

    /// Remove a message regardless of its state
    ///
    /// Returns `false` when the message was unknown; deleting twice is not an
    /// error. Pending push deliveries for the message are abandoned.
    pub async fn delete(&self, id: &MessageId) -> bool {
        let removed = self
            .with_state(|state, _| {
                let removed = state.store.delete(id).is_some();
                state.scheduler.cancel(id);
                if state
                    .push_records
                    .get(id)
                    .is_some_and(|record| !record.is_finished())
                {
                    state.push_records.remove(id);
                }
                removed
            })
            .await;

        if removed {
            debug!(queue = %self.name, message_id = %id, "Deleted message");
        }
        removed
    }

    /// Return a reserved message to the queue before its timeout
    ///
    /// With a zero delay the message is visible immediately, behind every
    /// message already queued. A positive delay makes it `Delayed` first.
    pub async fn release(&self, id: &MessageId, delay: Duration) -> Result<Message, QueueError> {
        self.check_delay(delay)?;

        let message = self
            .with_state(|state, now| -> Result<Message, QueueError> {
                state.ensure_consumer_reservation(id)?;
                if delay > Duration::zero() {
                    let due = now.plus(delay);
                    let message = state.store.transition(
                        id,
                        &[MessageState::Reserved],
                        MessageState::Delayed,
                        Some(due),
                    )?;
                    state.scheduler.schedule(id.clone(), due);
                    Ok(message)
                } else {
                    let message = state.store.transition(
                        id,
                        &[MessageState::Reserved],
                        MessageState::Queued,
                        Some(now),
                    )?;
                    state.scheduler.enqueue(id.clone(), now);
                    Ok(message)
                }
            })
            .await?;

        debug!(
            queue = %self.name,
            message_id = %id,
            delay_seconds = delay.num_seconds(),
            "Released message"
        );
        Ok(message)
    }

    /// Extend a reservation to `now + timeout`
    pub async fn touch(&self, id: &MessageId) -> Result<Message, QueueError> {
        self.with_state(|state, now| -> Result<Message, QueueError> {
            let current = state.ensure_consumer_reservation(id)?;
            let expires_at = now.plus(current.timeout);
            let message = state.store.transition(
                id,
                &[MessageState::Reserved],
                MessageState::Reserved,
                Some(expires_at),
            )?;
            state.scheduler.schedule(id.clone(), expires_at);
            Ok(message)
        })
        .await
    }

    /// Number of visible (`Queued`) messages
    pub async fn size(&self) -> usize {
        self.with_state(|state, _| state.scheduler.visible_len())
            .await
    }

    /// Remove every message, returning how many were removed
    ///
    /// `total_messages` and push configuration are left as they are.
    pub async fn clear(&self) -> usize {
        let removed = self
            .with_state(|state, _| {
                state.scheduler.clear();
                state.push_records.retain(|_, record| record.is_finished());
                state.store.clear()
            })
            .await;

        info!(queue = %self.name, removed = removed, "Cleared queue");
        removed
    }

    /// Queue metadata
    pub async fn info(&self) -> QueueInfo {
        self.with_state(|state, _| state.info(&self.name)).await
    }

    /// Check if the queue has never been materialized
    pub async fn is_new(&self) -> bool {
        self.state.lock().await.id.is_none()
    }

    /// Check if the queue delivers by push
    pub async fn is_push_queue(&self) -> bool {
        self.state.lock().await.push_type.is_some()
    }

    /// Reset the queue to the never-materialized state
    ///
    /// Messages, counters, push configuration and push history are dropped.
    /// In-flight deliveries stop at their next attempt.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = QueueState::new(self.push.default_retries);
        drop(state);

        info!(queue = %self.name, "Reset queue");
    }

    /// Apply time-based transitions and dispatch ready push messages
    ///
    /// Returns the number of messages that became visible.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let (promoted, jobs, wake) = {
            let mut state = self.state.lock().await;
            let promoted = state.refresh(now);
            let jobs = state.claim_for_push(now);
            (promoted, jobs, state.arm_wake(now))
        };
        self.dispatch(jobs);
        self.schedule_wake(wake, now);
        promoted
    }

    // ------------------------------------------------------------------------
    // Push configuration
    // ------------------------------------------------------------------------

    /// Change push type and/or retries
    ///
    /// Switching to pull removes every subscriber. Messages already claimed
    /// for push delivery finish their delivery.
    pub async fn update(&self, update: QueueUpdate) -> Result<QueueInfo, QueueError> {
        if let Some(retries) = update.retries {
            if retries > self.push.max_retries {
                return Err(ValidationError::OutOfRange {
                    field: "retries".to_string(),
                    message: format!("{} exceeds maximum {}", retries, self.push.max_retries),
                }
                .into());
            }
        }

        let info = self
            .with_state(|state, _| {
                state.materialize();
                match update.push_type {
                    Some(DeliveryMode::Pull) => {
                        state.push_type = None;
                        state.subscribers.clear();
                        state.wake_at = None;
                    }
                    Some(mode) => state.push_type = mode.push_type(),
                    None => {}
                }
                if let Some(retries) = update.retries {
                    state.retries = retries;
                }
                state.info(&self.name)
            })
            .await;

        info!(
            queue = %self.name,
            push_type = ?info.push_type,
            retries = ?info.retries,
            "Updated queue"
        );
        Ok(info)
    }

    /// Add a subscriber endpoint
    ///
    /// A pull queue becomes a multicast push queue. Subscribing an endpoint
    /// that is already present changes nothing.
    pub async fn subscribe(&self, endpoint: &str) -> Result<QueueInfo, QueueError> {
        let subscriber = Subscriber::new(endpoint)?;

        let info = self
            .with_state(|state, _| {
                state.materialize();
                state.push_type.get_or_insert(PushType::Multicast);
                if !state.subscribers.contains(&subscriber) {
                    state.subscribers.push(subscriber.clone());
                }
                state.info(&self.name)
            })
            .await;

        info!(queue = %self.name, subscriber = %subscriber, "Subscribed endpoint");
        Ok(info)
    }

    /// Remove a subscriber endpoint, reporting whether it was present
    pub async fn unsubscribe(&self, endpoint: &str) -> Result<bool, QueueError> {
        let subscriber = Subscriber::new(endpoint)?;

        let removed = self
            .with_state(|state, _| {
                match state.subscribers.iter().position(|s| s == &subscriber) {
                    Some(index) => {
                        state.subscribers.remove(index);
                        true
                    }
                    None => false,
                }
            })
            .await;

        if removed {
            info!(queue = %self.name, subscriber = %subscriber, "Unsubscribed endpoint");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Push status
    // ------------------------------------------------------------------------

    /// Message with its per-subscriber delivery status
    pub async fn get_push_message(&self, id: &MessageId) -> Result<PushMessage, QueueError> {
        let state = self.state.lock().await;
        state
            .push_records
            .get(id)
            .map(PushRecord::to_push_message)
            .ok_or_else(|| QueueError::MessageNotFound {
                message_id: id.clone(),
            })
    }

    /// Acknowledge delivery of `id` to `endpoint`
    ///
    /// Idempotent: acknowledging twice succeeds both times.
    pub async fn acknowledge(&self, id: &MessageId, endpoint: &str) -> Result<bool, QueueError> {
        let subscriber = Subscriber::new(endpoint)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let record =
            state
                .push_records
                .get_mut(id)
                .ok_or_else(|| QueueError::MessageNotFound {
                    message_id: id.clone(),
                })?;
        if !record.acknowledge(&subscriber, now) {
            return Err(QueueError::SubscriberNotFound {
                message_id: id.clone(),
                endpoint: subscriber.to_string(),
            });
        }
        state.finish_push(id, now, self.push.history_limit);
        drop(state);

        debug!(queue = %self.name, message_id = %id, subscriber = %subscriber, "Acknowledged push message");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Dispatcher hooks
    // ------------------------------------------------------------------------

    pub(crate) async fn begin_push_attempt(
        &self,
        id: &MessageId,
        subscriber: &Subscriber,
    ) -> Option<u32> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state
            .push_records
            .get_mut(id)?
            .begin_attempt(subscriber, now)
    }

    pub(crate) async fn record_push_outcome(
        &self,
        id: &MessageId,
        subscriber: &Subscriber,
        outcome: &Result<DeliveryResponse, PushError>,
        retries: u32,
    ) -> Option<NextStep> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state
            .push_records
            .get_mut(id)?
            .record_outcome(subscriber, outcome, retries, now)
    }

    pub(crate) async fn expire_push_ack(
        &self,
        id: &MessageId,
        subscriber: &Subscriber,
        retries: u32,
    ) -> Option<NextStep> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state
            .push_records
            .get_mut(id)?
            .expire_ack(subscriber, retries, now)
    }

    pub(crate) async fn finish_push(&self, id: &MessageId) {
        let now = self.clock.now();
        let finished = {
            let mut state = self.state.lock().await;
            state.finish_push(id, now, self.push.history_limit)
        };
        if finished {
            info!(queue = %self.name, message_id = %id, "Push message completed");
        }
    }

    /// Run the wake-up armed for `due` and re-arm for the next pending message
    pub(crate) async fn dispatch_ready(&self, due: Timestamp) {
        self.with_state(|state, _| {
            if state.wake_at == Some(due) {
                state.wake_at = None;
            }
        })
        .await;
    }
}
