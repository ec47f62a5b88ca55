//! Message store holding message records and their lifecycle state.
//!
//! The store owns every message of a queue. Other components refer to messages
//! by [`MessageId`] and change them only through [`MessageStore::transition`],
//! which checks the current state before applying a change so that two actors
//! can never move the same message out of the same state.

use crate::error::QueueError;
use crate::message::{Message, MessageId, MessageState, Timestamp};
use bytes::Bytes;
use chrono::Duration;
use std::collections::HashMap;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// A message stored in the queue with metadata
#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    body: Bytes,
    state: MessageState,
    timeout: Duration,
    reserved_count: u32,
    enqueued_at: Timestamp,
    visible_at: Timestamp,
    reservation_expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn snapshot(&self) -> Message {
        Message {
            id: self.id.clone(),
            body: self.body.clone(),
            state: self.state,
            timeout: self.timeout,
            reserved_count: self.reserved_count,
            enqueued_at: self.enqueued_at,
            visible_at: self.visible_at,
            reservation_expires_at: self.reservation_expires_at,
        }
    }
}

/// Storage for the messages of a single queue
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: HashMap<MessageId, StoredMessage>,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new message
    ///
    /// A positive `delay` creates the message in [`MessageState::Delayed`] with
    /// `visible_at = now + delay`; otherwise it is immediately
    /// [`MessageState::Queued`].
    pub fn create(
        &mut self,
        body: Bytes,
        delay: Duration,
        timeout: Duration,
        now: Timestamp,
    ) -> Message {
        let id = MessageId::new();
        let (state, visible_at) = if delay > Duration::zero() {
            (MessageState::Delayed, now.plus(delay))
        } else {
            (MessageState::Queued, now)
        };

        let stored = StoredMessage {
            id: id.clone(),
            body,
            state,
            timeout,
            reserved_count: 0,
            enqueued_at: visible_at,
            visible_at,
            reservation_expires_at: None,
        };
        let snapshot = stored.snapshot();
        self.messages.insert(id, stored);
        snapshot
    }

    /// Look up a message by ID
    pub fn get_by_id(&self, id: &MessageId) -> Option<Message> {
        self.messages.get(id).map(StoredMessage::snapshot)
    }

    /// Current state of a message, if it exists
    pub fn state_of(&self, id: &MessageId) -> Option<MessageState> {
        self.messages.get(id).map(|m| m.state)
    }

    /// Move a message from one of `from` into `to`
    ///
    /// `new_visible_at` carries the time attached to the new state:
    /// - `Reserved`: the reservation expiry. `None` holds the message without
    ///   an expiry (used for push delivery claims).
    /// - `Queued`: the instant the message re-enters the visible order; it
    ///   becomes the new `enqueued_at`.
    /// - `Delayed`: the instant the delay elapses.
    ///
    /// Fails with [`QueueError::Conflict`] when the message is not in any of
    /// the `from` states.
    pub fn transition(
        &mut self,
        id: &MessageId,
        from: &[MessageState],
        to: MessageState,
        new_visible_at: Option<Timestamp>,
    ) -> Result<Message, QueueError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| QueueError::MessageNotFound {
                message_id: id.clone(),
            })?;

        if !from.contains(&message.state) {
            return Err(QueueError::Conflict {
                message_id: id.clone(),
                actual: message.state,
                expected: from.to_vec(),
            });
        }

        match to {
            MessageState::Reserved => {
                if message.state != MessageState::Reserved && new_visible_at.is_some() {
                    message.reserved_count += 1;
                }
                if let Some(expires_at) = new_visible_at {
                    message.visible_at = expires_at;
                }
                message.reservation_expires_at = new_visible_at;
            }
            MessageState::Queued => {
                if let Some(at) = new_visible_at {
                    message.visible_at = at;
                    message.enqueued_at = at;
                }
                message.reservation_expires_at = None;
            }
            MessageState::Delayed => {
                if let Some(at) = new_visible_at {
                    message.visible_at = at;
                    message.enqueued_at = at;
                }
                message.reservation_expires_at = None;
            }
        }
        message.state = to;

        Ok(message.snapshot())
    }

    /// Remove a message permanently
    ///
    /// Returns the state the message was in, or `None` when the message was
    /// unknown (already deleted, never existed). Deleting is idempotent.
    pub fn delete(&mut self, id: &MessageId) -> Option<MessageState> {
        self.messages.remove(id).map(|m| m.state)
    }

    /// Remove every message, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.messages.len();
        self.messages.clear();
        removed
    }
}
