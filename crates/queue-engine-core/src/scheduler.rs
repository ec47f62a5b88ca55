//! Visibility scheduling for delayed and reserved messages.
//!
//! The scheduler keeps two time-ordered indices:
//!
//! - **pending**: messages that are not yet eligible, keyed by the instant
//!   they become due (delay expiry or reservation expiry)
//! - **visible**: eligible messages in delivery order, keyed by `enqueued_at`
//!
//! No timers run here. Callers pass the current time to
//! [`VisibilityScheduler::take_due`] before every read and move the returned
//! messages into the visible order themselves, so eligibility is always a pure
//! function of stored timestamps and the clock.
//!
//! Both indices break ties on equal timestamps with a monotonic sequence number
//! assigned on insertion, which keeps ordering deterministic when several
//! messages share an instant.

use crate::message::{MessageId, Timestamp};
use std::collections::{BTreeSet, HashMap};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

type Key = (Timestamp, u64);

/// Time-ordered eligibility index for a single queue
#[derive(Debug, Default)]
pub struct VisibilityScheduler {
    pending: BTreeSet<(Timestamp, u64, MessageId)>,
    pending_keys: HashMap<MessageId, Key>,
    visible: BTreeSet<(Timestamp, u64, MessageId)>,
    visible_keys: HashMap<MessageId, Key>,
    next_sequence: u64,
}

impl VisibilityScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    fn next_key(&mut self, at: Timestamp) -> Key {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        (at, sequence)
    }

    /// Register `id` to become due at `due_at`
    ///
    /// Any previous entry for the message, pending or visible, is replaced.
    pub fn schedule(&mut self, id: MessageId, due_at: Timestamp) {
        self.cancel(&id);
        let key = self.next_key(due_at);
        self.pending.insert((key.0, key.1, id.clone()));
        self.pending_keys.insert(id, key);
    }

    /// Append `id` to the visible order at `enqueued_at`
    pub fn enqueue(&mut self, id: MessageId, enqueued_at: Timestamp) {
        self.cancel(&id);
        let key = self.next_key(enqueued_at);
        self.visible.insert((key.0, key.1, id.clone()));
        self.visible_keys.insert(id, key);
    }

    /// Remove `id` from both indices, returning whether it was tracked
    pub fn cancel(&mut self, id: &MessageId) -> bool {
        let mut removed = false;
        if let Some((at, seq)) = self.pending_keys.remove(id) {
            self.pending.remove(&(at, seq, id.clone()));
            removed = true;
        }
        if let Some((at, seq)) = self.visible_keys.remove(id) {
            self.visible.remove(&(at, seq, id.clone()));
            removed = true;
        }
        removed
    }

    /// Remove and return every pending entry due at or before `now`
    ///
    /// Entries come back ordered by due time, then by scheduling order.
    pub fn take_due(&mut self, now: &Timestamp) -> Vec<(MessageId, Timestamp)> {
        let mut due = Vec::new();
        while let Some((at, _, _)) = self.pending.first() {
            if at > now {
                break;
            }
            if let Some((at, _, id)) = self.pending.pop_first() {
                self.pending_keys.remove(&id);
                due.push((id, at));
            }
        }
        due
    }

    /// Remove and return the head of the visible order
    pub fn pop_visible(&mut self) -> Option<MessageId> {
        let (_, _, id) = self.visible.pop_first()?;
        self.visible_keys.remove(&id);
        Some(id)
    }

    /// Iterate the visible order from head to tail without modifying it
    pub fn visible(&self) -> impl Iterator<Item = &MessageId> {
        self.visible.iter().map(|(_, _, id)| id)
    }

    /// Earliest pending due time
    pub fn next_due(&self) -> Option<Timestamp> {
        self.pending.first().map(|(at, _, _)| *at)
    }

    /// Number of messages in the visible order
    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_keys.clear();
        self.visible.clear();
        self.visible_keys.clear();
    }
}
