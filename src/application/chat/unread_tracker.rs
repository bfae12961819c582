//! Unread Tracker
//!
//! Per-viewer, per-conversation unread counters. Each counter lives in a
//! single map entry, so increment and reset on the same key are linearizable.

use dashmap::DashMap;

use crate::domain::{ConversationId, UserId};
use crate::infrastructure::metrics;

/// Owner of every unread counter.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    counts: DashMap<(ConversationId, UserId), u32>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more message delivered while `viewer` was not joined.
    /// Returns the new count.
    pub fn increment(&self, conversation_id: ConversationId, viewer: UserId) -> u32 {
        let mut count = self.counts.entry((conversation_id, viewer)).or_insert(0);
        *count = count.saturating_add(1);
        metrics::record_unread_increment();
        *count
    }

    /// Clear the counter, returning what it was.
    pub fn reset(&self, conversation_id: ConversationId, viewer: UserId) -> u32 {
        self.counts
            .remove(&(conversation_id, viewer))
            .map(|(_, count)| count)
            .unwrap_or(0)
    }

    pub fn count(&self, conversation_id: ConversationId, viewer: UserId) -> u32 {
        self.counts
            .get(&(conversation_id, viewer))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Every non-zero counter owned by `viewer`.
    pub fn counts_for(&self, viewer: UserId) -> Vec<(ConversationId, u32)> {
        let mut counts: Vec<_> = self
            .counts
            .iter()
            .filter(|entry| entry.key().1 == viewer && *entry.value() > 0)
            .map(|entry| (entry.key().0, *entry.value()))
            .collect();
        counts.sort_by_key(|(conversation_id, _)| *conversation_id);
        counts
    }
}
