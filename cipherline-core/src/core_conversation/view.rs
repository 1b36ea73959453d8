//! ConversationView - the ordered, de-duplicated message list
//!
//! Entries are keyed by `(timestamp, message_id)`. Merging is idempotent by
//! message id and commutative: whatever order query results and pushes
//! arrive in, the view ends up identical and sorted ascending.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::core_identity::{Timestamp, UserId};
use crate::core_log::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Why an entry could not be shown as plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionReason {
    /// Incoming message that failed to open with the local key
    Undecryptable,
    /// Outgoing message from an earlier session; sealed for the peer only
    SealedForPeer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryContent {
    Plaintext(String),
    Redacted(RedactionReason),
}

impl EntryContent {
    pub fn as_plaintext(&self) -> Option<&str> {
        match self {
            EntryContent::Plaintext(text) => Some(text),
            EntryContent::Redacted(_) => None,
        }
    }

    pub fn is_redacted(&self) -> bool {
        matches!(self, EntryContent::Redacted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    pub message_id: MessageId,
    pub direction: Direction,
    pub content: EntryContent,
    pub timestamp: Timestamp,
}

impl ViewEntry {
    pub fn key(&self) -> (Timestamp, MessageId) {
        (self.timestamp, self.message_id)
    }
}

#[derive(Debug, Clone)]
pub struct ConversationView {
    local: UserId,
    peer: UserId,
    entries: BTreeMap<(Timestamp, MessageId), ViewEntry>,
    ids: HashSet<MessageId>,
}

impl ConversationView {
    pub fn new(local: UserId, peer: UserId) -> Self {
        ConversationView {
            local,
            peer,
            entries: BTreeMap::new(),
            ids: HashSet::new(),
        }
    }

    pub fn local(&self) -> &UserId {
        &self.local
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    /// Insert an entry unless its id is already present; returns whether it was new
    pub fn insert(&mut self, entry: ViewEntry) -> bool {
        if !self.ids.insert(entry.message_id) {
            return false;
        }
        self.entries.insert(entry.key(), entry);
        true
    }

    /// Merge a batch; returns how many entries were new
    pub fn merge(&mut self, entries: impl IntoIterator<Item = ViewEntry>) -> usize {
        entries
            .into_iter()
            .filter(|entry| self.insert(entry.clone()))
            .count()
    }

    pub fn get(&self, id: MessageId) -> Option<&ViewEntry> {
        if !self.contains(id) {
            return None;
        }
        self.entries.values().find(|entry| entry.message_id == id)
    }

    /// Entries in ascending `(timestamp, message_id)` order
    pub fn iter(&self) -> impl Iterator<Item = &ViewEntry> {
        self.entries.values()
    }

    pub fn entries(&self) -> Vec<ViewEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn last(&self) -> Option<&ViewEntry> {
        self.entries.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn redacted_count(&self) -> usize {
        self.iter().filter(|e| e.content.is_redacted()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(id: u64, ts: u64) -> ViewEntry {
        ViewEntry {
            message_id: MessageId(id),
            direction: Direction::Incoming,
            content: EntryContent::Plaintext(format!("m{}", id)),
            timestamp: Timestamp::from_millis(ts),
        }
    }

    fn view() -> ConversationView {
        ConversationView::new(UserId::new("alice"), UserId::new("bob"))
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut view = view();
        assert!(view.insert(entry(1, 10)));
        assert!(!view.insert(entry(1, 10)));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_ordering_with_ties() {
        let mut view = view();
        view.merge(vec![entry(3, 20), entry(2, 10), entry(1, 10)]);
        let ids: Vec<u64> = view.iter().map(|e| e.message_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(view.last().unwrap().message_id, MessageId(3));
    }

    #[test]
    fn test_later_merge_does_not_reorder_existing() {
        let mut view = view();
        view.merge(vec![entry(1, 10), entry(3, 30)]);
        let before: Vec<_> = view.entries();

        view.merge(vec![entry(2, 20), entry(4, 40)]);
        let after: Vec<_> = view.entries();

        let kept: Vec<_> = after
            .iter()
            .filter(|e| before.iter().any(|b| b.message_id == e.message_id))
            .cloned()
            .collect();
        assert_eq!(kept, before);
    }

    #[test]
    fn test_redacted_count_and_lookup() {
        let mut view = view();
        view.insert(entry(1, 1));
        view.insert(ViewEntry {
            message_id: MessageId(2),
            direction: Direction::Incoming,
            content: EntryContent::Redacted(RedactionReason::Undecryptable),
            timestamp: Timestamp::from_millis(2),
        });
        assert_eq!(view.redacted_count(), 1);
        assert_eq!(view.get(MessageId(1)).unwrap().content.as_plaintext(), Some("m1"));
        assert!(view.get(MessageId(9)).is_none());
    }

    proptest! {
        #[test]
        fn prop_merge_order_independent(
            keys in proptest::collection::btree_set((0u64..1_000, 0u64..1_000), 0..40),
            seed in any::<u64>(),
        ) {
            // Distinct ids; timestamps may collide
            let entries: Vec<ViewEntry> = keys
                .iter()
                .enumerate()
                .map(|(i, (ts, _))| entry(i as u64 + 1, *ts))
                .collect();

            let mut shuffled = entries.clone();
            let len = shuffled.len();
            if len > 1 {
                for i in 0..len {
                    let j = (seed.wrapping_mul(i as u64 + 7) % len as u64) as usize;
                    shuffled.swap(i, j);
                }
            }

            let mut forward = view();
            forward.merge(entries.clone());

            let mut scrambled = view();
            // Feed every entry twice, split across two "sources"
            let (first, second) = shuffled.split_at(len / 2);
            scrambled.merge(second.to_vec());
            scrambled.merge(entries.iter().rev().cloned());
            scrambled.merge(first.to_vec());

            prop_assert_eq!(forward.entries(), scrambled.entries());
            prop_assert_eq!(forward.len(), entries.len());

            let view_keys: Vec<_> = forward.iter().map(|e| e.key()).collect();
            prop_assert!(view_keys.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
