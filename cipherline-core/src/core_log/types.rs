/*
    types.rs - Log records

    Defines:
    - MessageId, assigned by the log
    - Message, the immutable sealed record
    - LogClock, which hands out strictly increasing (created_at, id) pairs
*/

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_identity::{Timestamp, UserId};

/// Log-assigned message id, monotonic per log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn next(self) -> Self {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sealed message as stored by the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Base64 envelope; opaque to the log
    pub ciphertext: String,
    pub created_at: Timestamp,
}

impl Message {
    /// Ordering key shared by the log and every conversation view
    pub fn sort_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }

    /// Whether `user` is the sender or the receiver
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }

    /// Whether the message was exchanged between `a` and `b`, in either direction
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }
}

/// Assigns `(created_at, id)` pairs that strictly increase across appends
///
/// If the wall clock stalls or steps backwards, `created_at` advances by one
/// millisecond past the previous record instead.
#[derive(Debug, Clone, Default)]
pub struct LogClock {
    last: Option<(Timestamp, MessageId)>,
}

impl LogClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now: Timestamp) -> (Timestamp, MessageId) {
        let stamp = match self.last {
            None => (now, MessageId(1)),
            Some((last_ts, last_id)) => {
                let created_at = if now > last_ts {
                    now
                } else {
                    Timestamp::from_millis(last_ts.as_millis() + 1)
                };
                (created_at, last_id.next())
            }
        };
        self.last = Some(stamp);
        stamp
    }

    /// Account for a record that was assigned elsewhere (e.g. replayed from disk)
    pub fn observe(&mut self, message: &Message) {
        let key = message.sort_key();
        let last = match self.last {
            Some((ts, id)) => (ts.max(key.0), id.max(key.1)),
            None => key,
        };
        self.last = Some(last);
    }

    pub fn last(&self) -> Option<(Timestamp, MessageId)> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64, from: &str, to: &str, ts: u64) -> Message {
        Message {
            id: MessageId(id),
            sender_id: UserId::new(from),
            receiver_id: UserId::new(to),
            ciphertext: "c".to_string(),
            created_at: Timestamp::from_millis(ts),
        }
    }

    #[test]
    fn test_clock_strictly_increasing_with_stalled_clock() {
        let mut clock = LogClock::new();
        let now = Timestamp::from_millis(1_000);

        let a = clock.next(now);
        let b = clock.next(now);
        let c = clock.next(Timestamp::from_millis(500));

        assert_eq!(a, (Timestamp::from_millis(1_000), MessageId(1)));
        assert_eq!(b, (Timestamp::from_millis(1_001), MessageId(2)));
        assert_eq!(c, (Timestamp::from_millis(1_002), MessageId(3)));
    }

    #[test]
    fn test_clock_follows_wall_clock_when_it_advances() {
        let mut clock = LogClock::new();
        clock.next(Timestamp::from_millis(10));
        let next = clock.next(Timestamp::from_millis(50));
        assert_eq!(next.0, Timestamp::from_millis(50));
    }

    #[test]
    fn test_clock_observe_replayed() {
        let mut clock = LogClock::new();
        clock.observe(&message(7, "a", "b", 2_000));
        let next = clock.next(Timestamp::from_millis(100));
        assert_eq!(next, (Timestamp::from_millis(2_001), MessageId(8)));
    }

    #[test]
    fn test_participants() {
        let m = message(1, "alice", "bob", 1);
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let carol = UserId::new("carol");

        assert!(m.involves(&alice));
        assert!(m.involves(&bob));
        assert!(!m.involves(&carol));
        assert!(m.is_between(&alice, &bob));
        assert!(m.is_between(&bob, &alice));
        assert!(!m.is_between(&alice, &carol));
    }

    #[test]
    fn test_sort_key_breaks_ties_by_id() {
        let a = message(1, "a", "b", 5);
        let b = message(2, "a", "b", 5);
        assert!(a.sort_key() < b.sort_key());
    }
}
