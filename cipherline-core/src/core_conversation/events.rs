//! Conversation events
//!
//! User-visible notifications, fanned out over a tokio broadcast channel so a
//! UI (or the CLI) can react without polling. Every failure a controller
//! returns is also emitted here.

use tokio::sync::broadcast;

use super::view::RedactionReason;
use crate::core_identity::UserId;
use crate::core_log::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// Initial view built
    Opened { peer: UserId, entries: usize },

    MessageSent { message_id: MessageId },

    MessageReceived { message_id: MessageId },

    /// A message exists but is shown as a placeholder
    MessageRedacted {
        message_id: MessageId,
        reason: RedactionReason,
    },

    SendFailed { error: String },

    FetchFailed { error: String },

    Closed { peer: UserId },
}

impl ConversationEvent {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConversationEvent::SendFailed { .. } | ConversationEvent::FetchFailed { .. }
        )
    }
}

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventBroadcaster {
    /// `capacity` events are buffered per subscriber before the slowest lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that received the event
    pub fn emit(&self, event: ConversationEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
