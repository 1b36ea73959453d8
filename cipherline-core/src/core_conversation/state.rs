//! Conversation lifecycle
//!
//! ```text
//! Idle -> Loading -> Ready <-> (Sending | Receiving)
//!   ^        |         |
//!   +--------+         +-----> Closed   (from any state)
//! ```
//!
//! A failed open falls back from `Loading` to `Idle`. `Closed` is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationState {
    /// Nothing resolved yet
    Idle,
    /// Subscription set up, initial query in flight
    Loading,
    /// Initial view built and subscribed
    Ready,
    /// A send is between resolve and append
    Sending,
    /// Merging a push or a background re-query
    Receiving,
    Closed,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Loading => "loading",
            ConversationState::Ready => "ready",
            ConversationState::Sending => "sending",
            ConversationState::Receiving => "receiving",
            ConversationState::Closed => "closed",
        }
    }

    /// States in which the conversation holds a live subscription
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConversationState::Ready | ConversationState::Sending | ConversationState::Receiving
        )
    }

    /// States in which another operation is mid-flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConversationState::Sending | ConversationState::Receiving
        )
    }

    pub fn is_closed(&self) -> bool {
        *self == ConversationState::Closed
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!ConversationState::Idle.is_live());
        assert!(!ConversationState::Loading.is_live());
        assert!(ConversationState::Ready.is_live());
        assert!(ConversationState::Sending.is_busy());
        assert!(ConversationState::Receiving.is_busy());
        assert!(!ConversationState::Ready.is_busy());
        assert!(ConversationState::Closed.is_closed());
        assert_eq!(ConversationState::Loading.to_string(), "loading");
    }
}
