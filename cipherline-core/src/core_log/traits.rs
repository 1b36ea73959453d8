//! Message log and delivery channel traits
//!
//! Both are external collaborators from the conversation's point of view; any
//! backend that honors these contracts can sit behind them.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use super::errors::LogResult;
use super::types::Message;
use crate::core_identity::UserId;

/// Append-only store of sealed messages
///
/// Implementations must ensure:
/// - `(created_at, id)` strictly increases across all appends, from any caller
/// - a successful append is visible to later queries and is pushed to live
///   subscriptions of both participants
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a sealed message and return the stored record
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        ciphertext: &str,
    ) -> LogResult<Message>;

    /// All messages sent or received by `participant_id`, ascending by `(created_at, id)`
    async fn query(&self, participant_id: &UserId) -> LogResult<Vec<Message>>;
}

/// Handle identifying one live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a subscription
///
/// Delivery is at-least-once: the same message may arrive more than once.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: UserId,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        topic: UserId,
        receiver: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Subscription {
            id,
            topic,
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &UserId {
        &self.topic
    }

    /// Wait for the next push; `None` once the channel side unsubscribed
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Next already-buffered push, if any
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(message) = self.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Realtime push of newly appended messages
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Start receiving every message appended from now on that `topic` sends or receives
    async fn subscribe(&self, topic: &UserId) -> LogResult<Subscription>;

    /// Stop delivery; returns whether the handle was live. Repeat calls are no-ops.
    async fn unsubscribe(&self, handle: SubscriptionId) -> bool;

    /// Number of live subscriptions
    fn active_subscriptions(&self) -> usize;
}
