//! In-memory message log
//!
//! Shared by every client in a process (tests, the CLI demo). Carries fault
//! injection hooks so callers can exercise failure paths:
//! - fail the next append or query
//! - mark the log unavailable until cleared
//! - delay appends or queries
//! - deliver every push twice

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::delivery::DeliveryHub;
use super::errors::{LogError, LogResult};
use super::traits::{DeliveryChannel, MessageLog, Subscription, SubscriptionId};
use super::types::{LogClock, Message};
use crate::core_identity::{Timestamp, UserId};

#[derive(Default)]
struct LogState {
    messages: Vec<Message>,
    clock: LogClock,
}

#[derive(Default)]
struct Faults {
    fail_next_append: AtomicBool,
    fail_next_query: AtomicBool,
    unavailable: AtomicBool,
    append_delay_ms: AtomicU64,
    query_delay_ms: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MemoryMessageLog {
    state: Arc<RwLock<LogState>>,
    hub: DeliveryHub,
    faults: Arc<Faults>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `append` fail with `Unavailable`
    pub fn fail_next_append(&self) {
        self.faults.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Make the next `query` fail with `Unavailable`
    pub fn fail_next_query(&self) {
        self.faults.fail_next_query.store(true, Ordering::SeqCst);
    }

    /// Fail every append and query until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold each append for `delay` before storing it
    pub fn set_append_delay(&self, delay: Duration) {
        self.faults
            .append_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Hold each query for `delay` before answering
    pub fn set_query_delay(&self, delay: Duration) {
        self.faults
            .query_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.hub.set_duplicate_delivery(enabled);
    }

    pub fn hub(&self) -> &DeliveryHub {
        &self.hub
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored message in log order
    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    fn check_fault(&self, one_shot: &AtomicBool, op: &str) -> LogResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) || one_shot.swap(false, Ordering::SeqCst)
        {
            return Err(LogError::Unavailable(format!("{} rejected: log offline", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        ciphertext: &str,
    ) -> LogResult<Message> {
        let delay = self.faults.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_fault(&self.faults.fail_next_append, "append")?;

        let mut state = self.state.write().await;
        let (created_at, id) = state.clock.next(Timestamp::now());
        let message = Message {
            id,
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            ciphertext: ciphertext.to_string(),
            created_at,
        };
        state.messages.push(message.clone());

        // Published under the lock so pushes follow append order
        let delivered = self.hub.publish(&message);
        drop(state);
        debug!(message_id = %message.id, delivered, "Appended message");
        Ok(message)
    }

    async fn query(&self, participant_id: &UserId) -> LogResult<Vec<Message>> {
        let delay = self.faults.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_fault(&self.faults.fail_next_query, "query")?;

        // Appends are stored in key order, so filtering preserves it
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.involves(participant_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryChannel for MemoryMessageLog {
    async fn subscribe(&self, topic: &UserId) -> LogResult<Subscription> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("subscribe rejected: log offline".to_string()));
        }
        Ok(self.hub.subscribe(topic))
    }

    async fn unsubscribe(&self, handle: SubscriptionId) -> bool {
        self.hub.unsubscribe(handle)
    }

    fn active_subscriptions(&self) -> usize {
        self.hub.active_subscriptions()
    }
}
