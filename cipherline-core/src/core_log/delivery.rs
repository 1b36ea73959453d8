//! Delivery hub
//!
//! Subscription registry shared by the log backends. Each append is fanned
//! out to every live subscription whose topic is the sender or the receiver.
//! Subscriptions whose receiver was dropped are pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::traits::{Subscription, SubscriptionId};
use super::types::Message;
use crate::core_identity::UserId;

struct Subscriber {
    topic: UserId,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Clone, Default)]
pub struct DeliveryHub {
    subscribers: Arc<Mutex<HashMap<SubscriptionId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
    duplicate_delivery: Arc<AtomicBool>,
}

impl DeliveryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
        // The map stays consistent even if a holder panicked
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, topic: &UserId) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(
            id,
            Subscriber {
                topic: topic.clone(),
                tx,
            },
        );
        debug!(subscription = %id, topic = %topic, "Subscribed");
        Subscription::new(id, topic.clone(), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Push `message` to every interested subscription
    ///
    /// Returns the number of deliveries made.
    pub fn publish(&self, message: &Message) -> usize {
        let copies = if self.duplicate_delivery.load(Ordering::Relaxed) {
            2
        } else {
            1
        };

        let mut subscribers = self.lock();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, sub) in subscribers.iter() {
            if !message.involves(&sub.topic) {
                continue;
            }
            for _ in 0..copies {
                if sub.tx.send(message.clone()).is_err() {
                    dead.push(*id);
                    break;
                }
                delivered += 1;
            }
        }

        for id in dead {
            subscribers.remove(&id);
            trace!(subscription = %id, "Pruned subscription with dropped receiver");
        }

        delivered
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().len()
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Deliver every message twice, to exercise at-least-once consumers
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::Relaxed);
    }
}
