//! Property tests: whatever mix of history and (possibly repeated,
//! out-of-order) pushes a conversation sees, its view ends up as exactly the
//! conversation's messages, once each, ascending by (created_at, id).

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use cipherline_core::core_conversation::{ConversationController, ConversationServices};
use cipherline_core::core_crypto::{CryptoEngine, KeyPair};
use cipherline_core::core_directory::{Directory, MemoryDirectory};
use cipherline_core::core_identity::{Identity, KeyStore, MemoryKeyStorage, Timestamp, UserId};
use cipherline_core::core_log::{
    DeliveryChannel, DeliveryHub, LogError, LogResult, Message, MessageId, MessageLog,
    Subscription, SubscriptionId,
};

/// Read-only log whose history is fixed up front; pushes are injected through the hub
struct ScriptedLog {
    history: Vec<Message>,
    hub: DeliveryHub,
}

#[async_trait]
impl MessageLog for ScriptedLog {
    async fn append(&self, _: &UserId, _: &UserId, _: &str) -> LogResult<Message> {
        Err(LogError::Unavailable("scripted log is read-only".to_string()))
    }

    async fn query(&self, participant_id: &UserId) -> LogResult<Vec<Message>> {
        Ok(self
            .history
            .iter()
            .filter(|m| m.involves(participant_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedLog {
    async fn subscribe(&self, topic: &UserId) -> LogResult<Subscription> {
        Ok(self.hub.subscribe(topic))
    }

    async fn unsubscribe(&self, handle: SubscriptionId) -> bool {
        self.hub.unsubscribe(handle)
    }

    fn active_subscriptions(&self) -> usize {
        self.hub.active_subscriptions()
    }
}

/// One generated message: timestamp, whether the query returns it, how often it is pushed
#[derive(Debug, Clone)]
struct Plan {
    created_at: u64,
    in_history: bool,
    pushes: usize,
    from_carol: bool,
}

fn plan_strategy() -> impl Strategy<Value = Plan> {
    (0u64..40, any::<bool>(), 0usize..3, prop::bool::weighted(0.2)).prop_map(
        |(created_at, in_history, pushes, from_carol)| Plan {
            created_at,
            in_history,
            // Every message reaches the controller at least once
            pushes: if in_history { pushes } else { pushes.max(1) },
            from_carol,
        },
    )
}

fn shuffle<T>(items: &mut [T], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = (seed >> 33) as usize % (i + 1);
        items.swap(i, j);
    }
}

async fn run(plans: Vec<Plan>, seed: u64) -> Result<(), TestCaseError> {
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let carol = UserId::new("carol");
    let bob_key = KeyPair::generate().unwrap();
    let engine = CryptoEngine::new();

    let messages: Vec<(Message, String)> = plans
        .iter()
        .enumerate()
        .map(|(i, plan)| {
            let plaintext = format!("m{}", i);
            let sender = if plan.from_carol { &carol } else { &alice };
            let message = Message {
                id: MessageId(i as u64 + 1),
                sender_id: sender.clone(),
                receiver_id: bob.clone(),
                ciphertext: engine.seal(&plaintext, &bob_key.public).unwrap(),
                created_at: Timestamp::from_millis(plan.created_at),
            };
            (message, plaintext)
        })
        .collect();

    let mut history: Vec<Message> = plans
        .iter()
        .zip(&messages)
        .filter(|(plan, _)| plan.in_history)
        .map(|(_, (m, _))| m.clone())
        .collect();
    history.sort_by_key(|m| m.sort_key());

    let mut pushes: Vec<Message> = plans
        .iter()
        .zip(&messages)
        .flat_map(|(plan, (m, _))| std::iter::repeat(m.clone()).take(plan.pushes))
        .collect();
    shuffle(&mut pushes, seed);

    let directory = Arc::new(MemoryDirectory::new());
    directory
        .publish(Identity::new(bob.clone(), "bob@example.com", bob_key.public))
        .await
        .unwrap();
    let log = Arc::new(ScriptedLog {
        history,
        hub: DeliveryHub::new(),
    });
    let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKeyStorage::with_key_pair(
        bob_key,
    ))));
    let bob_view = ConversationController::new(
        bob.clone(),
        alice.clone(),
        ConversationServices::new(key_store, directory, log.clone()),
    );

    bob_view.open().await.unwrap();
    // Deliver in two halves so merges interleave with earlier batches
    let half = pushes.len() / 2;
    for message in &pushes[..half] {
        log.hub.publish(message);
    }
    bob_view.process_pushes().await.unwrap();
    for message in &pushes[half..] {
        log.hub.publish(message);
    }
    bob_view.process_pushes().await.unwrap();

    let mut expected: Vec<(Message, String)> = messages
        .into_iter()
        .filter(|(m, _)| m.sender_id == alice)
        .collect();
    expected.sort_by_key(|(m, _)| m.sort_key());

    let entries = bob_view.entries().await;
    prop_assert_eq!(entries.len(), expected.len());
    for (entry, (message, plaintext)) in entries.iter().zip(&expected) {
        prop_assert_eq!(entry.message_id, message.id);
        prop_assert_eq!(entry.timestamp, message.created_at);
        prop_assert_eq!(entry.content.as_plaintext(), Some(plaintext.as_str()));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn view_matches_log_for_any_delivery_order(
        plans in prop::collection::vec(plan_strategy(), 1..24),
        seed in any::<u64>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run(plans, seed))?;
    }
}
