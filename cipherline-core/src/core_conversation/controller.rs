//! ConversationController - per-conversation send/receive pipeline
//!
//! One controller per `(local user, peer)` pair. It loads the local private
//! key once at open, subscribes to the delivery channel, builds the initial
//! view from a log query and then keeps merging pushes, re-queries and its own
//! sends into the same view.
//!
//! Policies:
//! - a second `send` while one is in flight is rejected with `Busy`
//! - sends are displayed only once the log has accepted them
//! - incoming messages that fail to open become redacted placeholders
//! - pushes that arrive while a send or re-query is in flight are held back
//!   and merged as soon as the conversation is `Ready` again
//!
//! Dropping a controller without `close()` leaves its subscription registered
//! until the delivery hub notices the dropped receiver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use super::errors::{ConversationError, ConversationResult};
use super::events::{ConversationEvent, EventBroadcaster};
use super::state::ConversationState;
use super::view::{ConversationView, Direction, EntryContent, RedactionReason, ViewEntry};
use crate::config::ConversationConfig;
use crate::core_crypto::{CryptoEngine, PrivateKey};
use crate::core_directory::{Directory, DirectoryError};
use crate::core_identity::{ContactId, KeyStore, UserId};
use crate::core_log::{DeliveryChannel, Message, MessageId, MessageLog, Subscription, SubscriptionId};
use crate::metrics::{self as m, Timer};

#[derive(Debug, Clone)]
pub struct ConversationOptions {
    /// Upper bound on one log query during open or refresh
    pub query_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        ConversationOptions {
            query_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl From<&ConversationConfig> for ConversationOptions {
    fn from(config: &ConversationConfig) -> Self {
        ConversationOptions {
            query_timeout: config.query_timeout,
            event_capacity: config.event_capacity,
        }
    }
}

/// Plaintext of messages sent during this session
///
/// Outgoing ciphertext is sealed for the peer, so the sender can only show
/// its own messages from what it remembers here.
#[derive(Clone, Default)]
pub struct SentMessages {
    inner: Arc<StdMutex<HashMap<MessageId, String>>>,
}

impl SentMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, id: MessageId, plaintext: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, plaintext.to_string());
    }

    pub fn lookup(&self, id: MessageId) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Collaborators shared by every conversation of a session
#[derive(Clone)]
pub struct ConversationServices {
    pub key_store: Arc<KeyStore>,
    pub directory: Arc<dyn Directory>,
    pub log: Arc<dyn MessageLog>,
    pub channel: Arc<dyn DeliveryChannel>,
    pub engine: CryptoEngine,
    pub sent: SentMessages,
    pub options: ConversationOptions,
}

impl ConversationServices {
    /// Services over a backend that is both the log and its delivery channel
    pub fn new<B>(key_store: Arc<KeyStore>, directory: Arc<dyn Directory>, backend: Arc<B>) -> Self
    where
        B: MessageLog + DeliveryChannel + 'static,
    {
        ConversationServices {
            key_store,
            directory,
            log: backend.clone(),
            channel: backend,
            engine: CryptoEngine::new(),
            sent: SentMessages::new(),
            options: ConversationOptions::default(),
        }
    }

    pub fn with_engine(mut self, engine: CryptoEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_options(mut self, options: ConversationOptions) -> Self {
        self.options = options;
        self
    }
}

struct Inner {
    state: ConversationState,
    view: ConversationView,
    private_key: Option<PrivateKey>,
    subscription_id: Option<SubscriptionId>,
    /// Pushes received while busy, merged once `Ready` again
    deferred: Vec<Message>,
}

pub struct ConversationController {
    local: UserId,
    peer: ContactId,
    services: ConversationServices,
    inner: Mutex<Inner>,
    subscription: Mutex<Option<Subscription>>,
    close_tx: watch::Sender<bool>,
    events: EventBroadcaster,
}

impl ConversationController {
    pub fn new(local: UserId, peer: ContactId, services: ConversationServices) -> Self {
        let (close_tx, _) = watch::channel(false);
        let events = EventBroadcaster::new(services.options.event_capacity);
        ConversationController {
            inner: Mutex::new(Inner {
                state: ConversationState::Idle,
                view: ConversationView::new(local.clone(), peer.clone()),
                private_key: None,
                subscription_id: None,
                deferred: Vec::new(),
            }),
            local,
            peer,
            services,
            subscription: Mutex::new(None),
            close_tx,
            events,
        }
    }

    pub fn local(&self) -> &UserId {
        &self.local
    }

    pub fn peer(&self) -> &ContactId {
        &self.peer
    }

    pub async fn state(&self) -> ConversationState {
        self.inner.lock().await.state
    }

    /// Snapshot of the view, ascending by `(timestamp, message_id)`
    pub async fn entries(&self) -> Vec<ViewEntry> {
        self.inner.lock().await.view.entries()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.view.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Handle of the live subscription, if any
    pub async fn subscription_id(&self) -> Option<SubscriptionId> {
        self.inner.lock().await.subscription_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Subscribe, load history and enter `Ready`
    ///
    /// Only valid from `Idle`. On failure the subscription is released and the
    /// controller is back in `Idle`, so `open` can simply be retried. If the
    /// conversation is closed meanwhile, the loaded result is discarded.
    pub async fn open(&self) -> ConversationResult<()> {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ConversationState::Idle => inner.state = ConversationState::Loading,
                ConversationState::Closed => return Err(ConversationError::Closed),
                other => {
                    return Err(ConversationError::InvalidState(format!(
                        "open requires an idle conversation, this one is {}",
                        other
                    )))
                }
            }
        }

        info!(local = %self.local, peer = %self.peer, "Opening conversation");

        match self.load().await {
            Ok(entries) => {
                m::increment_gauge(m::CONVERSATIONS_OPEN, 1.0);
                self.events.emit(ConversationEvent::Opened {
                    peer: self.peer.clone(),
                    entries,
                });
                info!(peer = %self.peer, entries, "Conversation ready");
                Ok(())
            }
            Err(err) => {
                self.abort_open().await;
                if err != ConversationError::Closed {
                    m::record_counter(m::FETCH_FAILED, 1);
                    warn!(peer = %self.peer, error = %err, "Failed to open conversation");
                    self.events.emit(ConversationEvent::FetchFailed {
                        error: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    async fn load(&self) -> ConversationResult<usize> {
        let mut close_rx = self.close_tx.subscribe();

        let private_key = self.services.key_store.current_private_key().await?;

        let subscription = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closed| *closed) => return Err(ConversationError::Closed),
            result = self.services.channel.subscribe(&self.local) => result.map_err(|e| {
                ConversationError::FetchFailed(format!("subscribe failed: {}", e))
            })?,
        };
        let subscription_id = subscription.id();

        {
            let mut inner = self.inner.lock().await;
            if inner.state.is_closed() {
                drop(inner);
                self.services.channel.unsubscribe(subscription_id).await;
                return Err(ConversationError::Closed);
            }
            inner.subscription_id = Some(subscription_id);
            inner.private_key = Some(private_key.clone());
        }
        *self.subscription.lock().await = Some(subscription);
        debug!(peer = %self.peer, subscription = %subscription_id, "Subscribed, querying log");

        let messages = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closed| *closed) => return Err(ConversationError::Closed),
            result = self.query() => result?,
        };

        // Pushes that raced the query; the merge drops the overlap
        let buffered = match self.subscription.lock().await.as_mut() {
            Some(subscription) => subscription.drain(),
            None => Vec::new(),
        };

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.state.is_closed() {
            return Err(ConversationError::Closed);
        }

        let deferred = std::mem::take(&mut inner.deferred);
        let batch = messages.into_iter().chain(buffered).chain(deferred);
        self.merge_messages(inner, &private_key, batch, false);
        inner.state = ConversationState::Ready;
        Ok(inner.view.len())
    }

    async fn abort_open(&self) {
        let subscription_id = {
            let mut inner = self.inner.lock().await;
            if inner.state == ConversationState::Loading {
                inner.state = ConversationState::Idle;
            }
            inner.private_key = None;
            inner.deferred.clear();
            inner.subscription_id.take()
        };
        if let Some(id) = subscription_id {
            self.services.channel.unsubscribe(id).await;
        }
        self.subscription.lock().await.take();
    }

    async fn query(&self) -> ConversationResult<Vec<Message>> {
        let timeout = self.services.options.query_timeout;
        match tokio::time::timeout(timeout, self.services.log.query(&self.local)).await {
            Err(_) => Err(ConversationError::FetchFailed(format!(
                "query timed out after {:?}",
                timeout
            ))),
            Ok(Err(e)) => Err(ConversationError::FetchFailed(e.to_string())),
            Ok(Ok(messages)) => Ok(messages),
        }
    }

    /// Seal `plaintext` for the peer and append it to the log
    ///
    /// The returned entry is what the view now shows. Failures leave the view
    /// untouched and are never retried automatically.
    pub async fn send(&self, plaintext: &str) -> ConversationResult<ViewEntry> {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ConversationState::Ready => {}
                ConversationState::Closed => return Err(ConversationError::Closed),
                state if state.is_busy() => {
                    return Err(ConversationError::Busy(format!(
                        "cannot send while {}",
                        state
                    )))
                }
                state => {
                    return Err(ConversationError::InvalidState(format!(
                        "send requires a ready conversation, this one is {}",
                        state
                    )))
                }
            }
            if plaintext.trim().is_empty() {
                return Err(ConversationError::EmptyMessage);
            }
            inner.state = ConversationState::Sending;
        }

        let result = self.seal_and_append(plaintext).await;

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.state == ConversationState::Sending {
            inner.state = ConversationState::Ready;
        }

        match result {
            Ok(message) => {
                self.services.sent.remember(message.id, plaintext);
                m::record_counter(m::MESSAGES_SENT, 1);

                let entry = ViewEntry {
                    message_id: message.id,
                    direction: Direction::Outgoing,
                    content: EntryContent::Plaintext(plaintext.to_string()),
                    timestamp: message.created_at,
                };

                if inner.state.is_closed() {
                    debug!(message_id = %message.id, "Sent after close; view discarded");
                    return Ok(entry);
                }

                inner.view.insert(entry.clone());
                self.events.emit(ConversationEvent::MessageSent {
                    message_id: message.id,
                });
                self.flush_deferred(inner);
                Ok(entry)
            }
            Err(err) => {
                m::record_counter(m::SEND_FAILED, 1);
                warn!(peer = %self.peer, error = %err, "Send failed");
                self.events.emit(ConversationEvent::SendFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn seal_and_append(&self, plaintext: &str) -> ConversationResult<Message> {
        let public_key = self
            .services
            .directory
            .resolve_public_key(&self.peer)
            .await
            .map_err(|e| match e {
                DirectoryError::NotFound(msg) => ConversationError::NotFound(msg),
                other => ConversationError::SendFailed(format!("key lookup failed: {}", other)),
            })?;

        let timer = Timer::new(m::SEAL_DURATION_MS);
        let ciphertext = self.services.engine.seal(plaintext, &public_key)?;
        timer.stop();

        let message = self
            .services
            .log
            .append(&self.local, &self.peer, &ciphertext)
            .await
            .map_err(|e| ConversationError::SendFailed(e.to_string()))?;

        debug!(peer = %self.peer, message_id = %message.id, "Message appended");
        Ok(message)
    }

    /// Re-query the log and merge anything new
    ///
    /// On failure the view is left as it was.
    pub async fn refresh(&self) -> ConversationResult<usize> {
        let private_key = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ConversationState::Ready => {}
                ConversationState::Closed => return Err(ConversationError::Closed),
                state if state.is_busy() => {
                    return Err(ConversationError::Busy(format!(
                        "cannot refresh while {}",
                        state
                    )))
                }
                state => {
                    return Err(ConversationError::InvalidState(format!(
                        "refresh requires a ready conversation, this one is {}",
                        state
                    )))
                }
            }
            let Some(private_key) = inner.private_key.clone() else {
                return Err(ConversationError::InvalidState(
                    "no private key loaded".to_string(),
                ));
            };
            inner.state = ConversationState::Receiving;
            private_key
        };

        let mut close_rx = self.close_tx.subscribe();
        let result = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closed| *closed) => Err(ConversationError::Closed),
            result = self.query() => result,
        };

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.state.is_closed() {
            return Err(ConversationError::Closed);
        }
        inner.state = ConversationState::Ready;

        match result {
            Ok(messages) => {
                let mut added = self.merge_messages(inner, &private_key, messages, true);
                added += self.flush_deferred(inner);
                debug!(peer = %self.peer, added, "Refreshed conversation");
                Ok(added)
            }
            Err(err) => {
                m::record_counter(m::FETCH_FAILED, 1);
                warn!(peer = %self.peer, error = %err, "Refresh failed; view left stale");
                self.events.emit(ConversationEvent::FetchFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Merge every push already buffered on the subscription
    ///
    /// Returns the number of new view entries. Returns 0 without waiting if
    /// another task is inside [`next_push`](Self::next_push).
    pub async fn process_pushes(&self) -> ConversationResult<usize> {
        let pushed = {
            let Ok(mut guard) = self.subscription.try_lock() else {
                return Ok(0);
            };
            match guard.as_mut() {
                Some(subscription) => subscription.drain(),
                None => Vec::new(),
            }
        };
        Ok(self.handle_pushes(pushed).await)
    }

    /// Wait for the next push and merge it along with anything buffered behind it
    ///
    /// Returns the number of new view entries, which is 0 for duplicates and
    /// messages from other conversations. Fails with `Closed` once the
    /// conversation or its subscription is closed.
    pub async fn next_push(&self) -> ConversationResult<usize> {
        {
            let inner = self.inner.lock().await;
            if inner.state.is_closed() {
                return Err(ConversationError::Closed);
            }
            if !inner.state.is_live() {
                return Err(ConversationError::InvalidState(format!(
                    "no live subscription while {}",
                    inner.state
                )));
            }
        }

        let mut close_rx = self.close_tx.subscribe();
        let batch = {
            let mut guard = self.subscription.lock().await;
            let Some(subscription) = guard.as_mut() else {
                return Err(ConversationError::Closed);
            };
            let first = tokio::select! {
                biased;
                _ = close_rx.wait_for(|closed| *closed) => return Err(ConversationError::Closed),
                message = subscription.recv() => message,
            };
            let Some(first) = first else {
                return Err(ConversationError::Closed);
            };
            let mut batch = vec![first];
            batch.extend(subscription.drain());
            batch
        };

        Ok(self.handle_pushes(batch).await)
    }

    async fn handle_pushes(&self, messages: Vec<Message>) -> usize {
        if messages.is_empty() {
            return 0;
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.state {
            ConversationState::Closed => {
                debug!(peer = %self.peer, count = messages.len(), "Ignoring pushes after close");
                0
            }
            ConversationState::Ready => {
                let Some(private_key) = inner.private_key.clone() else {
                    return 0;
                };
                inner.state = ConversationState::Receiving;
                let mut added = self.merge_messages(inner, &private_key, messages, true);
                added += self.flush_deferred(inner);
                inner.state = ConversationState::Ready;
                added
            }
            _ => {
                inner.deferred.extend(messages);
                0
            }
        }
    }

    /// Stop delivery and discard the view
    ///
    /// Cancels an in-flight open or refresh. Closing twice is a no-op.
    pub async fn close(&self) {
        let (subscription_id, was_open) = {
            let mut inner = self.inner.lock().await;
            if inner.state.is_closed() {
                return;
            }
            let was_open = inner.state.is_live();
            inner.state = ConversationState::Closed;
            inner.private_key = None;
            inner.deferred.clear();
            (inner.subscription_id.take(), was_open)
        };

        self.close_tx.send_replace(true);

        if let Some(id) = subscription_id {
            self.services.channel.unsubscribe(id).await;
        }
        self.subscription.lock().await.take();

        if was_open {
            m::decrement_gauge(m::CONVERSATIONS_OPEN, 1.0);
        }
        self.events.emit(ConversationEvent::Closed {
            peer: self.peer.clone(),
        });
        info!(local = %self.local, peer = %self.peer, "Conversation closed");
    }

    fn flush_deferred(&self, inner: &mut Inner) -> usize {
        if inner.deferred.is_empty() {
            return 0;
        }
        let Some(private_key) = inner.private_key.clone() else {
            return 0;
        };
        let deferred = std::mem::take(&mut inner.deferred);
        self.merge_messages(inner, &private_key, deferred, true)
    }

    /// Decode and merge messages of this conversation; returns how many were new
    fn merge_messages(
        &self,
        inner: &mut Inner,
        private_key: &PrivateKey,
        messages: impl IntoIterator<Item = Message>,
        notify: bool,
    ) -> usize {
        let mut added = 0;
        for message in messages {
            if !message.is_between(&self.local, &self.peer) || inner.view.contains(message.id) {
                continue;
            }

            let entry = self.decode(&message, private_key);
            let event = match (&entry.direction, &entry.content) {
                (_, EntryContent::Redacted(reason)) => {
                    m::record_counter(m::MESSAGES_REDACTED, 1);
                    Some(ConversationEvent::MessageRedacted {
                        message_id: entry.message_id,
                        reason: *reason,
                    })
                }
                (Direction::Incoming, EntryContent::Plaintext(_)) => {
                    m::record_counter(m::MESSAGES_RECEIVED, 1);
                    notify.then_some(ConversationEvent::MessageReceived {
                        message_id: entry.message_id,
                    })
                }
                (Direction::Outgoing, EntryContent::Plaintext(_)) => None,
            };

            if inner.view.insert(entry) {
                added += 1;
                if let Some(event) = event {
                    self.events.emit(event);
                }
            }
        }
        added
    }

    fn decode(&self, message: &Message, private_key: &PrivateKey) -> ViewEntry {
        let (direction, content) = if message.sender_id == self.local {
            let content = match self.services.sent.lookup(message.id) {
                Some(plaintext) => EntryContent::Plaintext(plaintext),
                None => EntryContent::Redacted(RedactionReason::SealedForPeer),
            };
            (Direction::Outgoing, content)
        } else {
            let timer = Timer::new(m::OPEN_DURATION_MS);
            let opened = self.services.engine.open(&message.ciphertext, private_key);
            timer.stop();
            let content = match opened {
                Ok(plaintext) => EntryContent::Plaintext(plaintext),
                Err(e) => {
                    warn!(
                        peer = %self.peer,
                        message_id = %message.id,
                        error = %e,
                        "Could not open incoming message; showing placeholder"
                    );
                    EntryContent::Redacted(RedactionReason::Undecryptable)
                }
            };
            (Direction::Incoming, content)
        };

        ViewEntry {
            message_id: message.id,
            direction,
            content,
            timestamp: message.created_at,
        }
    }
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::KeyPair;
    use crate::core_directory::MemoryDirectory;
    use crate::core_identity::{Identity, MemoryKeyStorage};
    use crate::core_log::MemoryMessageLog;

    struct Pair {
        log: Arc<MemoryMessageLog>,
        alice: ConversationController,
        bob_key: KeyPair,
    }

    async fn pair() -> Pair {
        let log = Arc::new(MemoryMessageLog::new());
        let directory = Arc::new(MemoryDirectory::new());

        let alice_key = KeyPair::generate().unwrap();
        let bob_key = KeyPair::generate().unwrap();
        directory
            .publish(Identity::new(UserId::new("alice"), "alice@x.io", alice_key.public))
            .await
            .unwrap();
        directory
            .publish(Identity::new(UserId::new("bob"), "bob@x.io", bob_key.public))
            .await
            .unwrap();

        let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKeyStorage::with_key_pair(
            alice_key,
        ))));
        let services = ConversationServices::new(key_store, directory, log.clone());
        let alice = ConversationController::new(UserId::new("alice"), UserId::new("bob"), services);

        Pair {
            log,
            alice,
            bob_key,
        }
    }

    #[tokio::test]
    async fn test_open_enters_ready_once() {
        let p = pair().await;
        assert_eq!(p.alice.state().await, ConversationState::Idle);

        p.alice.open().await.unwrap();
        assert_eq!(p.alice.state().await, ConversationState::Ready);
        assert!(p.alice.subscription_id().await.is_some());

        assert!(matches!(
            p.alice.open().await,
            Err(ConversationError::InvalidState(_))
        ));
        assert_eq!(p.alice.state().await, ConversationState::Ready);
    }

    #[tokio::test]
    async fn test_send_before_open_is_invalid() {
        let p = pair().await;
        assert!(matches!(
            p.alice.send("hi").await,
            Err(ConversationError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_send_shows_plaintext_and_stores_ciphertext() {
        let p = pair().await;
        p.alice.open().await.unwrap();

        let entry = p.alice.send("hello").await.unwrap();
        assert_eq!(entry.direction, Direction::Outgoing);
        assert_eq!(entry.content.as_plaintext(), Some("hello"));

        let stored = p.log.messages().await;
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].ciphertext, "hello");
        assert_eq!(
            CryptoEngine::new()
                .open(&stored[0].ciphertext, &p.bob_key.private)
                .unwrap(),
            "hello"
        );

        // The push of our own message is a no-op
        assert_eq!(p.alice.process_pushes().await.unwrap(), 0);
        assert_eq!(p.alice.len().await, 1);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let p = pair().await;
        p.alice.open().await.unwrap();
        assert_eq!(
            p.alice.send("   ").await,
            Err(ConversationError::EmptyMessage)
        );
        assert_eq!(p.alice.state().await, ConversationState::Ready);
        assert!(p.log.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_to_idle_and_retries() {
        let p = pair().await;
        let mut events = p.alice.subscribe_events();
        p.log.fail_next_query();

        assert!(matches!(
            p.alice.open().await,
            Err(ConversationError::FetchFailed(_))
        ));
        assert_eq!(p.alice.state().await, ConversationState::Idle);
        assert_eq!(p.log.active_subscriptions(), 0);
        assert!(events.recv().await.unwrap().is_failure());

        p.alice.open().await.unwrap();
        assert_eq!(p.alice.state().await, ConversationState::Ready);
        assert_eq!(p.log.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_missing_private_key_is_not_found() {
        let log = Arc::new(MemoryMessageLog::new());
        let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKeyStorage::new())));
        let services =
            ConversationServices::new(key_store, Arc::new(MemoryDirectory::new()), log.clone());
        let controller =
            ConversationController::new(UserId::new("alice"), UserId::new("bob"), services);

        assert!(matches!(
            controller.open().await,
            Err(ConversationError::NotFound(_))
        ));
        assert_eq!(controller.state().await, ConversationState::Idle);
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_unknown_peer_key_is_not_found() {
        let log = Arc::new(MemoryMessageLog::new());
        let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKeyStorage::with_key_pair(
            KeyPair::generate().unwrap(),
        ))));
        let services =
            ConversationServices::new(key_store, Arc::new(MemoryDirectory::new()), log.clone());
        let controller =
            ConversationController::new(UserId::new("alice"), UserId::new("ghost"), services);

        controller.open().await.unwrap();
        assert!(matches!(
            controller.send("hi").await,
            Err(ConversationError::NotFound(_))
        ));
        assert_eq!(controller.state().await, ConversationState::Ready);
        assert!(controller.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_message_is_encryption_error() {
        let p = pair().await;
        p.alice.open().await.unwrap();
        let huge = "x".repeat(crate::core_crypto::MAX_PLAINTEXT_LEN + 1);
        assert!(matches!(
            p.alice.send(&huge).await,
            Err(ConversationError::Encryption(_))
        ));
        assert!(p.log.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let p = pair().await;
        p.alice.open().await.unwrap();

        p.alice.close().await;
        p.alice.close().await;

        assert_eq!(p.alice.state().await, ConversationState::Closed);
        assert_eq!(p.log.active_subscriptions(), 0);
        assert_eq!(p.alice.open().await, Err(ConversationError::Closed));
        assert_eq!(p.alice.send("x").await, Err(ConversationError::Closed));
        assert_eq!(p.alice.refresh().await, Err(ConversationError::Closed));
        assert_eq!(p.alice.next_push().await, Err(ConversationError::Closed));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_view() {
        let p = pair().await;
        p.alice.open().await.unwrap();
        p.alice.send("one").await.unwrap();

        p.log.fail_next_query();
        assert!(matches!(
            p.alice.refresh().await,
            Err(ConversationError::FetchFailed(_))
        ));
        assert_eq!(p.alice.state().await, ConversationState::Ready);
        assert_eq!(p.alice.len().await, 1);
    }

    #[tokio::test]
    async fn test_sent_messages_cache() {
        let sent = SentMessages::new();
        assert!(sent.is_empty());
        sent.remember(MessageId(3), "hi");
        assert_eq!(sent.lookup(MessageId(3)).as_deref(), Some("hi"));
        assert_eq!(sent.len(), 1);
        sent.clear();
        assert!(sent.lookup(MessageId(3)).is_none());
    }
}
