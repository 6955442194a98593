//! Conversation session facade for the assistant UI.
//!
//! Composes the message store, context windower, stream controller and
//! history persistence. All state lives behind one mutex that is never held
//! across an await, so every mutation between two suspension points is
//! atomic with respect to the presentation layer.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use saintstream_core::{
    ChatMessage, ChatProvider, GenerationOptions, Identity, IdentityProvider, KeyValueStore,
    MessageStore,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::history::{ContextWindower, HistoryConfig};
use crate::persistence::{DEFAULT_KEY_PREFIX, HistoryKey, HistoryPersistence, PersistenceWriter};
use crate::stream::{StreamController, StreamHandle, StreamOutcome, TurnRequest, TurnSink};

/// Configuration for a conversation session.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// History window applied to every request
    pub history: HistoryConfig,
    /// Model and sampling options
    pub generation: GenerationOptions,
    /// Namespace for persisted history keys
    pub key_prefix: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            generation: GenerationOptions::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl ConversationConfig {
    /// Set the model name.
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.generation.model = model;
        self
    }

    /// Set the history limit.
    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history.max_messages = limit;
        self
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: String) -> Self {
        self.key_prefix = prefix;
        self
    }
}

/// Session state exposed to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Streaming,
    /// The last turn failed. Cleared by the next send, restore or clear.
    Error,
}

/// Everything needed to render the conversation.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub messages: Vec<ChatMessage>,
    /// Whether the last message is still receiving chunks
    pub pending: bool,
    pub last_outcome: Option<StreamOutcome>,
}

struct Inner {
    store: MessageStore,
    controller: StreamController,
    state: SessionState,
    key: HistoryKey,
    last_outcome: Option<StreamOutcome>,
    active: Option<StreamHandle>,
    follower: Option<JoinHandle<()>>,
    /// Set while history is being restored or deleted
    busy: bool,
    /// Bumped by every restore/clear; only the latest may apply its result
    epoch: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    provider: Arc<dyn ChatProvider>,
    persistence: HistoryPersistence,
    writer: PersistenceWriter,
    windower: ContextWindower,
    config: ConversationConfig,
    snapshots: watch::Sender<SessionSnapshot>,
    runtime: Handle,
}

/// One assistant conversation bound to the current identity.
///
/// Dropping the session cancels any in-flight stream and stops following
/// identity changes.
pub struct ConversationSession {
    shared: Arc<Shared>,
}

impl ConversationSession {
    /// Create an empty session keyed for a guest.
    ///
    /// A blank model name falls back to the provider's default model.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn KeyValueStore>,
        mut config: ConversationConfig,
    ) -> Self {
        if config.generation.model.trim().is_empty() {
            config.generation.model = provider.default_model().to_string();
        }
        let runtime = Handle::current();
        let persistence = HistoryPersistence::new(store);
        let writer = PersistenceWriter::spawn(persistence.clone(), &runtime);
        let key = HistoryKey::for_identity(&config.key_prefix, &Identity::guest());
        let (snapshots, _) = watch::channel(SessionSnapshot::default());

        info!(
            "Creating conversation session: model={}, history_limit={}",
            config.generation.model, config.history.max_messages
        );

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    store: MessageStore::new(),
                    controller: StreamController::new(),
                    state: SessionState::Idle,
                    key,
                    last_outcome: None,
                    active: None,
                    follower: None,
                    busy: false,
                    epoch: 0,
                }),
                provider,
                persistence,
                writer,
                windower: ContextWindower::new(config.history),
                config,
                snapshots,
                runtime,
            }),
        }
    }

    /// Create a session and populate it from the history of `identity`.
    pub async fn open(
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn KeyValueStore>,
        config: ConversationConfig,
        identity: &Identity,
    ) -> Self {
        let session = Self::new(provider, store, config);
        session.switch_identity(identity).await;
        session
    }

    /// Start a new turn. Returns `false` (and does nothing) for blank text or
    /// while a turn is streaming or history is loading.
    pub fn send(&self, text: &str) -> bool {
        self.shared.send(text)
    }

    /// Stop the in-flight turn. Returns `false` when idle.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Replace the conversation with the history stored under `key`.
    pub async fn restore(&self, key: HistoryKey) {
        self.shared.restore(key).await;
    }

    /// Re-derive the history key from `identity` and restore it.
    pub async fn switch_identity(&self, identity: &Identity) {
        self.restore(self.key_for(identity)).await;
    }

    /// Restore the current identity of `provider` now and again after every
    /// identity change, until the session is dropped or shut down.
    ///
    /// Following a new provider stops following the previous one.
    pub async fn follow_identity(&self, provider: &dyn IdentityProvider) {
        let mut changes = provider.subscribe();
        let current = changes.borrow_and_update().clone();
        self.switch_identity(&current).await;

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let follower = self.shared.runtime.spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let key = HistoryKey::for_identity(&shared.config.key_prefix, &identity);
                shared.restore(key).await;
            }
            debug!("Identity follower stopped");
        });

        if let Some(previous) = self.shared.lock().follower.replace(follower) {
            previous.abort();
        }
    }

    /// Queue a save of the current conversation.
    pub fn persist(&self) {
        let inner = self.shared.lock();
        self.shared.persist_locked(&inner);
    }

    /// Delete the stored history, then empty the conversation.
    ///
    /// If the delete fails the conversation is left untouched and `false` is
    /// returned, so the UI never shows an empty history that storage still has.
    pub async fn clear_history(&self) -> bool {
        self.shared.clear_history().await
    }

    #[must_use]
    pub fn key_for(&self, identity: &Identity) -> HistoryKey {
        HistoryKey::for_identity(&self.shared.config.key_prefix, identity)
    }

    #[must_use]
    pub fn key(&self) -> HistoryKey {
        self.shared.lock().key.clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().store.all().to_vec()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Whether history is being restored or cleared.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.shared.lock().busy
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<StreamOutcome> {
        self.shared.lock().last_outcome
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Wait until no turn is streaming.
    pub async fn settled(&self) {
        let mut snapshots = self.subscribe();
        let _ = snapshots
            .wait_for(|s| s.state != SessionState::Streaming)
            .await;
    }

    /// Wait until every queued history write has been attempted.
    pub async fn flush(&self) {
        self.shared.writer.flush().await;
    }

    /// Unmount: cancel any in-flight turn and wait for its history write.
    pub async fn shutdown(self) {
        self.shared.close();
        self.flush().await;
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic elsewhere; the state itself is
        // consistent between statements.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(SessionSnapshot {
            state: inner.state,
            messages: inner.store.all().to_vec(),
            pending: inner.store.has_pending(),
            last_outcome: inner.last_outcome,
        });
    }

    fn persist_locked(&self, inner: &Inner) {
        if inner.busy {
            debug!("Skipping save of {} while history is loading", inner.key);
            return;
        }
        self.writer.save(
            inner.key.clone(),
            inner.store.settled().to_vec(),
            inner.controller.generation(),
        );
    }

    fn send(self: &Arc<Self>, text: &str) -> bool {
        if text.trim().is_empty() {
            debug!("Ignoring blank message");
            return false;
        }

        let mut inner = self.lock();
        if inner.busy || inner.controller.is_active() {
            debug!("Ignoring message while busy");
            return false;
        }

        let request = TurnRequest {
            messages: self.windower.build(inner.store.all(), text),
            options: self.config.generation.clone(),
        };

        if inner.store.append(ChatMessage::user(text)).is_err()
            || inner.store.append_pending().is_err()
        {
            warn!("Message store refused a new turn");
            return false;
        }

        let sink: Arc<dyn TurnSink> = self.clone();
        let Some(handle) =
            inner
                .controller
                .start(&self.runtime, self.provider.clone(), request, sink)
        else {
            return false;
        };

        info!("Started turn, generation {}", handle.generation);
        inner.active = Some(handle);
        inner.state = SessionState::Streaming;
        self.publish(&inner);
        true
    }

    fn cancel(&self) -> bool {
        let mut inner = self.lock();
        self.cancel_locked(&mut inner)
    }

    fn cancel_locked(&self, inner: &mut Inner) -> bool {
        match inner.controller.cancel(&mut inner.store) {
            Some(outcome) => {
                // Drops the remote stream without waiting for the next chunk.
                if let Some(active) = inner.active.take() {
                    active.task.abort();
                }
                self.finish_turn(inner, outcome);
                true
            }
            None => false,
        }
    }

    /// Stop following identity changes and cancel the in-flight turn.
    fn close(&self) {
        let mut inner = self.lock();
        if let Some(follower) = inner.follower.take() {
            follower.abort();
        }
        self.cancel_locked(&mut inner);
    }

    /// Record a terminal outcome: persist, settle, publish.
    fn finish_turn(&self, inner: &mut Inner, outcome: StreamOutcome) {
        inner.last_outcome = Some(outcome);
        inner.active = None;
        self.persist_locked(inner);

        inner.controller.settle();
        inner.state = match outcome {
            StreamOutcome::Failed => SessionState::Error,
            StreamOutcome::Completed | StreamOutcome::Cancelled => SessionState::Idle,
        };
        self.publish(inner);
        info!("Turn finished: {outcome:?}");
    }

    /// Mark the session busy for a history operation. Returns its epoch.
    fn begin_history_op(&self, inner: &mut Inner) -> u64 {
        self.cancel_locked(inner);
        inner.busy = true;
        inner.state = SessionState::Idle;
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.epoch
    }

    async fn restore(&self, key: HistoryKey) {
        let epoch = {
            let mut inner = self.lock();
            let epoch = self.begin_history_op(&mut inner);
            info!("Restoring history: {} -> {key}", inner.key);
            epoch
        };

        // Queued saves must land before the read.
        self.writer.flush().await;
        let messages = self.persistence.load(&key).await.unwrap_or_default();

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("Discarding superseded restore of {key}");
            return;
        }
        // The key moves only together with the messages loaded for it.
        inner.key = key;
        inner.store.replace(messages);
        inner.busy = false;
        self.publish(&inner);
    }

    async fn clear_history(&self) -> bool {
        let (epoch, key) = {
            let mut inner = self.lock();
            let epoch = self.begin_history_op(&mut inner);
            (epoch, inner.key.clone())
        };

        let deleted = self.writer.delete(key).await;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            return deleted;
        }
        if deleted {
            inner.store.clear();
        }
        inner.busy = false;
        self.publish(&inner);
        deleted
    }
}

impl TurnSink for Shared {
    fn on_opened(&self, generation: u64) {
        self.lock().controller.mark_receiving(generation);
    }

    fn on_chunk(&self, generation: u64, chunk: &str) -> bool {
        let mut inner = self.lock();
        let Inner {
            store, controller, ..
        } = &mut *inner;
        if !controller.apply_chunk(generation, chunk, store) {
            return false;
        }
        self.publish(&inner);
        true
    }

    fn on_completed(&self, generation: u64) {
        let mut inner = self.lock();
        let Inner {
            store, controller, ..
        } = &mut *inner;
        if let Some(outcome) = controller.complete(generation, store) {
            self.finish_turn(&mut inner, outcome);
        }
    }

    fn on_failed(&self, generation: u64, error: &anyhow::Error) {
        let mut inner = self.lock();
        let Inner {
            store, controller, ..
        } = &mut *inner;
        if let Some(outcome) = controller.fail(generation, store) {
            warn!("Turn failed, showing apology: {error}");
            self.finish_turn(&mut inner, outcome);
        }
    }
}
