//! Loading and saving conversation history through a key-value collaborator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use saintstream_core::{ChatMessage, Identity, KeyValueStore};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Namespace used for assistant history keys.
pub const DEFAULT_KEY_PREFIX: &str = "moviebot";

const GUEST_SUFFIX: &str = "guest";

/// Storage key for one identity's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey(String);

impl HistoryKey {
    /// `{prefix}_{userId}` for signed-in users, `{prefix}_guest` otherwise.
    #[must_use]
    pub fn for_identity(prefix: &str, identity: &Identity) -> Self {
        let suffix = identity
            .user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(GUEST_SUFFIX);
        Self(format!("{prefix}_{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("key-value store error: {0}")]
    Store(anyhow::Error),
}

/// Serializes message history to and from the key-value store.
#[derive(Clone)]
pub struct HistoryPersistence {
    store: Arc<dyn KeyValueStore>,
}

impl HistoryPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load history for `key`.
    ///
    /// Returns `None` when nothing is stored, when the store fails, or when
    /// the stored payload is not a message list.
    pub async fn load(&self, key: &HistoryKey) -> Option<Vec<ChatMessage>> {
        let raw = match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No stored history for {key}");
                return None;
            }
            Err(e) => {
                warn!("Failed to load history for {key}: {e}");
                return None;
            }
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&raw) {
            Ok(messages) => {
                info!("Loaded {} messages for {key}", messages.len());
                Some(messages)
            }
            Err(e) => {
                warn!("Discarding malformed history for {key}: {e}");
                None
            }
        }
    }

    pub async fn save(
        &self,
        key: &HistoryKey,
        messages: &[ChatMessage],
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(messages)?;
        self.store
            .set(key.as_str(), &payload)
            .await
            .map_err(PersistenceError::Store)?;
        debug!("Saved {} messages for {key}", messages.len());
        Ok(())
    }

    pub async fn delete(&self, key: &HistoryKey) -> Result<(), PersistenceError> {
        self.store
            .delete(key.as_str())
            .await
            .map_err(PersistenceError::Store)?;
        info!("Deleted history for {key}");
        Ok(())
    }
}

enum WriteJob {
    Save {
        key: HistoryKey,
        messages: Vec<ChatMessage>,
        generation: u64,
    },
    Delete {
        key: HistoryKey,
        done: oneshot::Sender<bool>,
    },
    Flush(oneshot::Sender<()>),
}

/// Serialized, fire-and-forget access to [`HistoryPersistence`].
///
/// All writes of one session go through a single queue, so they land in the
/// order they were issued. A save tagged with an older generation than one
/// already written for the same key is skipped.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl PersistenceWriter {
    pub fn spawn(persistence: HistoryPersistence, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_writer(persistence, rx));
        Self { tx }
    }

    /// Queue a save; failures are logged by the writer.
    pub fn save(&self, key: HistoryKey, messages: Vec<ChatMessage>, generation: u64) {
        if self
            .tx
            .send(WriteJob::Save {
                key,
                messages,
                generation,
            })
            .is_err()
        {
            warn!("History writer is gone, dropping save");
        }
    }

    /// Queue a delete and wait for its result.
    pub async fn delete(&self, key: HistoryKey) -> bool {
        let (done, rx) = oneshot::channel();
        if self.tx.send(WriteJob::Delete { key, done }).is_err() {
            warn!("History writer is gone, dropping delete");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Wait until every write queued so far has been attempted.
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_writer(persistence: HistoryPersistence, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    let mut latest: HashMap<HistoryKey, u64> = HashMap::new();

    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Save {
                key,
                messages,
                generation,
            } => {
                if latest.get(&key).is_some_and(|&written| written > generation) {
                    debug!("Skipping stale save for {key} (generation {generation})");
                    continue;
                }
                match persistence.save(&key, &messages).await {
                    Ok(()) => {
                        latest.insert(key, generation);
                    }
                    Err(e) => warn!("Failed to save history for {key}: {e}"),
                }
            }
            WriteJob::Delete { key, done } => {
                let deleted = match persistence.delete(&key).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to delete history for {key}: {e}");
                        false
                    }
                };
                let _ = done.send(deleted);
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("History writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use saintstream_core::MemoryKeyValueStore;

    fn persistence() -> (Arc<MemoryKeyValueStore>, HistoryPersistence) {
        let store = Arc::new(MemoryKeyValueStore::new());
        (store.clone(), HistoryPersistence::new(store))
    }

    #[test]
    fn test_history_key_policy() {
        let guest = HistoryKey::for_identity("moviebot", &Identity::guest());
        let user = HistoryKey::for_identity("moviebot", &Identity::signed_in("u-7", None));
        let blank = HistoryKey::for_identity("moviebot", &Identity::signed_in("  ", None));

        assert_eq!(guest.as_str(), "moviebot_guest");
        assert_eq!(user.as_str(), "moviebot_u-7");
        assert_eq!(blank, guest);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (_, persistence) = persistence();
        let key = HistoryKey::for_identity(DEFAULT_KEY_PREFIX, &Identity::guest());
        let messages = vec![
            ChatMessage::user("Suggest a sci-fi movie"),
            ChatMessage::assistant("Sure, try **Dune**."),
        ];

        assert!(persistence.save(&key, &messages).await.is_ok());
        assert_eq!(persistence.load(&key).await, Some(messages));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let (_, persistence) = persistence();
        let key = HistoryKey::for_identity(DEFAULT_KEY_PREFIX, &Identity::guest());
        assert!(persistence.load(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_is_none() {
        let (store, persistence) = persistence();
        let key = HistoryKey::for_identity(DEFAULT_KEY_PREFIX, &Identity::guest());

        for payload in [
            "not json",
            "{\"role\":\"user\"}",
            "[{\"role\":\"robot\",\"content\":\"x\"}]",
        ] {
            assert!(store.set(key.as_str(), payload).await.is_ok());
            assert!(persistence.load(&key).await.is_none(), "payload {payload:?}");
        }
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let (store, persistence) = persistence();
        let key = HistoryKey::for_identity(DEFAULT_KEY_PREFIX, &Identity::signed_in("u-1", None));

        assert!(persistence.save(&key, &[ChatMessage::user("hi")]).await.is_ok());
        assert!(persistence.delete(&key).await.is_ok());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_writer_skips_stale_generation() {
        let (_, persistence) = persistence();
        let writer = PersistenceWriter::spawn(persistence.clone(), &Handle::current());
        let key = HistoryKey::for_identity(DEFAULT_KEY_PREFIX, &Identity::guest());

        writer.save(key.clone(), vec![ChatMessage::user("newer")], 2);
        writer.save(key.clone(), vec![ChatMessage::user("older")], 1);
        writer.flush().await;

        assert_eq!(
            persistence.load(&key).await,
            Some(vec![ChatMessage::user("newer")])
        );
    }

    #[tokio::test]
    async fn test_writer_applies_in_order() {
        let (store, persistence) = persistence();
        let writer = PersistenceWriter::spawn(persistence.clone(), &Handle::current());
        let key = HistoryKey::for_identity(DEFAULT_KEY_PREFIX, &Identity::guest());

        writer.save(key.clone(), vec![ChatMessage::user("first")], 1);
        assert!(writer.delete(key.clone()).await);
        assert!(store.keys().is_empty());

        writer.save(key.clone(), vec![ChatMessage::user("second")], 1);
        writer.flush().await;
        assert_eq!(
            persistence.load(&key).await,
            Some(vec![ChatMessage::user("second")])
        );
    }
}
