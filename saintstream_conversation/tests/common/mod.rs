//! Test doubles shared by the session integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use saintstream_conversation::{ConversationSession, SessionSnapshot};
use saintstream_core::{
    ChatMessage, ChatProvider, ChunkStream, GenerationOptions, KeyValueStore, MemoryKeyValueStore,
};
use tokio::sync::mpsc;

pub type ChunkSender = mpsc::UnboundedSender<anyhow::Result<String>>;

enum Script {
    Stream(mpsc::UnboundedReceiver<anyhow::Result<String>>),
    OpenError(String),
}

/// Chat provider that replays queued scripts, one per request.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    models: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a stream whose chunks are pushed by the test.
    pub fn push_stream(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Script::Stream(rx));
        tx
    }

    /// Queue a stream that delivers `chunks` and then ends.
    pub fn push_chunks(&self, chunks: &[&str]) {
        let tx = self.push_stream();
        for chunk in chunks {
            let _ = tx.send(Ok((*chunk).to_string()));
        }
    }

    pub fn push_open_error(&self, message: &str) {
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Script::OpenError(message.to_string()));
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Model requested by each call, in order.
    pub fn models(&self) -> Vec<String> {
        self.models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> anyhow::Result<ChunkStream> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(messages.to_vec());
        self.models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(options.model.clone());

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();

        match script {
            Some(Script::Stream(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Script::OpenError(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted response")),
        }
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

/// Key-value store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryKeyValueStore,
    pub fail_set: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self) {
        self.fail_set.store(true, Ordering::SeqCst);
        self.fail_delete.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("storage offline");
        }
        self.inner.delete(key).await
    }
}

/// Key-value store whose reads take `delay`.
pub struct SlowStore {
    inner: MemoryKeyValueStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryKeyValueStore::new(),
            delay,
        })
    }
}

#[async_trait]
impl KeyValueStore for SlowStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key).await
    }
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Wait until a snapshot satisfies `predicate`, failing the test on timeout.
pub async fn wait_until(
    session: &ConversationSession,
    mut predicate: impl FnMut(&SessionSnapshot) -> bool,
) {
    let mut snapshots = session.subscribe();
    let waited = tokio::time::timeout(WAIT, snapshots.wait_for(|s| predicate(s))).await;
    assert!(waited.is_ok(), "timed out waiting for session snapshot");
}

/// Wait until the last message has exactly `content`.
pub async fn wait_for_last(session: &ConversationSession, content: &str) {
    wait_until(session, |s| {
        s.messages.last().is_some_and(|m| m.content == content)
    })
    .await;
}

pub async fn settle(session: &ConversationSession) {
    assert!(
        tokio::time::timeout(WAIT, session.settled()).await.is_ok(),
        "timed out waiting for the turn to settle"
    );
}
