//! Single in-flight generation: state machine, chunk application, cancellation.
//!
//! A [`StreamController`] owns the running buffer of the pending assistant
//! message and a generation counter. Every stream attempt is tagged with the
//! generation it was started under; effects carrying any other generation are
//! dropped, so a cancelled or superseded attempt can never touch the store.
//!
//! The network side runs in [`drive`], which only talks to its owner through
//! a [`TurnSink`]. The sink serializes those calls with the owner's own
//! mutations, which makes chunk application atomic with respect to `cancel`.

use std::sync::Arc;

use futures::StreamExt;
use saintstream_core::{
    APOLOGY_MESSAGE, ChatMessage, ChatProvider, GenerationOptions, INTERRUPTED_MARKER,
    MessageStore, StoreError,
};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamPhase {
    #[default]
    Idle,
    Opening,
    Receiving,
    Completed,
    Cancelled,
    Failed,
}

impl StreamPhase {
    /// `Opening` or `Receiving`: a generation is in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Opening | Self::Receiving)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl StreamOutcome {
    const fn phase(self) -> StreamPhase {
        match self {
            Self::Completed => StreamPhase::Completed,
            Self::Cancelled => StreamPhase::Cancelled,
            Self::Failed => StreamPhase::Failed,
        }
    }
}

/// Permission to run one stream attempt.
#[derive(Debug)]
pub struct StreamTicket {
    pub generation: u64,
    cancel_rx: oneshot::Receiver<()>,
}

/// Payload and options for one completion request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

/// A started stream attempt.
#[derive(Debug)]
pub struct StreamHandle {
    pub generation: u64,
    pub task: JoinHandle<()>,
}

/// Receiver of stream events for one controller.
///
/// Implementations lock their state, forward to the matching
/// [`StreamController`] method and publish the result.
pub trait TurnSink: Send + Sync + 'static {
    fn on_opened(&self, generation: u64);

    /// Returns `false` when the attempt is no longer current.
    fn on_chunk(&self, generation: u64, chunk: &str) -> bool;

    fn on_completed(&self, generation: u64);

    fn on_failed(&self, generation: u64, error: &anyhow::Error);
}

#[derive(Debug, Default)]
pub struct StreamController {
    phase: StreamPhase,
    generation: u64,
    buffer: String,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl StreamController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn phase(&self) -> StreamPhase {
        self.phase
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Whether effects tagged with `generation` may still be applied.
    #[must_use]
    pub const fn is_current(&self, generation: u64) -> bool {
        self.phase.is_active() && self.generation == generation
    }

    /// Reserve the controller for a new attempt. `None` while one is in flight.
    pub fn begin(&mut self) -> Option<StreamTicket> {
        if self.phase.is_active() {
            debug!("Rejecting stream start: generation {} in flight", self.generation);
            return None;
        }

        self.generation = self.generation.wrapping_add(1);
        self.phase = StreamPhase::Opening;
        self.buffer.clear();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_tx = Some(cancel_tx);

        Some(StreamTicket {
            generation: self.generation,
            cancel_rx,
        })
    }

    /// Reserve the controller and spawn [`drive`] for `request` on `runtime`.
    pub fn start(
        &mut self,
        runtime: &Handle,
        provider: Arc<dyn ChatProvider>,
        request: TurnRequest,
        sink: Arc<dyn TurnSink>,
    ) -> Option<StreamHandle> {
        let ticket = self.begin()?;
        let generation = ticket.generation;
        let task = runtime.spawn(drive(provider, request, ticket, sink));
        Some(StreamHandle { generation, task })
    }

    pub fn mark_receiving(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.phase = StreamPhase::Receiving;
        true
    }

    /// Append `chunk` to the buffer and mirror it into the pending message.
    pub fn apply_chunk(&mut self, generation: u64, chunk: &str, store: &mut MessageStore) -> bool {
        if !self.is_current(generation) {
            debug!("Dropping chunk from stale generation {generation}");
            return false;
        }
        self.phase = StreamPhase::Receiving;
        self.buffer.push_str(chunk);
        check_store(store.update_last(&self.buffer));
        true
    }

    pub fn complete(&mut self, generation: u64, store: &mut MessageStore) -> Option<StreamOutcome> {
        if !self.is_current(generation) {
            return None;
        }
        let content = std::mem::take(&mut self.buffer);
        Some(self.finish(StreamOutcome::Completed, &content, store))
    }

    /// Replace the pending content with the apology; the exchange is kept.
    pub fn fail(&mut self, generation: u64, store: &mut MessageStore) -> Option<StreamOutcome> {
        if !self.is_current(generation) {
            return None;
        }
        self.buffer.clear();
        Some(self.finish(StreamOutcome::Failed, APOLOGY_MESSAGE, store))
    }

    /// Finalize the pending message with what has arrived plus the
    /// interruption marker, and signal the running attempt to stop.
    pub fn cancel(&mut self, store: &mut MessageStore) -> Option<StreamOutcome> {
        if !self.phase.is_active() {
            return None;
        }
        info!("Cancelling generation {}", self.generation);
        let mut content = std::mem::take(&mut self.buffer);
        content.push_str(INTERRUPTED_MARKER);
        Some(self.finish(StreamOutcome::Cancelled, &content, store))
    }

    /// Return from a terminal phase to `Idle`.
    pub fn settle(&mut self) {
        if self.phase.is_terminal() {
            self.phase = StreamPhase::Idle;
        }
    }

    fn finish(
        &mut self,
        outcome: StreamOutcome,
        content: &str,
        store: &mut MessageStore,
    ) -> StreamOutcome {
        check_store(store.finalize_last(content));
        self.phase = outcome.phase();
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        debug!("Generation {} finished: {outcome:?}", self.generation);
        outcome
    }
}

fn check_store(result: Result<(), StoreError>) {
    if let Err(e) = result {
        error!("Message store invariant violated: {e}");
        debug_assert!(false, "message store invariant violated: {e}");
    }
}

/// Run one stream attempt to its end, reporting to `sink`.
///
/// Cancellation is observed between chunks: the attempt stops at its next
/// suspension point and drops the remote stream.
pub async fn drive(
    provider: Arc<dyn ChatProvider>,
    request: TurnRequest,
    ticket: StreamTicket,
    sink: Arc<dyn TurnSink>,
) {
    let StreamTicket {
        generation,
        mut cancel_rx,
    } = ticket;

    info!(
        "Opening stream for generation {generation}: model={}, messages={}",
        request.options.model,
        request.messages.len()
    );

    let opened = tokio::select! {
        biased;
        _ = &mut cancel_rx => {
            debug!("Generation {generation} cancelled while opening");
            return;
        }
        opened = provider.stream_chat(&request.messages, &request.options) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to open stream for generation {generation}: {e}");
            sink.on_failed(generation, &e);
            return;
        }
    };
    sink.on_opened(generation);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                debug!("Generation {generation} stopped");
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if !sink.on_chunk(generation, &chunk) {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!("Stream for generation {generation} failed: {e}");
                sink.on_failed(generation, &e);
                return;
            }
            None => {
                sink.on_completed(generation);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_pending() -> MessageStore {
        let mut store = MessageStore::new();
        assert!(store.append(ChatMessage::user("Suggest a sci-fi movie")).is_ok());
        assert!(store.append_pending().is_ok());
        store
    }

    fn last_content(store: &MessageStore) -> &str {
        store.all().last().map_or("", |m| m.content.as_str())
    }

    #[test]
    fn test_begin_is_guarded() {
        let mut controller = StreamController::new();
        let first = controller.begin();
        assert!(first.is_some());
        assert_eq!(controller.phase(), StreamPhase::Opening);
        assert!(controller.begin().is_none());
        assert_eq!(controller.generation(), 1);
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut store = store_with_pending();
        let mut controller = StreamController::new();
        let generation = controller.begin().map_or(0, |t| t.generation);

        for chunk in ["Sure, ", "try ", "**Dune**."] {
            assert!(controller.apply_chunk(generation, chunk, &mut store));
        }
        assert_eq!(controller.phase(), StreamPhase::Receiving);
        assert_eq!(last_content(&store), "Sure, try **Dune**.");

        assert_eq!(
            controller.complete(generation, &mut store),
            Some(StreamOutcome::Completed)
        );
        assert_eq!(controller.phase(), StreamPhase::Completed);
        assert!(!store.has_pending());
        assert_eq!(last_content(&store), "Sure, try **Dune**.");
    }

    #[test]
    fn test_cancel_appends_marker() {
        let mut store = store_with_pending();
        let mut controller = StreamController::new();
        let generation = controller.begin().map_or(0, |t| t.generation);

        assert!(controller.apply_chunk(generation, "Here are", &mut store));
        assert!(controller.apply_chunk(generation, " some", &mut store));
        assert_eq!(controller.cancel(&mut store), Some(StreamOutcome::Cancelled));

        assert_eq!(controller.phase(), StreamPhase::Cancelled);
        assert_eq!(last_content(&store), format!("Here are some{INTERRUPTED_MARKER}"));

        // Late effects of the cancelled attempt are ignored.
        assert!(!controller.apply_chunk(generation, " late", &mut store));
        assert_eq!(controller.complete(generation, &mut store), None);
        assert_eq!(controller.phase(), StreamPhase::Cancelled);
    }

    #[test]
    fn test_cancel_before_any_chunk() {
        let mut store = store_with_pending();
        let mut controller = StreamController::new();
        assert!(controller.begin().is_some());

        assert_eq!(controller.cancel(&mut store), Some(StreamOutcome::Cancelled));
        assert_eq!(last_content(&store), INTERRUPTED_MARKER);
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let mut store = MessageStore::new();
        let mut controller = StreamController::new();
        assert_eq!(controller.cancel(&mut store), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_fail_replaces_content_with_apology() {
        let mut store = store_with_pending();
        let mut controller = StreamController::new();
        let generation = controller.begin().map_or(0, |t| t.generation);

        assert!(controller.apply_chunk(generation, "half", &mut store));
        assert_eq!(controller.fail(generation, &mut store), Some(StreamOutcome::Failed));
        assert_eq!(last_content(&store), APOLOGY_MESSAGE);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_stale_generation_is_rejected_after_restart() {
        let mut store = store_with_pending();
        let mut controller = StreamController::new();
        let old = controller.begin().map_or(0, |t| t.generation);
        assert!(controller.cancel(&mut store).is_some());
        controller.settle();
        assert_eq!(controller.phase(), StreamPhase::Idle);

        assert!(store.append(ChatMessage::user("again")).is_ok());
        assert!(store.append_pending().is_ok());
        let new = controller.begin().map_or(0, |t| t.generation);
        assert_ne!(old, new);

        assert!(!controller.apply_chunk(old, "stale", &mut store));
        assert!(controller.apply_chunk(new, "fresh", &mut store));
        assert_eq!(last_content(&store), "fresh");
    }
}
