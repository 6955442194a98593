#![warn(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Streaming conversation sessions for the SaintStream movie assistant.
//!
//! # Key Features
//! - One in-flight generation per session, cancellable between chunks
//! - Incremental rendering through a snapshot channel
//! - Bounded request context (system prompt + last N messages + new turn)
//! - Best-effort, serialized history persistence keyed by identity

mod history;
mod persistence;
mod session;
mod stream;

pub use history::{ContextWindower, DEFAULT_HISTORY_LIMIT, HistoryConfig, HistoryStats};
pub use persistence::{
    DEFAULT_KEY_PREFIX, HistoryKey, HistoryPersistence, PersistenceError, PersistenceWriter,
};
pub use session::{ConversationConfig, ConversationSession, SessionSnapshot, SessionState};
pub use stream::{
    StreamController, StreamHandle, StreamOutcome, StreamPhase, StreamTicket, TurnRequest,
    TurnSink, drive,
};
