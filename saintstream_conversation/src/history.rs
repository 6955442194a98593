//! Context windowing for outbound completion requests.
//!
//! Only the most recent messages of a conversation are sent to the model;
//! older ones stay in the store and in persisted history.

use saintstream_core::{ChatMessage, Role, SYSTEM_PROMPT};

/// Default number of prior messages sent with each request.
pub const DEFAULT_HISTORY_LIMIT: usize = 12;

/// Configuration for conversation history windowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum number of prior messages to include in a request
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub const fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }
}

/// Builds the bounded request payload: persona prompt, recent history, new turn.
#[derive(Debug, Clone, Copy)]
pub struct ContextWindower {
    config: HistoryConfig,
}

impl ContextWindower {
    #[must_use]
    pub const fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    /// Build the outbound message list for a new user turn.
    ///
    /// `history` must be the conversation *before* this turn. System messages
    /// found in it are skipped so the payload carries exactly one.
    #[must_use]
    pub fn build(&self, history: &[ChatMessage], new_user_text: &str) -> Vec<ChatMessage> {
        let prior: Vec<&ChatMessage> = history.iter().filter(|m| m.role != Role::System).collect();
        let start = prior.len().saturating_sub(self.config.max_messages);

        let mut messages = Vec::with_capacity(prior.len() - start + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(prior[start..].iter().map(|m| (*m).clone()));
        messages.push(ChatMessage::user(new_user_text));
        messages
    }

    #[must_use]
    pub const fn config(&self) -> &HistoryConfig {
        &self.config
    }
}

impl Default for ContextWindower {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

/// Statistics about conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_characters: usize,
    pub estimated_tokens: usize,
}

impl HistoryStats {
    #[must_use]
    pub fn from_messages(history: &[ChatMessage]) -> Self {
        let total_chars: usize = history.iter().map(|m| m.content.len()).sum();
        Self {
            total_messages: history.len(),
            user_messages: history.iter().filter(|m| m.role == Role::User).count(),
            assistant_messages: history.iter().filter(|m| m.role == Role::Assistant).count(),
            total_characters: total_chars,
            estimated_tokens: total_chars / 4, // Rough estimate: 4 chars per token
        }
    }
}
