//! Ordered message log for a single conversation.
//!
//! The store tracks at most one pending assistant message, always the last
//! element, which receives streamed content until it is finalized.

use thiserror::Error;

use crate::{ChatMessage, Role};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no pending assistant message to update")]
    NoPendingMessage,

    #[error("cannot append while an assistant message is pending")]
    PendingInFlight,
}

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    pending: bool,
}

impl MessageStore {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
            pending: false,
        }
    }

    /// Append a finalized message.
    pub fn append(&mut self, message: ChatMessage) -> Result<(), StoreError> {
        if self.pending {
            return Err(StoreError::PendingInFlight);
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append an empty assistant message that will receive streamed content.
    pub fn append_pending(&mut self) -> Result<(), StoreError> {
        self.append(ChatMessage::assistant(String::new()))?;
        self.pending = true;
        Ok(())
    }

    /// Replace the content of the pending message.
    pub fn update_last(&mut self, content: &str) -> Result<(), StoreError> {
        let last = self.pending_message()?;
        content.clone_into(&mut last.content);
        Ok(())
    }

    /// Write the final content of the pending message and seal it.
    pub fn finalize_last(&mut self, content: &str) -> Result<(), StoreError> {
        self.update_last(content)?;
        self.pending = false;
        Ok(())
    }

    fn pending_message(&mut self) -> Result<&mut ChatMessage, StoreError> {
        if !self.pending {
            return Err(StoreError::NoPendingMessage);
        }
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => Ok(last),
            _ => Err(StoreError::NoPendingMessage),
        }
    }

    #[must_use]
    pub fn all(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages that are final, i.e. everything except a pending tail.
    #[must_use]
    pub fn settled(&self) -> &[ChatMessage] {
        if self.pending {
            &self.messages[..self.messages.len() - 1]
        } else {
            &self.messages
        }
    }

    /// Drop every message. Only used by an explicit history reset.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending = false;
    }

    /// Replace the whole log, e.g. with history restored from storage.
    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.pending = false;
    }

    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
