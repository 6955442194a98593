//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type, dispatched
//! statically from `main`.

use saintstream_config::Config;
use saintstream_conversation::HistoryStats;
use saintstream_core::{
    ChatMessage, ChatProvider, Identity, KeyValueStore, MemoryKeyValueStore, Role,
};
use saintstream_providers::CompletionsProvider;
use saintstream_storage::SqliteKeyValueStore;
use std::sync::Arc;
use tracing::info;

mod chat;
mod history;
mod init;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use history::{HistoryAction, HistoryInput, HistoryStrategy};
pub use init::InitStrategy;
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Open the SQLite history store, or an in-memory one when `ephemeral`.
async fn open_store(config: &Config, ephemeral: bool) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    if ephemeral {
        info!("Using in-memory history store");
        return Ok(Arc::new(MemoryKeyValueStore::new()));
    }

    let db_path = config.database_path()?;
    info!("Database path: {}", db_path.display());
    Ok(Arc::new(SqliteKeyValueStore::new(&db_path).await?))
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn ChatProvider>> {
    let api_key = config.provider.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured. Run 'saintstream init' and set provider.api_key in the config file"
        )
    })?;

    let mut provider = CompletionsProvider::new(api_key.to_string())
        .with_base_url(config.provider.base_url.clone());
    if !config.assistant.model.trim().is_empty() {
        provider = provider.with_default_model(config.assistant.model.clone());
    }
    if let Some(timeout) = config.provider.timeout() {
        provider = provider.with_timeout(timeout);
    }

    info!("Using model {}", provider.default_model());
    Ok(Arc::new(provider))
}

/// `--user` wins over the configured default user.
fn resolve_identity(config: &Config, user: Option<String>) -> Identity {
    match user.filter(|id| !id.trim().is_empty()) {
        Some(id) => Identity::signed_in(id, None),
        None => config.user.identity(),
    }
}

fn print_messages(messages: &[ChatMessage]) {
    for message in messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => continue,
        };
        println!("{speaker}> {}", message.content);
    }
}

fn print_stats(stats: &HistoryStats) {
    println!("Messages: {}", stats.total_messages);
    println!("  from you: {}", stats.user_messages);
    println!("  from assistant: {}", stats.assistant_messages);
    println!(
        "Characters: {} (~{} tokens)",
        stats.total_characters, stats.estimated_tokens
    );
}
