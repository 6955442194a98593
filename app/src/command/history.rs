//! Inspect and clear persisted conversations without starting a chat.

use saintstream_config::Config;
use saintstream_conversation::{HistoryKey, HistoryPersistence, HistoryStats};
use saintstream_storage::SqliteKeyValueStore;
use std::io::Write;
use std::sync::Arc;

use super::{print_messages, print_stats, resolve_identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Show,
    Clear { confirmed: bool },
    List,
}

#[derive(Debug, Clone)]
pub struct HistoryInput {
    pub action: HistoryAction,
    /// User whose history to act on; guest when absent and none is configured
    pub user: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryStrategy;

impl super::CommandStrategy for HistoryStrategy {
    type Input = HistoryInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load_or_default()?;
        let store = Arc::new(SqliteKeyValueStore::new(&config.database_path()?).await?);
        let persistence = HistoryPersistence::new(store.clone());
        let key = HistoryKey::for_identity(
            &config.assistant.key_prefix,
            &resolve_identity(&config, input.user),
        );

        match input.action {
            HistoryAction::Show => match persistence.load(&key).await {
                Some(messages) if !messages.is_empty() => {
                    println!("=== {key} ===\n");
                    print_messages(&messages);
                    println!();
                    print_stats(&HistoryStats::from_messages(&messages));
                }
                _ => println!("No stored history for {key}."),
            },
            HistoryAction::Clear { confirmed } => {
                if !confirmed && !confirm(&format!("Delete stored history for {key}? [y/N] "))? {
                    println!("History kept.");
                    return Ok(());
                }
                persistence.delete(&key).await?;
                println!("Cleared history for {key}.");
            }
            HistoryAction::List => {
                let prefix = format!("{}_", config.assistant.key_prefix);
                let keys: Vec<String> = store
                    .keys()
                    .await?
                    .into_iter()
                    .filter(|k| k.starts_with(&prefix))
                    .collect();

                if keys.is_empty() {
                    println!("No stored conversations.");
                }
                for key in keys {
                    println!("{key}");
                }
            }
        }

        Ok(())
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
