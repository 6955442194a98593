//! Interactive chat with the movie assistant.
//!
//! Replies are printed as they stream in. Ctrl+C stops the current reply;
//! at the prompt it ends the session.

use saintstream_config::Config;
use saintstream_conversation::{ConversationSession, HistoryKey, HistoryStats, SessionState};
use saintstream_core::{ChatMessage, IdentityHandle, IdentityProvider, Role};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

use super::{build_provider, open_store, print_messages, print_stats, resolve_identity};

const EMPTY_HINT: &str = "Ask me anything! \"Suggest an action movie like Avatar\"";
const RESTORE_TIMEOUT: Duration = Duration::from_secs(10);

type InputLines = Lines<BufReader<Stdin>>;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// User to sign in as; guest when absent and none is configured
    pub user: Option<String>,
    /// Optional model override
    pub model: Option<String>,
    /// Keep history in memory only
    pub ephemeral: bool,
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load_or_default()?;
        let provider = build_provider(&config)?;
        let store = open_store(&config, input.ephemeral).await?;

        let mut conversation_config = config.conversation_config();
        if let Some(model) = input.model {
            conversation_config = conversation_config.with_model(model);
        }

        let identity = IdentityHandle::new(resolve_identity(&config, input.user));
        let session = ConversationSession::new(provider, store, conversation_config);
        session.follow_identity(&identity).await;
        info!("Chat session ready for {}", session.key());

        let result = match input.message {
            Some(message) => run_single(&session, &message).await,
            None => run_interactive(&session, &identity).await,
        };

        session.shutdown().await;
        result
    }
}

async fn run_single(session: &ConversationSession, message: &str) -> anyhow::Result<()> {
    if !session.send(message) {
        anyhow::bail!("Message is empty");
    }
    stream_reply(session).await
}

async fn run_interactive(
    session: &ConversationSession,
    identity: &IdentityHandle,
) -> anyhow::Result<()> {
    println!("=== SaintStream movie assistant ===");
    println!("Type 'exit' or 'quit' to leave, '/help' for commands. Ctrl+C stops a reply.\n");
    print_conversation(&session.messages());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();

        if matches!(input, "exit" | "quit") {
            break;
        }
        if input.is_empty() {
            continue;
        }
        if let Some(command) = input.strip_prefix('/') {
            run_command(command, session, identity, &mut lines).await?;
            continue;
        }

        if !session.send(input) {
            println!("The assistant is busy, try again in a moment.");
            continue;
        }
        stream_reply(session).await?;
    }

    println!(
        "\nSession ended. {} messages saved for {}.",
        session.messages().len(),
        session.key()
    );
    Ok(())
}

async fn run_command(
    command: &str,
    session: &ConversationSession,
    identity: &IdentityHandle,
    lines: &mut InputLines,
) -> anyhow::Result<()> {
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, arg)| (name, arg.trim()));

    match name {
        "login" if arg.is_empty() => println!("Usage: /login <user-id>"),
        "login" => {
            identity.sign_in(arg, None);
            wait_for_restore(session, &session.key_for(&identity.current())).await;
            println!("Signed in as {arg}.");
            print_conversation(&session.messages());
        }
        "logout" => {
            identity.sign_out();
            wait_for_restore(session, &session.key_for(&identity.current())).await;
            println!("Signed out, chatting as guest.");
            print_conversation(&session.messages());
        }
        "clear" => {
            print!("Clear conversation history? [y/N] ");
            std::io::stdout().flush()?;
            let answer = lines.next_line().await?.unwrap_or_default();
            if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("History kept.");
            } else if session.clear_history().await {
                println!("History cleared.");
            } else {
                println!("Could not clear history; nothing was changed.");
            }
        }
        "history" => print_stats(&HistoryStats::from_messages(&session.messages())),
        "help" => print_help(),
        _ => println!("Unknown command: /{name}. Type /help for commands."),
    }
    Ok(())
}

/// Wait until the identity follower has restored `key`.
async fn wait_for_restore(session: &ConversationSession, key: &HistoryKey) {
    let mut snapshots = session.subscribe();
    let restored = async {
        while session.key() != *key || session.is_loading() {
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(RESTORE_TIMEOUT, restored).await.is_err() {
        println!("History is still loading.");
    }
}

/// Print the reply to the turn just sent as it streams in.
async fn stream_reply(session: &ConversationSession) -> anyhow::Result<()> {
    let mut snapshots = session.subscribe();
    let mut printer = ReplyPrinter::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    println!();
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if let Some(reply) = snapshot.messages.last().filter(|m| m.role == Role::Assistant) {
            printer.print(&reply.content)?;
        }
        if snapshot.state != SessionState::Streaming {
            break;
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                session.cancel();
            }
        }
    }
    println!("\n");
    Ok(())
}

/// What to write so the terminal shows `current` after showing `printed`.
#[derive(Debug, PartialEq, Eq)]
enum ReplyUpdate<'a> {
    Unchanged,
    Append(&'a str),
    /// The reply was replaced, e.g. by the apology after a failure.
    Replace(&'a str),
}

fn reply_update<'a>(printed: &str, current: &'a str) -> ReplyUpdate<'a> {
    match current.strip_prefix(printed) {
        Some("") => ReplyUpdate::Unchanged,
        Some(rest) => ReplyUpdate::Append(rest),
        None => ReplyUpdate::Replace(current),
    }
}

#[derive(Debug, Default)]
struct ReplyPrinter {
    printed: String,
}

impl ReplyPrinter {
    fn print(&mut self, current: &str) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        match reply_update(&self.printed, current) {
            ReplyUpdate::Unchanged => return Ok(()),
            ReplyUpdate::Append(rest) => write!(out, "{rest}")?,
            ReplyUpdate::Replace(text) => write!(out, "\n{text}")?,
        }
        out.flush()?;
        current.clone_into(&mut self.printed);
        Ok(())
    }
}

fn print_conversation(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("{EMPTY_HINT}\n");
    } else {
        print_messages(messages);
        println!();
    }
}

fn print_help() {
    println!("/login <id>  sign in and load that user's history");
    println!("/logout      continue as guest");
    println!("/clear       delete the stored conversation");
    println!("/history     show conversation statistics");
    println!("exit, quit   end the session");
}
