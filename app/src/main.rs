#![deny(
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

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod command;

use command::{
    ChatInput, ChatStrategy, CommandStrategy, HistoryAction, HistoryInput, HistoryStrategy,
    InitStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "saintstream")]
#[command(about = "SaintStream movie assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the movie assistant
    Chat {
        /// Sign in as this user (defaults to the configured user, or guest)
        #[arg(short, long)]
        user: Option<String>,

        /// Model to use
        #[arg(short = 'M', long)]
        model: Option<String>,

        /// Keep history in memory only
        #[arg(long)]
        ephemeral: bool,

        /// Single message to send
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Inspect or clear stored conversation history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Initialize configuration
    Init,
    /// Show version
    Version,
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Print the stored conversation
    Show {
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Delete the stored conversation
    Clear {
        #[arg(short, long)]
        user: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List every stored history key
    List,
}

impl From<HistoryCommands> for HistoryInput {
    fn from(command: HistoryCommands) -> Self {
        match command {
            HistoryCommands::Show { user } => Self {
                action: HistoryAction::Show,
                user,
            },
            HistoryCommands::Clear { user, yes } => Self {
                action: HistoryAction::Clear { confirmed: yes },
                user,
            },
            HistoryCommands::List => Self {
                action: HistoryAction::List,
                user: None,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            user,
            model,
            ephemeral,
            message,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    user,
                    model,
                    ephemeral,
                    message,
                })
                .await
        }
        Commands::History { command } => HistoryStrategy.execute(command.into()).await,
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
