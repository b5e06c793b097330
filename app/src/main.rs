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
use turnstile_config::Config;

mod command;
mod dialog;
mod relay;
mod store;

use command::{
    ChatInput, ChatStrategy, CommandStrategy, InfoStrategy, InitStrategy, SessionsAction,
    SessionsStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Serialized, replay-safe conversation turns", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat through the turn gate with the echo dialog
    Chat {
        /// Conversation key to use (a new one is generated if omitted)
        #[arg(short, long)]
        conversation: Option<String>,

        /// User id for user-scoped state
        #[arg(short, long)]
        user: Option<String>,

        /// Single message to send
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Inspect or clear stored conversation state
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Show configuration
    Info,
    /// Initialize configuration
    Init,
    /// Show version
    Version,
}

fn init_logging() -> anyhow::Result<()> {
    // A broken config file must not prevent `init` or `version` from running.
    let level = Config::load_or_default()
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            conversation,
            user,
            message,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    conversation,
                    user,
                    message,
                })
                .await?;
        }
        Commands::Sessions { action } => SessionsStrategy.execute(action).await?,
        Commands::Info => InfoStrategy.execute(()).await?,
        Commands::Init => InitStrategy.execute(()).await?,
        Commands::Version => VersionStrategy.execute(()).await?,
    }

    Ok(())
}
