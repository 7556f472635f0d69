use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use srs_core::LearnerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vocab_coach::cli::{self, CardCommands};
use vocab_coach::config::Config;
use vocab_coach::scheduler::{NotificationIntent, NotificationScheduler};
use vocab_coach::storage::{ReviewStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "vocab-coach", version, about = "Spaced-repetition vocabulary coach")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "~/.config/vocab-coach/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the notification scheduler until interrupted
    Run,
    /// Manage vocabulary cards
    #[command(subcommand)]
    Card(CardCommands),
    /// Review due cards interactively
    Review {
        /// Learner id
        #[arg(short, long)]
        learner: LearnerId,
    },
    /// Erase all data for a learner
    Erase {
        #[arg(short, long)]
        learner: LearnerId,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let config = Config::load_from_file(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store: Arc<dyn ReviewStore> = Arc::new(
        SqliteStore::open(&config.database_path())
            .with_context(|| format!("Failed to open database: {}", config.database.path))?,
    );

    match args.command {
        Commands::Run => run_scheduler(store, &config).await,
        Commands::Card(cmd) => cli::handle_card(cmd, store).await,
        Commands::Review { learner } => cli::handle_review(store, &config, learner).await,
        Commands::Erase { learner, yes } => cli::handle_erase(store, learner, yes).await,
    }
}

/// Run the background scheduler and print each intent as it would be handed
/// to the delivery layer. Ctrl-C shuts down cleanly.
async fn run_scheduler(store: Arc<dyn ReviewStore>, config: &Config) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotificationIntent>(64);
    let scheduler = NotificationScheduler::new(store, config, tx);

    let cancel = CancellationToken::new();
    let loop_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            intent = rx.recv() => {
                match intent {
                    Some(intent) => {
                        // Delivery transport is out of scope here; intents are
                        // surfaced for whatever consumes the process output.
                        println!("{}", serde_json::to_string(&intent)?);
                    }
                    None => break,
                }
            }
        }
    }

    cancel.cancel();
    loop_handle.await.context("scheduler task panicked")?;
    Ok(())
}
