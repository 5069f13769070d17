//! # ragchat CLI
//!
//! Question answering over a local document folder.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat build [--force]` | Build the index from the documents directory |
//! | `ragchat add <files..>` | Append files to the index |
//! | `ragchat ask "<question>"` | Answer one question |
//! | `ragchat chat` | Interactive conversation with memory |
//! | `ragchat status` | Show what is indexed and whether it is stale |
//! | `ragchat serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ragchat::config::{self, Config};
use ragchat::rag::{IndexStatus, RagService};
use ragchat::{build_cmd, chat, server, stats};
use tracing_subscriber::EnvFilter;

/// ragchat: answer questions from your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "Retrieval-augmented question answering over local documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ragchat.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the documents directory.
    ///
    /// Reuses the persisted index when the documents have not changed.
    Build {
        /// Rebuild even if the index is up to date.
        #[arg(long)]
        force: bool,
    },

    /// Append files to the existing index.
    Add {
        /// Files to extract, chunk, embed and append.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Conversation session to read from and record into.
        #[arg(long, default_value = "default")]
        session: String,

        /// Ignore and do not update the session's conversation history.
        #[arg(long)]
        no_memory: bool,
    },

    /// Interactive conversation (`/clear` resets, `/exit` quits).
    Chat {
        /// Session to continue; a new one is started when omitted.
        #[arg(long)]
        session: Option<String>,
    },

    /// Show index statistics and staleness.
    Status,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() && path == Path::new("./config/ragchat.toml") {
        tracing::info!("no config file at {}, using defaults", path.display());
        let config = Config::default();
        config::validate(&config)?;
        return Ok(config);
    }
    config::load_config(path)
}

/// Create the service and make sure it has an index to serve.
async fn start(cfg: Config) -> anyhow::Result<RagService> {
    let service = RagService::from_config(cfg).context("Failed to initialize providers")?;
    match service.ensure_index(false).await.context("Index is not usable")? {
        IndexStatus::Built(report) => tracing::info!(entries = report.entries, "index built"),
        IndexStatus::Loaded { entries } => tracing::info!(entries, "index loaded"),
        IndexStatus::Stale { entries } => {
            tracing::warn!(entries, "serving a stale index; run `ragchat build --force`")
        }
    }
    Ok(service)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Status => {
            stats::run_status(&cfg)?;
        }
        Commands::Build { force } => {
            let service = RagService::from_config(cfg)?;
            build_cmd::run_build(&service, force).await?;
        }
        Commands::Add { files } => {
            let service = RagService::from_config(cfg)?;
            build_cmd::run_add(&service, &files).await?;
        }
        Commands::Ask {
            question,
            session,
            no_memory,
        } => {
            let service = start(cfg).await?;
            chat::run_ask(&service, &question, &session, !no_memory).await?;
        }
        Commands::Chat { session } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let service = start(cfg).await?;
            chat::run_chat(&service, &session).await?;
        }
        Commands::Serve => {
            let service = start(cfg).await?;
            server::run_server(Arc::new(service)).await?;
        }
    }

    Ok(())
}
