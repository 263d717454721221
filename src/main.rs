//! # chat-rag CLI
//!
//! ## Usage
//!
//! ```bash
//! chat-rag --config ./config/chat-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chat-rag init` | Create the database, run migrations, create the collection |
//! | `chat-rag serve` | Start the HTTP server (`/ingest`, `/query`, `/health`) |
//! | `chat-rag ingest <file>` | Ingest a `{"documents": [...]}` JSON file |
//! | `chat-rag query "<text>"` | Print the nearest stored messages |
//! | `chat-rag stats` | Show collection settings and record count |
//! | `chat-rag reset` | Delete every record in the collection |
//! | `chat-rag burndown` | Render the active milestone's burndown chart |
//!
//! The config file is optional; without it, built-in defaults are used.

use chat_rag::{burndown, collection::Collection, config, ingest, logging, query, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// chat-rag: chat-history ingestion and similarity query service.
#[derive(Parser)]
#[command(
    name = "chat-rag",
    about = "chat-rag: chat-history ingestion and similarity query service",
    version,
    long_about = "chat-rag embeds chat messages into a persistent vector collection and \
    serves nearest-neighbour queries over HTTP so chat clients can retrieve relevant \
    past conversation as context."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chat-rag.toml`. When the file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/chat-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and collection.
    ///
    /// Idempotent. Fails if the collection exists with a different
    /// embedding model or dimensionality.
    Init,

    /// Start the HTTP server.
    Serve {
        /// Override `[server].bind` (e.g. `127.0.0.1:8000`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ingest documents from a JSON file.
    ///
    /// The file has the same shape as a `POST /ingest` body:
    /// `{"documents": [{"id", "text", "metadata"}, ...]}`.
    Ingest {
        file: PathBuf,
    },

    /// Query the collection for similar messages.
    Query {
        /// Query text.
        text: String,

        /// Number of results.
        #[arg(short = 'n', long)]
        n_results: Option<usize>,

        /// Print the `POST /query` response body instead of a listing.
        #[arg(long)]
        json: bool,
    },

    /// Show collection settings and record count.
    Stats,

    /// Delete every record in the collection.
    Reset,

    /// Generate a burndown chart for the active GitHub milestone.
    ///
    /// Uses `GITHUB_TOKEN` when set.
    Burndown {
        /// Repository as `owner/repo`. Overrides `[burndown].repository`
        /// and `GITHUB_REPOSITORY`.
        #[arg(long)]
        repo: Option<String>,

        /// Directory for the generated SVG files.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config_or_default(&cli.config)?;
    logging::init(&cfg.logging);
    if !cli.config.exists() {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Init => {
            let collection = Collection::from_config(&cfg).await?;
            println!("Database initialized successfully.");
            println!(
                "  collection {} ({} metric, {} / {} dims)",
                collection.name(),
                collection.metric(),
                collection.info().model,
                collection.info().dims
            );
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            let collection = Collection::from_config(&cfg).await?;
            server::run_server(&cfg, Arc::new(collection)).await?;
        }
        Commands::Ingest { file } => {
            let collection = Collection::from_config(&cfg).await?;
            ingest::run_ingest(&collection, &file).await?;
        }
        Commands::Query {
            text,
            n_results,
            json,
        } => {
            let n = n_results.unwrap_or(cfg.server.default_n_results);
            if n == 0 {
                anyhow::bail!("--n-results must be at least 1");
            }
            let collection = Collection::from_config(&cfg).await?;
            query::run_query(&collection, &text, n, json).await?;
        }
        Commands::Stats => {
            let collection = Collection::from_config(&cfg).await?;
            let info = collection.info();
            println!("Database: {}", cfg.db.path.display());
            println!("Collection: {}", info.name);
            println!("  metric:  {}", info.metric);
            println!("  model:   {}", info.model);
            println!("  dims:    {}", info.dims);
            println!("  records: {}", collection.count().await?);
        }
        Commands::Reset => {
            let collection = Collection::from_config(&cfg).await?;
            let deleted = collection.reset().await?;
            println!(
                "Deleted {} records from collection {}",
                deleted,
                collection.name()
            );
        }
        Commands::Burndown { repo, output_dir } => {
            burndown::run_burndown(&cfg.burndown, repo, output_dir).await?;
        }
    }

    Ok(())
}
