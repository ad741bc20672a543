//! # Knowledge Desk CLI (`kdesk`)
//!
//! ## Usage
//!
//! ```bash
//! kdesk --config ./config/kdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kdesk init` | Create the SQLite database and run schema migrations |
//! | `kdesk serve` | Start the HTTP server |
//! | `kdesk query "<text>"` | Answer a query with the configured resolver |
//! | `kdesk ingest <bucket> <path>` | Ingest one uploaded object |
//! | `kdesk requests list` | List pending query requests |
//! | `kdesk requests complete <id> --results <json>` | Answer a pending request |
//! | `kdesk requests fail <id> [--message <text>]` | Fail a pending request |
//!
//! The `requests` commands act as the indexing service side of the query
//! queue and are mostly useful for local development.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use knowledge_desk::config::{self, BrokerConfig};
use knowledge_desk::context::AppContext;
use knowledge_desk::ingest::{IngestOutcome, UploadEvent};
use knowledge_desk::logging;
use knowledge_desk::migrate;
use knowledge_desk::models::Match;
use knowledge_desk::server::{self, SearchResponse};
use knowledge_desk::store::sqlite::SqliteQueryQueue;

/// Knowledge Desk: document ingestion and query brokering for a company
/// knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kdesk.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "kdesk", version, about = "Knowledge base ingestion and query broker")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Answer a query once and print the result as JSON.
    Query {
        /// Query text.
        text: String,
    },

    /// Ingest a single uploaded object, as if an upload event arrived.
    Ingest {
        /// Bucket name (a directory under `[storage].root` for the
        /// filesystem backend).
        bucket: String,
        /// Object path within the bucket.
        path: String,
    },

    /// Inspect and answer query requests (indexing service side).
    Requests {
        #[command(subcommand)]
        action: RequestsAction,
    },
}

#[derive(Subcommand)]
enum RequestsAction {
    /// List requests still waiting for an answer.
    List,

    /// Mark a pending request complete.
    Complete {
        id: String,
        /// JSON array of matches:
        /// `[{"sourceDocumentPath": "...", "textSnippet": "...", "distanceScore": 0.1}]`.
        #[arg(long, default_value = "[]")]
        results: String,
    },

    /// Mark a pending request failed.
    Fail {
        id: String,
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let ctx = AppContext::init(&cfg).await?;
            server::run_server(ctx).await?;
        }
        Commands::Query { text } => {
            let ctx = AppContext::init(&cfg).await?;
            let outcome = ctx.resolver.resolve(&text).await?;
            let response = SearchResponse::from_outcome(outcome, ctx.resolver.score_convention());
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Ingest { bucket, path } => {
            let ctx = AppContext::init(&cfg).await?;
            match ctx.ingestion.handle(&UploadEvent::new(bucket, path)).await {
                IngestOutcome::Stored { entry_id, kind } => {
                    println!("Stored {} as knowledge entry {}", kind.as_str(), entry_id);
                }
                IngestOutcome::Skipped(reason) => println!("Skipped: {:?}", reason),
                IngestOutcome::Failed(message) => anyhow::bail!("ingest failed: {}", message),
            }
        }
        Commands::Requests { action } => {
            let ctx = AppContext::init(&cfg).await?;
            // Without `[broker]` there is no queue in the context, but the
            // table still exists and can be inspected.
            let queue = ctx.queue.clone().unwrap_or_else(|| {
                Arc::new(SqliteQueryQueue::new(
                    ctx.pool.clone(),
                    BrokerConfig::default().poll_interval(),
                ))
            });
            run_requests(&queue, action).await?;
        }
    }

    Ok(())
}

async fn run_requests(queue: &SqliteQueryQueue, action: RequestsAction) -> anyhow::Result<()> {
    match action {
        RequestsAction::List => {
            let pending = queue.list_pending().await?;
            if pending.is_empty() {
                println!("No pending requests.");
            }
            for req in pending {
                println!(
                    "{}  {}  {}",
                    req.id,
                    req.submitted_at.format("%Y-%m-%d %H:%M:%S"),
                    req.query_text
                );
            }
        }
        RequestsAction::Complete { id, results } => {
            let matches: Vec<Match> =
                serde_json::from_str(&results).context("--results must be a JSON array of matches")?;
            if queue.complete(&id, &matches).await? {
                println!("Request {} completed with {} result(s).", id, matches.len());
            } else {
                anyhow::bail!("request {} is not pending", id);
            }
        }
        RequestsAction::Fail { id, message } => {
            if queue.fail(&id, message.as_deref()).await? {
                println!("Request {} marked as failed.", id);
            } else {
                anyhow::bail!("request {} is not pending", id);
            }
        }
    }
    Ok(())
}
