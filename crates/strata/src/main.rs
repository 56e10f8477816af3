//! # Strata CLI (`strata`)
//!
//! ```bash
//! strata --config ./config/strata.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `strata init` | Create the SQLite database and run schema migrations |
//! | `strata sources` | List connectors and indexed sources |
//! | `strata sync <connector>` | Ingest documents from a connector |
//! | `strata remove <source>` | Delete a source from every store |
//! | `strata search "<query>"` | Adaptive hybrid search |
//! | `strata kag "<query>"` | Entity and relation search |
//! | `strata embed pending\|entities` | Backfill chunk or entity vectors |
//! | `strata extract run\|status\|retry` | Entity/relation extraction |
//! | `strata serve mcp` | Start the HTTP and MCP server |
//!
//! `search` exits with 0 on success, 2 when some strategy degraded, 3 when
//! nothing was found after every fallback, and 1 on any error.
//!
//! Logging goes to stderr and is controlled by `STRATA_LOG` (or
//! `RUST_LOG`); the default level is `warn`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use strata::config::{self, Config};
use strata::{db, embed_cmd, extraction, ingest, migrate, search_cmd, server, sources};
use strata_core::kag::KagRequest;
use strata_core::search::{SearchMode, SearchRequest};

/// Strata: adaptive hybrid retrieval and knowledge-graph search.
#[derive(Parser)]
#[command(name = "strata", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/strata.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations.
    Init,

    /// List connectors and indexed sources.
    Sources,

    /// Ingest documents from a connector.
    Sync {
        /// Connector name (`filesystem`).
        connector: String,

        /// Scan and count without writing.
        #[arg(long)]
        dry_run: bool,

        /// Ingest at most this many items.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a source: vectors and graph first, then its rows.
    Remove {
        source: String,
    },

    /// Search indexed documents.
    Search {
        query: String,

        /// auto, hybrid, semantic or fts.
        #[arg(long, default_value = "auto")]
        mode: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Drop hits whose normalised score is below this.
        #[arg(long)]
        min_score: Option<f64>,

        /// Override the semantic weight; lexical becomes 1 - w.
        #[arg(long)]
        semantic_weight: Option<f64>,

        #[arg(long)]
        mmr_lambda: Option<f64>,

        /// Disable MMR diversification.
        #[arg(long)]
        no_mmr: bool,

        /// Disable reranking.
        #[arg(long)]
        no_rerank: bool,

        /// Restrict to one source.
        #[arg(long)]
        source: Option<String>,

        /// Show per-hit scoring detail.
        #[arg(long)]
        explain: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search entities and the relations around them.
    Kag {
        query: String,

        /// An entity name known to be relevant. Repeatable.
        #[arg(long = "entity")]
        entities: Vec<String>,

        #[arg(long)]
        hops: Option<usize>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Backfill embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Entity and relation extraction.
    Extract {
        #[command(subcommand)]
        action: ExtractAction,
    },

    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that have no vector.
    Pending {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Embed entities that have no vector.
    Entities {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ExtractAction {
    /// Process pending chunks with the worker pool.
    Run {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the extraction backlog.
    Status,
    /// Send failed chunks with attempts left back to pending.
    Retry,
}

#[derive(Subcommand)]
enum ServeService {
    /// JSON tool endpoints and the MCP endpoint at /mcp.
    Mcp,
}

fn init_tracing() {
    let filter = std::env::var("STRATA_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let cfg: Config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::run_sources(&cfg).await?;
        }
        Commands::Sync {
            connector,
            dry_run,
            limit,
        } => {
            ingest::run_sync(&cfg, &connector, dry_run, limit).await?;
        }
        Commands::Remove { source } => {
            sources::run_remove(&cfg, &source).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            min_score,
            semantic_weight,
            mmr_lambda,
            no_mmr,
            no_rerank,
            source,
            explain,
            json,
        } => {
            let request = SearchRequest {
                query,
                mode: mode.parse::<SearchMode>()?,
                limit,
                min_score,
                semantic_weight,
                mmr_lambda,
                mmr: no_mmr.then_some(false),
                rerank: no_rerank.then_some(false),
                source,
                explain,
            };
            let outcome = search_cmd::run_search(&cfg, &request, json).await?;
            return Ok(search_cmd::exit_code(outcome));
        }
        Commands::Kag {
            query,
            entities,
            hops,
            limit,
            source,
            json,
        } => {
            let request = KagRequest {
                query,
                entity_hints: entities,
                max_hops: hops,
                limit,
                source,
            };
            search_cmd::run_kag(&cfg, &request, json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, batch_size } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size).await?;
            }
            EmbedAction::Entities { limit } => {
                embed_cmd::run_embed_entities(&cfg, limit).await?;
            }
        },
        Commands::Extract { action } => match action {
            ExtractAction::Run { limit } => {
                extraction::run_extract(&cfg, limit).await?;
            }
            ExtractAction::Status => {
                extraction::run_extract_status(&cfg).await?;
            }
            ExtractAction::Retry => {
                extraction::run_extract_retry(&cfg).await?;
            }
        },
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(0)
}
