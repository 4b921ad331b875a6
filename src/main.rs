//! # `cidx`
//!
//! Command-line front end for the context index engine.
//!
//! ```bash
//! cidx --config ./config/cidx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx index [PATHS..]` | Index the given files, or everything under the base paths |
//! | `cidx search "<query>"` | Ranked semantic search with metadata filters |
//! | `cidx delete <PATH>` | Remove a document and all of its vectors |
//! | `cidx stats` | Counts, sizes, and session performance |
//! | `cidx health` | Per-component health |
//! | `cidx rebuild [--full]` | Incremental rescan, or rebuild into a fresh collection |
//! | `cidx outdated` | Documents changed or missing since they were indexed |
//!
//! Machine-readable output goes to stdout as JSON; logs and progress go to
//! stderr. Ctrl-C cancels an index or rebuild run between files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use context_index::config;
use context_index::engine::{Engine, HealthStatus};
use context_index::models::{SearchFilters, SearchQuery};
use context_index::progress::ProgressMode;
use context_index::stats::render_stats;

/// Index documents into a vector store and search them.
///
/// All commands read a TOML configuration file. See
/// `config/cidx.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "cidx",
    about = "Structure-aware document indexing and semantic retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Index files.
    ///
    /// Without paths, discovers files under `[index].base_paths` using the
    /// configured include/exclude globs. Unchanged files are skipped when
    /// incremental mode is on.
    Index {
        /// Files to index.
        paths: Vec<PathBuf>,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Search indexed documents.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[retrieval].default_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity in [0, 1].
        #[arg(long)]
        threshold: Option<f32>,

        /// `code`, `documentation`, or `issue`.
        #[arg(long)]
        category: Option<String>,

        /// File extension, e.g. `ts`.
        #[arg(long)]
        file_type: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// Match documents carrying any of these tags. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only documents modified on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only documents modified on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Include matching lines per result.
        #[arg(long)]
        highlights: bool,

        /// Omit chunk content from results.
        #[arg(long)]
        no_content: bool,
    },

    /// Delete a document and its vectors.
    Delete { path: PathBuf },

    /// Show index statistics.
    Stats {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Check embedding provider, vector store, and registry health.
    ///
    /// Exits non-zero when the overall status is `error`.
    Health,

    /// Re-run discovery and indexing.
    Rebuild {
        /// Rebuild from scratch into a new collection, then switch to it.
        #[arg(long)]
        full: bool,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// List documents whose source changed or disappeared since indexing.
    Outdated,
}

fn parse_date(s: &str, end_of_day: bool) -> Result<i64> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc().timestamp())
        .with_context(|| format!("invalid date '{}'", s))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling after in-flight files finish...");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = Engine::new(cfg)
        .await
        .context("failed to initialise engine")?;

    match cli.command {
        Commands::Index { paths, progress } => {
            let reporter = progress.mode().reporter();
            let cancel = cancel_on_ctrl_c();
            let paths = (!paths.is_empty()).then_some(paths);
            let result = engine
                .index_documents(paths.as_deref(), Some(reporter.as_ref()), Some(&cancel))
                .await?;
            print_json(&result)?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
            category,
            file_type,
            language,
            tags,
            since,
            until,
            highlights,
            no_content,
        } => {
            let filters = SearchFilters {
                category,
                file_type,
                language,
                tags,
                modified_after: since.as_deref().map(|s| parse_date(s, false)).transpose()?,
                modified_before: until.as_deref().map(|s| parse_date(s, true)).transpose()?,
            };
            let query = SearchQuery {
                limit,
                threshold,
                filters,
                include_content: !no_content,
                include_highlights: highlights,
                ..SearchQuery::new(query)
            };
            let results = engine.search(&query).await?;
            print_json(&results)?;
        }
        Commands::Delete { path } => {
            engine.delete_document(&path).await?;
            println!("deleted {}", path.display());
        }
        Commands::Stats { json } => {
            let stats = engine.get_stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                print!("{}", render_stats(&stats));
            }
        }
        Commands::Health => {
            let report = engine.health_check().await;
            print_json(&report)?;
            if report.status == HealthStatus::Error {
                std::process::exit(1);
            }
        }
        Commands::Rebuild { full, progress } => {
            let reporter = progress.mode().reporter();
            let cancel = cancel_on_ctrl_c();
            let result = engine
                .rebuild(full, Some(reporter.as_ref()), Some(&cancel))
                .await?;
            print_json(&result)?;
        }
        Commands::Outdated => {
            let outdated = engine.find_outdated_documents().await?;
            print_json(&outdated)?;
        }
    }

    Ok(())
}
