//! # ragsync CLI
//!
//! ```bash
//! ragsync --config ./config/ragsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragsync run-once` | Index new and modified files once |
//! | `ragsync start-interval` | Re-run every `scheduler.interval_minutes` until stopped |
//! | `ragsync install-periodic-job` | Add the run to the user's crontab |
//! | `ragsync remove-periodic-job` | Remove it again |
//! | `ragsync show-periodic-job-entry` | Print the crontab line without installing it |
//! | `ragsync stats` | Summarize the cache, the index and the last run |
//! | `ragsync query "<text>"` | Show the fragments closest to a query |
//!
//! Exit status is 0 when a run records no errors and 1 otherwise, including
//! fatal errors such as a missing config file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ragsync::config::{self, Config};
use ragsync::cron::{CrontabAdapter, PeriodicJobAdapter};
use ragsync::embedding::create_embedder;
use ragsync::ingest::RunOptions;
use ragsync::logging::init_logging;
use ragsync::scheduler;
use ragsync::sqlite_store::SqliteVectorStore;
use ragsync::stats;
use ragsync::store::VectorStore;

/// Keep a local vector index in sync with a tree of documents.
#[derive(Parser)]
#[command(
    name = "ragsync",
    about = "Incremental, idempotent indexing of document trees into a local vector index",
    version
)]
struct Cli {
    /// Path to the configuration file (TOML).
    ///
    /// Relative paths inside the file resolve against its directory.
    #[arg(long, global = true, default_value = "./config/ragsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index new and modified files once.
    RunOnce {
        /// Ignore the change cache and reprocess every file.
        #[arg(long)]
        full: bool,

        /// Scan and segment only; write nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run continuously, once every `scheduler.interval_minutes`.
    ///
    /// Stops cleanly on Ctrl-C or SIGTERM after the current cycle.
    StartInterval,

    /// Register a periodic `run-once` with the user's crontab.
    InstallPeriodicJob,

    /// Remove the periodic job installed by `install-periodic-job`.
    RemovePeriodicJob,

    /// Print the crontab line `install-periodic-job` would add.
    ShowPeriodicJobEntry,

    /// Summarize the change cache, the index and the last run.
    Stats,

    /// Print the fragments most similar to a query.
    Query {
        text: String,

        /// Number of fragments to return.
        #[arg(short, long, default_value = "5")]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = config::load_config(&cli.config)?;

    if !matches!(cli.command, Commands::ShowPeriodicJobEntry) {
        if let Err(e) = init_logging(&cfg.logging, &cfg.resolve(&cfg.logging.file)) {
            eprintln!("warning: file logging disabled: {:#}", e);
        }
    }

    match cli.command {
        Commands::RunOnce { full, dry_run } => {
            let stats = scheduler::run_once(&cfg, RunOptions { full, dry_run }).await?;
            print_summary(&stats);
            return Ok(ExitCode::from(stats.exit_code()));
        }
        Commands::StartInterval => {
            scheduler::start_interval(&cfg).await?;
        }
        Commands::InstallPeriodicJob => {
            let adapter = CrontabAdapter::from_config(&cfg)?;
            if adapter.install().await? {
                println!("Installed periodic job:");
            } else {
                println!("Periodic job already installed:");
            }
            println!("  {}", adapter.generate_entry());
        }
        Commands::RemovePeriodicJob => {
            let adapter = CrontabAdapter::from_config(&cfg)?;
            if adapter.remove().await? {
                println!("Periodic job removed.");
            } else {
                println!("No periodic job installed.");
            }
        }
        Commands::ShowPeriodicJobEntry => {
            let adapter = CrontabAdapter::from_config(&cfg)?;
            println!("{}", adapter.generate_entry());
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Query { text, k } => {
            run_query(&cfg, &text, k).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_summary(stats: &ragsync::models::RunStats) {
    let mode = if stats.dry_run { " (dry run)" } else { "" };
    println!("run-once{}", mode);
    println!("  files scanned:    {}", stats.files_scanned);
    println!("  files changed:    {}", stats.files_changed);
    println!("  files processed:  {}", stats.files_processed);
    println!("  files skipped:    {}", stats.files_skipped);
    println!("  fragments added:  {}", stats.fragments_added);
    if stats.files_pruned > 0 {
        println!("  files pruned:     {}", stats.files_pruned);
    }
    println!("  errors:           {}", stats.errors);
    println!("  duration:         {:.2}s", stats.duration_seconds);
    println!("{}", if stats.errors == 0 { "ok" } else { "completed with errors" });
}

async fn run_query(cfg: &Config, text: &str, k: usize) -> anyhow::Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let store = SqliteVectorStore::open(&cfg.resolve(&cfg.index.path), embedder).await?;
    let hits = store.query(text, k).await?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({} {}/{})",
            rank + 1,
            hit.score,
            hit.id,
            hit.metadata.source,
            hit.metadata.chunk_index + 1,
            hit.metadata.total_chunks
        );
        let preview: String = hit.text.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
    }
    store.close().await;
    Ok(())
}
