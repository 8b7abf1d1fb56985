//! Backfill adapter for JSONL record event files.
//!
//! Reads JSONL files where each line is a record event envelope, and feeds
//! them through the indexing pipeline into the SQLite index.
//!
//! # Usage
//!
//! ```bash
//! # Single file
//! larder-backfill -i events.jsonl --db ./data/index.db
//!
//! # Directory of JSONL files, with metrics
//! larder-backfill -i ./event-dumps/ --db ./data/index.db --metrics-port 9091
//! ```

use anyhow::Result;
use clap::Parser;
use larder_core::metrics::{init_metrics, start_metrics_server};
use larder_core::Db;
use larder_index::{EventSource, IndexerWorker, JsonlConfig, JsonlSource, RecordIndexer};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Backfill record events from JSONL files into the Larder index.
#[derive(Parser, Debug)]
#[command(name = "larder-backfill")]
#[command(about = "Index record events from JSONL files", long_about = None)]
struct Args {
    /// Input JSONL file or directory path
    #[arg(short, long)]
    input: PathBuf,

    /// Path to the SQLite index database
    #[arg(long, env = "LARDER_DB_PATH")]
    db: PathBuf,

    /// Continue on bad lines (log and skip)
    #[arg(long, default_value = "true")]
    continue_on_error: bool,

    /// Limit number of files to process (for testing)
    #[arg(long)]
    limit: Option<usize>,

    /// Print progress every N events
    #[arg(long, default_value = "10000")]
    progress_interval: usize,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,

    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize metrics and start server (if enabled)
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    let db = Db::open(&args.db)?;
    let indexer = RecordIndexer::new(db);
    let worker = IndexerWorker::new();
    let (sender, receiver) = crossbeam_channel::unbounded();
    let handle = worker.start(indexer, receiver);

    let mut source = JsonlSource::new(JsonlConfig {
        input: args.input.clone(),
        continue_on_error: args.continue_on_error,
        limit: args.limit,
        progress_interval: args.progress_interval,
    });

    let start = Instant::now();
    let source_stats = source.process(|event| {
        // A send failure means the worker is gone; stop reading.
        Ok(sender.send(event).is_ok())
    })?;

    // Close the channel and let the worker drain.
    drop(sender);
    if handle.join().is_err() {
        tracing::error!("indexer worker panicked");
    }
    let elapsed = start.elapsed();

    let worker_stats = worker.stats();
    info!(
        files = source_stats.files_processed,
        events = source_stats.total_events,
        parse_errors = source_stats.parse_errors,
        indexed = worker_stats.indexed,
        duplicates = worker_stats.duplicates,
        deleted = worker_stats.deleted,
        errors = worker_stats.errors,
        elapsed = ?elapsed,
        "backfill complete"
    );

    println!("Files processed:   {:>10}", source_stats.files_processed);
    println!("Events read:       {:>10}", source_stats.total_events);
    println!("  indexed:         {:>10}", worker_stats.indexed);
    println!("  duplicates:      {:>10}", worker_stats.duplicates);
    println!("  deletes:         {:>10}", worker_stats.deleted);
    println!("  errors:          {:>10}", worker_stats.errors + source_stats.parse_errors);
    println!("Elapsed:           {:>10.2?}", elapsed);
    if worker_stats.indexed > 0 && elapsed.as_secs_f64() > 0.0 {
        println!(
            "Throughput:        {:>10.0} events/sec",
            worker_stats.indexed as f64 / elapsed.as_secs_f64()
        );
    }

    Ok(())
}
