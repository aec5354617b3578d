//! # Policy Pulse
//!
//! A batch crawler for policy and economic news. Each invocation visits every
//! enabled source in a YAML catalog once, normalizes and deduplicates what it
//! finds into a JSON Lines dataset, and tracks per-source health so that a
//! broken selector or a dead endpoint raises an alert instead of going quiet.
//!
//! ## Features
//!
//! - Three source kinds: syndication feeds (RSS 2.0, RSS 1.0, Atom), scraped
//!   listing pages (CSS selectors) and JSON APIs (dotted paths + templates)
//! - Content-addressed ids: the same article from the same source is stored
//!   once, however its URL was decorated with tracking parameters
//! - Timezone-aware date parsing, including per-source formats and zones
//! - Failure and zero-new streak alerts written to the index file
//! - Optional retention by item count and age
//!
//! ## Usage
//!
//! ```sh
//! policy_pulse run --data data/news.jsonl --index data/index.json
//! policy_pulse validate --data data/news.jsonl
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Configuration**: Load the source catalog and optional overlay
//! 2. **Fetching**: Run each enabled source through its adapter, sequentially
//! 3. **Normalization**: Canonicalize URLs, derive ids, resolve timestamps
//! 4. **State**: Update per-source streaks and evaluate alerts
//! 5. **Output**: Rewrite the dataset and the index/state file
use clap::Parser;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod adapters;
mod cli;
mod config;
mod dedup;
mod error;
mod fetch;
mod models;
mod normalize;
mod outputs;
mod pipeline;
mod state;
mod timestamps;
mod utils;
mod validate;

use cli::{Cli, Command, RunArgs, ValidateArgs};
use config::{CrawlConfig, EnvSecrets};
use error::CrawlError;
use pipeline::Crawler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    // Secrets may come from a local .env file
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Could not read .env; using process environment only"),
    }

    let start_time = Instant::now();
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let result = match args.command {
        Command::Run(run_args) => run_crawl(run_args).await,
        Command::Validate(validate_args) => validate_dataset(validate_args).await,
    };

    let elapsed = start_time.elapsed();
    match result {
        Ok(code) => {
            info!(?elapsed, "Execution complete");
            code
        }
        Err(e) => {
            error!(error = %e, ?elapsed, "policy_pulse failed");
            ExitCode::FAILURE
        }
    }
}

#[instrument(level = "info", skip_all)]
async fn run_crawl(args: RunArgs) -> Result<ExitCode, CrawlError> {
    let config = CrawlConfig::load(&args.catalog, Some(&args.overlay))?;
    let secrets = EnvSecrets;
    let summary = Crawler::new(&config, &secrets)
        .run(&args.data, &args.index)
        .await?;

    for (source_id, stats) in &summary.stats {
        debug!(
            source = %source_id,
            status = ?stats.status,
            fetched = stats.fetched,
            new = stats.added,
            skipped = stats.skipped,
            "Source summary"
        );
    }
    info!(
        total = summary.total,
        new = summary.added,
        alerts = summary.alerts.len(),
        "Dataset updated"
    );
    Ok(ExitCode::SUCCESS)
}

#[instrument(level = "info", skip_all, fields(data = %args.data.display()))]
async fn validate_dataset(args: ValidateArgs) -> Result<ExitCode, CrawlError> {
    let report = validate::validate_file(&args.data).await?;
    if report.is_valid() {
        info!(records = report.records, "Dataset is valid");
        return Ok(ExitCode::SUCCESS);
    }
    for issue in &report.issues {
        eprintln!("{issue}");
    }
    Ok(ExitCode::FAILURE)
}
