//! Command-line interface definitions for Policy Pulse.
//!
//! Two subcommands: `run` (alias `crawl`) performs one batch crawl, and
//! `validate` checks an existing dataset file. Paths default to the layout
//! the repository ships with.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Policy Pulse crawler.
///
/// # Examples
///
/// ```sh
/// # Crawl with the default file layout
/// policy_pulse run
///
/// # Write to a different dataset and index
/// policy_pulse crawl --data /srv/pulse/news.jsonl --index /srv/pulse/index.json
///
/// # Check a dataset
/// policy_pulse validate --data data/news.jsonl
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl every enabled source once and update the dataset and index
    #[command(visible_alias = "crawl")]
    Run(RunArgs),

    /// Check a dataset file and report every problem found
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON Lines dataset to merge into
    #[arg(long, default_value = "data/news.jsonl")]
    pub data: PathBuf,

    /// Index/state file
    #[arg(long, default_value = "data/index.json")]
    pub index: PathBuf,

    /// Source catalog
    #[arg(long, default_value = "config/sources.yaml")]
    pub catalog: PathBuf,

    /// Optional settings and per-source overrides (skipped when absent)
    #[arg(long, default_value = "config/sources_config.yaml")]
    pub overlay: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// JSON Lines dataset to check
    #[arg(long, default_value = "data/news.jsonl")]
    pub data: PathBuf,
}
