//! Persistence of the dataset and the index/state file.
//!
//! # Submodules
//!
//! - [`dataset`]: JSON Lines dataset loading, merge/retention, rewrite
//! - [`index`]: the index file (counts, last run stats, source state, alerts)
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── news.jsonl   # one JSON record per line, newest first
//! └── index.json   # pretty JSON, rewritten every run
//! ```
//!
//! Both files are fully rewritten on each run. They are single-writer: callers
//! must not run two crawls against the same paths at once.

pub mod dataset;
pub mod index;
