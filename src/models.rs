//! Data models for sources, dataset records and per-source run state.
//!
//! This module defines the core data structures used throughout the crawler:
//! - [`SourceDefinition`]: one upstream source from the catalog
//! - [`RawItem`]: an adapter's loosely-typed extraction result
//! - [`NewsItem`]: the canonical dataset record written to `news.jsonl`
//! - [`SourceRunState`], [`SourceStats`], [`Alert`]: health tracking written
//!   to the index file
//!
//! Field names are snake_case on the wire, matching the dataset consumers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One upstream source as declared in the catalog and adjusted by the overlay.
///
/// `config` is adapter-specific and deliberately untyped: feed URLs, CSS
/// selectors, API field maps and timezone hints all live here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    /// Adapter type tag (`rss`, `html`, `api`).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Environment variable name -> human description.
    #[serde(default)]
    pub requires: BTreeMap<String, String>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl SourceDefinition {
    /// A string-valued config entry, ignoring blanks.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A list-of-strings config entry. A bare string is treated as a one-element list.
    pub fn config_str_list(&self, key: &str) -> Vec<String> {
        match self.config.get(key) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// A map-valued config entry (empty when absent or not an object).
    pub fn config_map(&self, key: &str) -> Map<String, Value> {
        self.config
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// `content_type` from config, defaulting to `"news"`.
    pub fn content_type(&self) -> String {
        self.config_str("content_type").unwrap_or("news").to_string()
    }
}

/// A record as an adapter extracted it, before normalization.
///
/// Every field is optional: anything an adapter could not find or parse is
/// left `None` rather than failing the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub region: Option<String>,
}

impl RawItem {
    /// A raw item carrying the source-level `content_type`, `language` and `region`.
    pub fn for_source(source: &SourceDefinition) -> Self {
        RawItem {
            content_type: Some(source.content_type()),
            language: source.config_str("language").map(str::to_string),
            region: source.config_str("region").map(str::to_string),
            ..RawItem::default()
        }
    }
}

/// A record created by this run, serialized as one line of the dataset file.
///
/// Records already on disk are never decoded back into this type; see
/// [`crate::outputs::dataset::StoredRecord`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NewsItem {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub title: String,
    pub url: String,
    pub canonical_url: String,
    /// RFC 3339 in UTC, e.g. `2024-05-01T08:30:00+00:00`.
    pub published_at: String,
    pub fetched_at: String,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub region: Option<String>,
}

/// Outcome of a source in its most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

/// Health record for one source, carried from run to run in the index file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceRunState {
    #[serde(default)]
    pub failure_streak: u32,
    #[serde(default)]
    pub zero_new_streak: u32,
    /// `None` only for entries an older index wrote without one.
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_run: String,
}

/// Counters and outcome for one source in the run that just completed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceStats {
    pub fetched: usize,
    #[serde(rename = "new")]
    pub added: usize,
    pub skipped: usize,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub failure_streak: u32,
    pub zero_new_streak: u32,
    pub last_run: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FailureStreak,
    ZeroNewStreak,
}

/// An advisory raised when a streak crosses its configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Alert {
    pub source_id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub streak: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_run: String,
}
