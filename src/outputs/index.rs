//! The index/state file.
//!
//! Written as pretty JSON after every run:
//!
//! ```json
//! {
//!   "generated_at": "2024-05-10T06:00:00+00:00",
//!   "total": 412,
//!   "sources": {"fed": 120, "ecb": 292},
//!   "last_run": {
//!     "completed_at": "2024-05-10T06:00:00+00:00",
//!     "sources": {"fed": {"fetched": 20, "new": 2, "skipped": 18, "status": "success", ...}}
//!   },
//!   "state": {"sources": {"fed": {"failure_streak": 0, "zero_new_streak": 0, ...}}},
//!   "alerts": []
//! }
//! ```
//!
//! Only `state.sources` is read back; the rest is for humans and dashboards.

use crate::error::CrawlError;
use crate::models::{Alert, SourceRunState, SourceStats};
use crate::outputs::dataset::StoredRecord;
use crate::state::StateMap;
use crate::utils::ensure_parent_dir;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub completed_at: String,
    pub sources: BTreeMap<String, SourceStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSection {
    pub sources: StateMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    pub generated_at: String,
    pub total: usize,
    /// Dataset records per source id.
    pub sources: BTreeMap<String, usize>,
    pub last_run: LastRun,
    pub state: StateSection,
    pub alerts: Vec<Alert>,
}

impl IndexFile {
    pub fn build(
        items: &[StoredRecord],
        now: &str,
        stats: BTreeMap<String, SourceStats>,
        states: StateMap,
        alerts: Vec<Alert>,
    ) -> Self {
        let mut sources: BTreeMap<String, usize> = BTreeMap::new();
        for item in items {
            *sources.entry(item.source_id().to_string()).or_default() += 1;
        }
        IndexFile {
            generated_at: now.to_string(),
            total: items.len(),
            sources,
            last_run: LastRun {
                completed_at: now.to_string(),
                sources: stats,
            },
            state: StateSection { sources: states },
            alerts,
        }
    }
}

/// Source state from a previous index.
///
/// A missing or unreadable index is an empty map; entries that do not decode
/// are dropped individually.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_previous_state(path: &Path) -> StateMap {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(error = %e, "Cannot read index; starting with empty state");
            }
            return StateMap::new();
        }
    };
    let doc: Value = match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "Index is not valid JSON; starting with empty state");
            return StateMap::new();
        }
    };

    let Some(entries) = doc.pointer("/state/sources").and_then(Value::as_object) else {
        return StateMap::new();
    };
    let mut states = StateMap::new();
    for (source_id, entry) in entries {
        match serde_json::from_value::<SourceRunState>(entry.clone()) {
            Ok(state) => {
                states.insert(source_id.clone(), state);
            }
            Err(e) => warn!(source = %source_id, error = %e, "Dropping unreadable source state"),
        }
    }
    info!(count = states.len(), "Loaded previous source state");
    states
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_index(path: &Path, index: &IndexFile) -> Result<(), CrawlError> {
    let json = serde_json::to_string_pretty(index)?;
    ensure_parent_dir(path).await?;
    fs::write(path, json).await?;
    info!(total = index.total, alerts = index.alerts.len(), "Wrote index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertKind, RunStatus};

    const NOW: &str = "2024-05-10T06:00:00+00:00";

    fn state(failures: u32) -> SourceRunState {
        SourceRunState {
            failure_streak: failures,
            zero_new_streak: 0,
            last_status: Some(if failures > 0 { RunStatus::Failed } else { RunStatus::Success }),
            last_error: (failures > 0).then(|| "HTTP 500".to_string()),
            last_run: NOW.into(),
        }
    }

    fn news(source_id: &str) -> StoredRecord {
        StoredRecord::parse(&format!(r#"{{"source_id":"{source_id}"}}"#)).unwrap()
    }

    #[test]
    fn build_counts_items_per_source() {
        let items = vec![news("fed"), news("ecb"), news("fed")];
        let index = IndexFile::build(&items, NOW, BTreeMap::new(), StateMap::new(), Vec::new());
        assert_eq!(index.total, 3);
        assert_eq!(index.sources.get("fed"), Some(&2));
        assert_eq!(index.sources.get("ecb"), Some(&1));
        assert_eq!(index.generated_at, index.last_run.completed_at);
    }

    #[tokio::test]
    async fn state_survives_a_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/index.json");
        let mut states = StateMap::new();
        states.insert("fed".into(), state(0));
        states.insert("sec_edgar".into(), state(3));
        let alerts = vec![Alert {
            source_id: "sec_edgar".into(),
            kind: AlertKind::FailureStreak,
            streak: 3,
            message: "Consecutive failures detected. Check selectors or endpoint.".into(),
            last_error: Some("HTTP 500".into()),
            last_run: NOW.into(),
        }];
        let index = IndexFile::build(&[], NOW, BTreeMap::new(), states.clone(), alerts);
        write_index(&path, &index).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["alerts"][0]["type"], "failure_streak");
        assert_eq!(raw["state"]["sources"]["fed"]["last_status"], "success");
        assert_eq!(raw["state"]["sources"]["fed"]["last_error"], Value::Null);

        assert_eq!(load_previous_state(&path).await, states);
    }

    #[tokio::test]
    async fn unreadable_index_means_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_previous_state(&dir.path().join("missing.json")).await.is_empty());

        let path = dir.path().join("index.json");
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(load_previous_state(&path).await.is_empty());

        std::fs::write(&path, r#"{"total": 3}"#).unwrap();
        assert!(load_previous_state(&path).await.is_empty());
    }

    #[tokio::test]
    async fn bad_entries_are_dropped_individually() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(
            &path,
            r#"{"state": {"sources": {
                "fed": {"failure_streak": 2, "zero_new_streak": 1, "last_status": "failed",
                        "last_error": "timeout", "last_run": "2024-05-09T06:00:00+00:00"},
                "ecb": {"failure_streak": "lots", "last_status": "failed"},
                "boe": {"last_status": "exploded"},
                "pboc": {"failure_streak": 3, "zero_new_streak": 1}
            }}}"#,
        )
        .unwrap();
        let states = load_previous_state(&path).await;
        assert_eq!(states.len(), 2);
        assert_eq!(states["fed"].failure_streak, 2);
        assert_eq!(states["fed"].last_status, Some(RunStatus::Failed));
        assert_eq!(states["fed"].last_error.as_deref(), Some("timeout"));
        // streaks survive an entry written without a status
        assert_eq!(states["pboc"].failure_streak, 3);
        assert_eq!(states["pboc"].zero_new_streak, 1);
        assert_eq!(states["pboc"].last_status, None);
    }
}
