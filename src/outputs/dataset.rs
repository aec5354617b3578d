//! The JSON Lines dataset.
//!
//! Loading is lenient: a missing file is an empty dataset and lines that are
//! blank, not valid UTF-8 or not a JSON object are skipped. Records that load
//! are kept as their original line text and written back unchanged; only this
//! run's items are serialized. Writing always replaces the whole file with the
//! merged, retained list.

use crate::config::RetentionSettings;
use crate::error::CrawlError;
use crate::models::NewsItem;
use crate::timestamps::to_iso;
use crate::utils::{ensure_parent_dir, numbered_lines, truncate_for_log};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};

/// One dataset line, as it will be written.
///
/// Only the fields that dedup, ordering, retention and the index need are read
/// out of the line; everything else, unknown keys included, rides along in the
/// text untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    id: String,
    source_id: String,
    published_at: String,
    line: String,
}

impl StoredRecord {
    /// `None` unless `line` is a JSON object.
    pub fn parse(line: &str) -> Option<Self> {
        let Value::Object(fields) = serde_json::from_str::<Value>(line).ok()? else {
            return None;
        };
        let text = |key: &str| -> String {
            fields
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(StoredRecord {
            id: text("id"),
            source_id: text("source_id"),
            published_at: text("published_at"),
            line: line.to_string(),
        })
    }

    /// Serialize a record produced by this run.
    pub fn from_item(item: &NewsItem) -> Result<Self, serde_json::Error> {
        Ok(StoredRecord {
            id: item.id.clone(),
            source_id: item.source_id.clone(),
            published_at: item.published_at.clone(),
            line: serde_json::to_string(item)?,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn published_at(&self) -> &str {
        &self.published_at
    }

    pub fn line(&self) -> &str {
        &self.line
    }
}

/// Read every usable record from `path`, in file order.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_items(path: &Path) -> Result<Vec<StoredRecord>, CrawlError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No existing dataset; starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    for (line_no, decoded) in numbered_lines(&bytes) {
        let line = match decoded {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping dataset line that is not UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match StoredRecord::parse(line) {
            Some(record) => items.push(record),
            None => warn!(
                line = line_no,
                content = %truncate_for_log(line, 120),
                "Skipping unreadable dataset line"
            ),
        }
    }
    info!(count = items.len(), "Loaded existing dataset");
    Ok(items)
}

/// Rewrite `path` with one JSON object per line.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = items.len()))]
pub async fn write_items(path: &Path, items: &[StoredRecord]) -> Result<(), CrawlError> {
    let mut out = String::new();
    for item in items {
        out.push_str(item.line());
        out.push('\n');
    }
    ensure_parent_dir(path).await?;
    fs::write(path, out).await?;
    info!("Wrote dataset");
    Ok(())
}

/// Previous records followed by this run's, newest first, then retention.
///
/// Sorting compares `published_at` strings, which is chronological for the
/// stored format; ties keep their merged order and empty values sort last.
/// With retention enabled, `max_items` trims the list first and `days` then
/// drops anything published before `now - days`.
pub fn merge_and_retain(
    previous: Vec<StoredRecord>,
    new_items: Vec<StoredRecord>,
    retention: &RetentionSettings,
    now: DateTime<Utc>,
) -> Vec<StoredRecord> {
    let mut merged = previous;
    merged.extend(new_items);
    merged.sort_by(|a, b| b.published_at.cmp(&a.published_at));

    if !retention.enabled {
        return merged;
    }

    if let Some(max) = retention.max_items.filter(|m| *m > 0) {
        let max = usize::try_from(max).unwrap_or(usize::MAX);
        merged.truncate(max);
    }
    if let Some(days) = retention.days.filter(|d| *d > 0) {
        let cutoff = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .map(to_iso);
        if let Some(cutoff) = cutoff {
            let before = merged.len();
            merged.retain(|item| item.published_at() >= cutoff.as_str());
            info!(%cutoff, dropped = before - merged.len(), "Applied age retention");
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn news(id: &str, published_at: &str) -> NewsItem {
        NewsItem {
            id: id.into(),
            source_id: "fed".into(),
            source_name: "Federal Reserve".into(),
            title: format!("Item {id}"),
            url: format!("https://x.test/{id}"),
            canonical_url: format!("https://x.test/{id}"),
            published_at: published_at.into(),
            fetched_at: "2024-05-10T00:00:00+00:00".into(),
            ..NewsItem::default()
        }
    }

    fn item(id: &str, published_at: &str) -> StoredRecord {
        StoredRecord::from_item(&news(id, published_at)).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap()
    }

    fn ids(items: &[StoredRecord]) -> Vec<&str> {
        items.iter().map(StoredRecord::id).collect()
    }

    fn five() -> Vec<StoredRecord> {
        (1..=5)
            .map(|d| item(&format!("d{d}"), &format!("2024-05-0{d}T00:00:00+00:00")))
            .collect()
    }

    #[test]
    fn sorts_newest_first_and_keeps_everything_without_retention() {
        let merged = merge_and_retain(
            vec![item("old", "2024-05-01T00:00:00+00:00"), item("blank", "")],
            vec![item("new", "2024-05-03T00:00:00+00:00")],
            &RetentionSettings::default(),
            now(),
        );
        assert_eq!(ids(&merged), vec!["new", "old", "blank"]);
    }

    #[test]
    fn equal_timestamps_keep_merge_order() {
        let ts = "2024-05-01T00:00:00+00:00";
        let merged = merge_and_retain(
            vec![item("a", ts), item("b", ts)],
            vec![item("c", ts)],
            &RetentionSettings::default(),
            now(),
        );
        assert_eq!(ids(&merged), vec!["a", "b", "c"]);
    }

    #[test]
    fn retention_by_count_keeps_most_recent() {
        let retention = RetentionSettings {
            enabled: true,
            max_items: Some(2),
            days: None,
        };
        let merged = merge_and_retain(five(), Vec::new(), &retention, now());
        assert_eq!(ids(&merged), vec!["d5", "d4"]);
    }

    #[test]
    fn retention_by_age_uses_iso_cutoff() {
        let retention = RetentionSettings {
            enabled: true,
            max_items: Some(0),
            days: Some(7),
        };
        // cutoff is 2024-05-03T00:00:00+00:00, inclusive
        let merged = merge_and_retain(five(), vec![item("blank", "")], &retention, now());
        assert_eq!(ids(&merged), vec!["d5", "d4", "d3"]);
    }

    #[test]
    fn disabled_retention_ignores_limits() {
        let retention = RetentionSettings {
            enabled: false,
            max_items: Some(1),
            days: Some(1),
        };
        assert_eq!(merge_and_retain(five(), Vec::new(), &retention, now()).len(), 5);
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let items = load_items(&dir.path().join("absent.jsonl")).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn write_then_load_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/news.jsonl");
        let mut cn = news("cn", "2024-05-02T00:00:00+00:00");
        cn.title = "中国人民银行公告".into();
        let cn = StoredRecord::from_item(&cn).unwrap();
        write_items(&path, &[item("a", "2024-05-01T00:00:00+00:00"), cn]).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.contains("中国人民银行公告"));
        assert!(written.contains("\"summary\":null"));

        let mut noisy = written.clone();
        noisy.push_str("\n   \nnot json\n[1,2]\n");
        std::fs::write(&path, noisy).unwrap();
        let loaded = load_items(&path).await.unwrap();
        assert_eq!(ids(&loaded), vec!["a", "cn"]);
        assert_eq!(loaded[1].published_at(), "2024-05-02T00:00:00+00:00");
        assert_eq!(loaded[1].source_id(), "fed");
    }

    #[tokio::test]
    async fn prior_lines_are_rewritten_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.jsonl");
        let odd = r#"{"id":"old","source_id":"fred","published_at":"2024-05-01T00:00:00+00:00","keywords":null,"summary":{"text":"GDP, advance estimate"},"series":"GDPC1"}"#;
        std::fs::write(&path, format!("{odd}\n")).unwrap();

        let previous = load_items(&path).await.unwrap();
        assert_eq!(ids(&previous), vec!["old"]);
        let merged = merge_and_retain(
            previous,
            vec![item("new", "2024-05-03T00:00:00+00:00")],
            &RetentionSettings::default(),
            now(),
        );
        write_items(&path, &merged).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], odd);
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.jsonl");
        let mut bytes = item("a", "2024-05-01T00:00:00+00:00").line().as_bytes().to_vec();
        bytes.extend_from_slice(b"\n{\"id\":\"bad\xff\"}\n");
        bytes.extend_from_slice(item("b", "2024-05-02T00:00:00+00:00").line().as_bytes());
        bytes.push(b'\n');
        std::fs::write(&path, bytes).unwrap();

        let loaded = load_items(&path).await.unwrap();
        assert_eq!(ids(&loaded), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn partial_records_load_without_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.jsonl");
        std::fs::write(&path, "{\"id\":\"x\",\"title\":\"T\"}\n").unwrap();
        let loaded = load_items(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), "x");
        assert_eq!(loaded[0].published_at(), "");
        assert_eq!(loaded[0].line(), "{\"id\":\"x\",\"title\":\"T\"}");
    }
}
