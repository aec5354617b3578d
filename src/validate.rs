//! Offline dataset checker behind `policy_pulse validate`.
//!
//! Reads the dataset line by line and collects every problem rather than
//! stopping at the first one. Blank lines are ignored; a line that is not
//! valid UTF-8 is reported as invalid JSON.

use crate::error::CrawlError;
use crate::timestamps::parse_permissive;
use crate::utils::numbered_lines;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument};

/// Fields every record must carry with a non-empty value.
pub const REQUIRED_FIELDS: &[&str] = &["id", "source_id", "source_name", "title", "url", "published_at"];

/// One problem, tagged with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("Line {line}: invalid json")]
    InvalidJson { line: usize },

    #[error("Line {line}: expected a JSON object")]
    NotAnObject { line: usize },

    #[error("Line {line}: missing {field}")]
    MissingField { line: usize, field: &'static str },

    #[error("Line {line}: duplicate id {id}")]
    DuplicateId { line: usize, id: String },

    #[error("Line {line}: invalid published_at")]
    InvalidPublishedAt { line: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Non-blank lines examined.
    pub records: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Check dataset bytes already in memory.
pub fn validate_lines(bytes: impl AsRef<[u8]>) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (line, decoded) in numbered_lines(bytes.as_ref()) {
        let Ok(raw) = decoded else {
            report.records += 1;
            report.issues.push(ValidationIssue::InvalidJson { line });
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        report.records += 1;

        let record = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(record)) => record,
            Ok(_) => {
                report.issues.push(ValidationIssue::NotAnObject { line });
                continue;
            }
            Err(_) => {
                report.issues.push(ValidationIssue::InvalidJson { line });
                continue;
            }
        };

        for &field in REQUIRED_FIELDS {
            if is_blank(record.get(field)) {
                report.issues.push(ValidationIssue::MissingField { line, field });
            }
        }

        if let Some(id) = record.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            if !seen.insert(id.to_string()) {
                report.issues.push(ValidationIssue::DuplicateId {
                    line,
                    id: id.to_string(),
                });
            }
        }

        // absence is already reported as a missing field
        let parseable = match record.get("published_at") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) if s.is_empty() => true,
            Some(Value::String(s)) => parse_permissive(s).is_some(),
            Some(_) => false,
        };
        if !parseable {
            report.issues.push(ValidationIssue::InvalidPublishedAt { line });
        }
    }
    report
}

/// Check the dataset at `path`. A missing file is an error, not an empty report.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn validate_file(path: &Path) -> Result<ValidationReport, CrawlError> {
    let bytes = fs::read(path).await?;
    let report = validate_lines(&bytes);
    info!(records = report.records, issues = report.issues.len(), "Validated dataset");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Value {
        json!({
            "id": id,
            "source_id": "fed",
            "source_name": "Federal Reserve",
            "title": "FOMC statement",
            "url": "https://www.federalreserve.gov/a",
            "published_at": "2024-05-01T18:00:00+00:00",
        })
    }

    fn lines(records: &[Value]) -> String {
        records.iter().map(|r| format!("{r}\n")).collect()
    }

    fn messages(report: &ValidationReport) -> Vec<String> {
        report.issues.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn clean_dataset_passes() {
        let report = validate_lines(&lines(&[record("a"), record("b")]));
        assert!(report.is_valid());
        assert_eq!(report.records, 2);
    }

    #[test]
    fn missing_url_reports_line_and_field() {
        let mut bad = record("b");
        bad.as_object_mut().unwrap().remove("url");
        let report = validate_lines(&lines(&[record("a"), bad]));
        assert_eq!(messages(&report), vec!["Line 2: missing url"]);
    }

    #[test]
    fn each_repeat_is_reported() {
        let report = validate_lines(&lines(&[record("a"), record("a"), record("b"), record("a")]));
        assert_eq!(
            messages(&report),
            vec!["Line 2: duplicate id a", "Line 4: duplicate id a"]
        );
    }

    #[test]
    fn bad_json_and_timestamps() {
        let mut bad_time = record("c");
        bad_time["published_at"] = json!("sometime last week");
        let mut empty_title = record("d");
        empty_title["title"] = json!("");
        let text = format!(
            "{}\n\nnot json\n[1]\n{}{}",
            record("a"),
            lines(&[bad_time]),
            lines(&[empty_title])
        );
        let report = validate_lines(&text);
        assert_eq!(
            messages(&report),
            vec![
                "Line 3: invalid json",
                "Line 4: expected a JSON object",
                "Line 5: invalid published_at",
                "Line 6: missing title",
            ]
        );
        assert_eq!(report.records, 5);
    }

    #[test]
    fn missing_published_at_is_only_a_missing_field() {
        let mut bad = record("a");
        bad["published_at"] = Value::Null;
        let report = validate_lines(&lines(&[bad]));
        assert_eq!(
            report.issues,
            vec![ValidationIssue::MissingField {
                line: 1,
                field: "published_at"
            }]
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_an_itemized_issue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.jsonl");
        let mut bytes = lines(&[record("a")]).into_bytes();
        bytes.extend_from_slice(b"{\"id\":\"\xc3\x28\"}\n");
        bytes.extend_from_slice(lines(&[record("a")]).as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let report = validate_file(&path).await.unwrap();
        assert_eq!(
            messages(&report),
            vec!["Line 2: invalid json", "Line 3: duplicate id a"]
        );
        assert_eq!(report.records, 3);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_file(&dir.path().join("news.jsonl")).await.unwrap_err();
        assert!(matches!(err, CrawlError::Io(_)));
    }
}
