//! Per-source health: streak transitions and threshold alerts.
//!
//! Each run moves every processed source through exactly one [`Outcome`].
//! [`next_state`] derives the new [`SourceRunState`] from the previous one and
//! [`evaluate_alerts`] scans the final map once all sources are done.

use crate::config::AlertingSettings;
use crate::models::{Alert, AlertKind, RunStatus, SourceRunState};
use std::collections::BTreeMap;
use tracing::warn;

pub type StateMap = BTreeMap<String, SourceRunState>;

/// What happened to a source this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not attempted (missing secret, unknown adapter). Streaks carry over.
    Skipped { reason: String, error: String },
    Failed { error: String },
    Succeeded { added: usize },
}

impl Outcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Outcome::Skipped { .. } => RunStatus::Skipped,
            Outcome::Failed { .. } => RunStatus::Failed,
            Outcome::Succeeded { .. } => RunStatus::Success,
        }
    }
}

/// Apply one run's outcome to a source's previous state.
pub fn next_state(previous: Option<&SourceRunState>, outcome: &Outcome, now: &str) -> SourceRunState {
    let prev_failures = previous.map_or(0, |p| p.failure_streak);
    let prev_zero_new = previous.map_or(0, |p| p.zero_new_streak);

    let (failure_streak, zero_new_streak, last_error) = match outcome {
        Outcome::Skipped { error, .. } => (prev_failures, prev_zero_new, Some(error.clone())),
        Outcome::Failed { error } => (
            prev_failures.saturating_add(1),
            prev_zero_new,
            Some(error.clone()),
        ),
        Outcome::Succeeded { added } => {
            let zero_new = if *added == 0 {
                prev_zero_new.saturating_add(1)
            } else {
                0
            };
            (0, zero_new, None)
        }
    };

    SourceRunState {
        failure_streak,
        zero_new_streak,
        last_status: Some(outcome.status()),
        last_error,
        last_run: now.to_string(),
    }
}

fn crosses(streak: u32, threshold: i64) -> bool {
    threshold > 0 && i64::from(streak) >= threshold
}

/// Alerts for every source whose streak reached its threshold.
///
/// Ordered by source id; a failure alert precedes a zero-new alert for the
/// same source.
pub fn evaluate_alerts(states: &StateMap, settings: &AlertingSettings) -> Vec<Alert> {
    if !settings.enabled {
        return Vec::new();
    }

    let mut alerts = Vec::new();
    for (source_id, state) in states {
        if crosses(state.failure_streak, settings.failure_streak_threshold) {
            alerts.push(Alert {
                source_id: source_id.clone(),
                kind: AlertKind::FailureStreak,
                streak: state.failure_streak,
                message: "Consecutive failures detected. Check selectors or endpoint.".into(),
                last_error: state.last_error.clone(),
                last_run: state.last_run.clone(),
            });
        }
        if crosses(state.zero_new_streak, settings.zero_new_streak_threshold) {
            alerts.push(Alert {
                source_id: source_id.clone(),
                kind: AlertKind::ZeroNewStreak,
                streak: state.zero_new_streak,
                message: "No new items in consecutive runs. Check selectors or endpoint.".into(),
                last_error: None,
                last_run: state.last_run.clone(),
            });
        }
    }

    for alert in &alerts {
        warn!(
            source = %alert.source_id,
            kind = ?alert.kind,
            streak = alert.streak,
            last_error = alert.last_error.as_deref().unwrap_or(""),
            "Source health alert"
        );
    }
    alerts
}
