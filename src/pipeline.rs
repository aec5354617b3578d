//! One crawl run, end to end.
//!
//! ```text
//! load dataset + previous state
//!   └─ for each enabled source, in catalog order:
//!        secrets? ─ no ──> skipped (missing secret)
//!        adapter? ─ no ──> skipped (unknown adapter)
//!        fetch_items ─ Err ──> failed
//!                    └ Ok ──> normalize + dedup ──> success
//! merge + retention ──> alerts ──> write dataset ──> write index
//! ```
//!
//! Everything runs sequentially on the caller's task. A source that fails or
//! is skipped becomes a state record; only dataset/index I/O aborts the run.

use crate::adapters::{AdapterContext, AdapterRegistry};
use crate::config::{CrawlConfig, SecretStore};
use crate::dedup::{Accumulator, SourceCounts};
use crate::error::CrawlError;
use crate::fetch::Fetcher;
use crate::models::{Alert, SourceDefinition, SourceRunState, SourceStats};
use crate::outputs::dataset::{self, StoredRecord};
use crate::outputs::index::{self, IndexFile};
use crate::state::{Outcome, evaluate_alerts, next_state};
use crate::timestamps::{now_iso, to_iso};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Records in the dataset after retention.
    pub total: usize,
    /// Records first seen in this run.
    pub added: usize,
    pub stats: BTreeMap<String, SourceStats>,
    pub alerts: Vec<Alert>,
}

pub struct Crawler<'a> {
    config: &'a CrawlConfig,
    secrets: &'a dyn SecretStore,
    registry: AdapterRegistry,
    fetcher: Fetcher,
}

impl<'a> Crawler<'a> {
    /// A crawler with the built-in adapters and an HTTP fetcher built from settings.
    pub fn new(config: &'a CrawlConfig, secrets: &'a dyn SecretStore) -> Self {
        let settings = &config.settings;
        Crawler {
            config,
            secrets,
            registry: AdapterRegistry::with_defaults(),
            fetcher: Fetcher::http(
                settings.request_timeout(),
                settings.attempts(),
                settings.retry_backoff(),
            ),
        }
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[instrument(
        level = "info",
        skip_all,
        fields(data = %data_path.display(), index = %index_path.display())
    )]
    pub async fn run(&self, data_path: &Path, index_path: &Path) -> Result<RunSummary, CrawlError> {
        let started = Instant::now();
        let existing = dataset::load_items(data_path).await?;
        let previous = index::load_previous_state(index_path).await;

        let mut accumulator = Accumulator::seeded(existing.iter().map(StoredRecord::id));
        // disabled sources keep whatever they had
        let mut states = previous;
        let mut stats: BTreeMap<String, SourceStats> = BTreeMap::new();
        let mut adapter_runs = 0usize;

        for source in &self.config.sources {
            if !source.enabled {
                debug!(source = %source.id, "Skipping disabled source");
                continue;
            }
            let (outcome, counts) = self
                .crawl_source(source, &mut accumulator, &mut adapter_runs)
                .await;
            let state = next_state(states.get(&source.id), &outcome, &now_iso());
            stats.insert(source.id.clone(), source_stats(&outcome, counts, &state));
            states.insert(source.id.clone(), state);
        }

        let new_items = accumulator
            .into_new_items()
            .iter()
            .map(StoredRecord::from_item)
            .collect::<Result<Vec<_>, _>>()?;
        let added = new_items.len();
        let now = Utc::now();
        let items =
            dataset::merge_and_retain(existing, new_items, &self.config.settings.retention, now);
        let alerts = evaluate_alerts(&states, &self.config.settings.alerting);

        dataset::write_items(data_path, &items).await?;
        let index = IndexFile::build(&items, &to_iso(now), stats, states, alerts);
        index::write_index(index_path, &index).await?;

        info!(
            total = index.total,
            new = added,
            sources = index.last_run.sources.len(),
            alerts = index.alerts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Crawl complete"
        );
        Ok(RunSummary {
            total: index.total,
            added,
            stats: index.last_run.sources,
            alerts: index.alerts,
        })
    }

    async fn crawl_source(
        &self,
        source: &SourceDefinition,
        accumulator: &mut Accumulator,
        adapter_runs: &mut usize,
    ) -> (Outcome, SourceCounts) {
        let missing: Vec<String> = source
            .requires
            .keys()
            .filter(|name| self.secrets.get(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return skipped(source, "missing secret", CrawlError::MissingSecret(missing));
        }

        let Some(adapter) = self.registry.get(&source.kind) else {
            return skipped(
                source,
                "unknown adapter",
                CrawlError::UnknownAdapter(source.kind.clone()),
            );
        };

        let delay = self.config.settings.crawl_delay();
        if *adapter_runs > 0 && !delay.is_zero() {
            debug!(?delay, "Crawl delay");
            sleep(delay).await;
        }
        *adapter_runs += 1;

        let user_agent = self.user_agent_for(source);
        let ctx = AdapterContext {
            user_agent: &user_agent,
            fetcher: &self.fetcher,
            secrets: self.secrets,
        };
        match adapter.fetch_items(source, &ctx).await {
            Ok(raw_items) => {
                let counts = accumulator.accept(&raw_items, source);
                info!(
                    source = %source.id,
                    fetched = counts.fetched,
                    new = counts.added,
                    skipped = counts.skipped,
                    "Source crawled"
                );
                (Outcome::Succeeded { added: counts.added }, counts)
            }
            Err(e) => {
                error!(source = %source.id, error = %e, "Source failed");
                (
                    Outcome::Failed {
                        error: e.to_string(),
                    },
                    SourceCounts::default(),
                )
            }
        }
    }

    /// Settings user agent, unless a required `*USER_AGENT` secret is set.
    fn user_agent_for(&self, source: &SourceDefinition) -> String {
        source
            .requires
            .keys()
            .filter(|name| name.ends_with("USER_AGENT"))
            .filter_map(|name| self.secrets.get(name))
            .last()
            .unwrap_or_else(|| self.config.settings.user_agent.clone())
    }
}

fn skipped(source: &SourceDefinition, reason: &str, err: CrawlError) -> (Outcome, SourceCounts) {
    warn!(source = %source.id, %reason, error = %err, "Skipping source");
    (
        Outcome::Skipped {
            reason: reason.to_string(),
            error: err.to_string(),
        },
        SourceCounts::default(),
    )
}

fn source_stats(outcome: &Outcome, counts: SourceCounts, state: &SourceRunState) -> SourceStats {
    SourceStats {
        fetched: counts.fetched,
        added: counts.added,
        skipped: counts.skipped,
        status: outcome.status(),
        reason: match outcome {
            Outcome::Skipped { reason, .. } => Some(reason.clone()),
            _ => None,
        },
        failure_streak: state.failure_streak,
        zero_new_streak: state.zero_new_streak,
        last_run: state.last_run.clone(),
        last_error: state.last_error.clone(),
    }
}
