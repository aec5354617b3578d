//! Identity-based deduplication across runs and sources.

use crate::models::{NewsItem, RawItem, SourceDefinition};
use crate::normalize::normalize;
use chrono::Utc;
use std::collections::HashSet;
use tracing::debug;

/// Per-source counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCounts {
    /// Raw items the adapter yielded.
    pub fetched: usize,
    pub added: usize,
    /// Rejected by the normalizer or already known.
    pub skipped: usize,
}

/// Running set of known ids plus the items this run added.
#[derive(Debug, Default)]
pub struct Accumulator {
    known: HashSet<String>,
    new_items: Vec<NewsItem>,
}

impl Accumulator {
    /// Seed with every non-empty id already in the dataset.
    pub fn seeded<'a>(existing_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let known = existing_ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Accumulator {
            known,
            new_items: Vec::new(),
        }
    }

    /// Normalize and filter one source's raw items, in order.
    pub fn accept(&mut self, raw_items: &[RawItem], source: &SourceDefinition) -> SourceCounts {
        let mut counts = SourceCounts {
            fetched: raw_items.len(),
            ..SourceCounts::default()
        };
        for raw in raw_items {
            let Some(item) = normalize(raw, source, Utc::now()) else {
                counts.skipped += 1;
                continue;
            };
            if !self.known.insert(item.id.clone()) {
                debug!(source = %source.id, id = %item.id, "Duplicate item skipped");
                counts.skipped += 1;
                continue;
            }
            self.new_items.push(item);
            counts.added += 1;
        }
        counts
    }

    pub fn into_new_items(self) -> Vec<NewsItem> {
        self.new_items
    }
}
