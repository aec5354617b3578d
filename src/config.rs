//! Source catalog, overlay and run settings.
//!
//! A run is configured by two YAML files:
//!
//! - the **catalog** (`config/sources.yaml`), a `sources:` list of
//!   [`SourceDefinition`]s;
//! - an optional **overlay** (`config/sources_config.yaml`) holding the
//!   `settings:` block and per-source `sources: {id: {enabled, config, notes}}`
//!   overrides.
//!
//! Both are read once into an immutable [`CrawlConfig`] that the pipeline
//! borrows for the whole run.

use crate::error::CrawlError;
use crate::models::SourceDefinition;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

fn default_max_retries() -> i64 {
    3
}
fn default_backoff() -> f64 {
    2.0
}
fn default_timeout() -> f64 {
    20.0
}
fn default_crawl_delay() -> f64 {
    1.0
}
fn default_user_agent() -> String {
    "PolicyPulseBot/0.1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_threshold() -> i64 {
    3
}

/// Recognized options from the overlay's `settings:` block.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Attempts per request; anything below 1 still makes one attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    #[serde(default = "default_backoff", alias = "retry_backoff_sec")]
    pub retry_backoff_seconds: f64,
    #[serde(default = "default_timeout", alias = "request_timeout_sec")]
    pub request_timeout_seconds: f64,
    #[serde(default = "default_crawl_delay", alias = "crawl_delay_sec")]
    pub crawl_delay_seconds: f64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub alerting: AlertingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_retries: default_max_retries(),
            retry_backoff_seconds: default_backoff(),
            request_timeout_seconds: default_timeout(),
            crawl_delay_seconds: default_crawl_delay(),
            user_agent: default_user_agent(),
            retention: RetentionSettings::default(),
            alerting: AlertingSettings::default(),
        }
    }
}

impl Settings {
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.max_retries.max(1)).unwrap_or(u32::MAX)
    }

    pub fn retry_backoff(&self) -> Duration {
        seconds(self.retry_backoff_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds)
    }

    pub fn crawl_delay(&self) -> Duration {
        seconds(self.crawl_delay_seconds)
    }
}

/// Negative or NaN values collapse to zero; anything too large saturates.
fn seconds(value: f64) -> Duration {
    if value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RetentionSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Keep at most this many of the most recent items (`<= 0` disables).
    #[serde(default)]
    pub max_items: Option<i64>,
    /// Drop items published more than this many days ago (`<= 0` disables).
    #[serde(default)]
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AlertingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub failure_streak_threshold: i64,
    #[serde(default = "default_threshold")]
    pub zero_new_streak_threshold: i64,
}

impl Default for AlertingSettings {
    fn default() -> Self {
        AlertingSettings {
            enabled: true,
            failure_streak_threshold: default_threshold(),
            zero_new_streak_threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Catalog {
    #[serde(default)]
    sources: Vec<SourceDefinition>,
}

/// Per-source adjustments from the overlay file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SourceOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Overlay {
    #[serde(default)]
    settings: Option<Settings>,
    #[serde(default)]
    sources: HashMap<String, SourceOverride>,
}

/// Everything a run needs to know, loaded once and never mutated.
#[derive(Debug, Clone, Default)]
pub struct CrawlConfig {
    pub settings: Settings,
    /// Sources in catalog order, overlay already applied.
    pub sources: Vec<SourceDefinition>,
}

impl CrawlConfig {
    pub fn new(settings: Settings, sources: Vec<SourceDefinition>) -> Self {
        CrawlConfig { settings, sources }
    }

    /// Load the catalog and, if the file exists, the overlay.
    #[instrument(level = "info", skip_all, fields(catalog = %catalog_path.display()))]
    pub fn load(catalog_path: &Path, overlay_path: Option<&Path>) -> Result<Self, CrawlError> {
        let catalog_text = fs::read_to_string(catalog_path)?;
        let overlay_text = match overlay_path {
            Some(p) if p.exists() => Some(fs::read_to_string(p)?),
            Some(p) => {
                info!(path = %p.display(), "No overlay file; using catalog defaults");
                None
            }
            None => None,
        };
        let config = Self::from_yaml(&catalog_text, overlay_text.as_deref())?;
        info!(
            sources = config.sources.len(),
            enabled = config.sources.iter().filter(|s| s.enabled).count(),
            "Loaded source catalog"
        );
        Ok(config)
    }

    pub fn from_yaml(catalog: &str, overlay: Option<&str>) -> Result<Self, CrawlError> {
        let catalog: Catalog = serde_yaml::from_str(catalog)?;
        let overlay: Overlay = match overlay {
            Some(text) if !text.trim().is_empty() => serde_yaml::from_str(text)?,
            _ => Overlay::default(),
        };

        let known: Vec<&str> = catalog.sources.iter().map(|s| s.id.as_str()).collect();
        for id in overlay.sources.keys() {
            if !known.contains(&id.as_str()) {
                warn!(source = %id, "Overlay entry does not match any catalog source");
            }
        }

        let sources = catalog
            .sources
            .into_iter()
            .map(|s| match overlay.sources.get(&s.id) {
                Some(o) => apply_override(s, o),
                None => s,
            })
            .collect();

        Ok(Self::new(overlay.settings.unwrap_or_default(), sources))
    }
}

/// Overlay semantics: `enabled` and `notes` replace when present; `config` is a
/// shallow merge where overlay keys win.
pub fn apply_override(mut source: SourceDefinition, o: &SourceOverride) -> SourceDefinition {
    if let Some(enabled) = o.enabled {
        source.enabled = enabled;
    }
    for (k, v) in &o.config {
        source.config.insert(k.clone(), v.clone());
    }
    if o.notes.is_some() {
        source.notes = o.notes.clone();
    }
    source
}

/// Where source secrets come from.
pub trait SecretStore {
    /// The secret's value when it is set and non-empty.
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretStore for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed secrets, for tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets(pub std::collections::BTreeMap<String, String>);

#[cfg(test)]
impl StaticSecrets {
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
impl SecretStore for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.is_empty()).cloned()
    }
}
