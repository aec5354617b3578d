//! Error types shared across the crawler.
//!
//! [`CrawlError`] covers everything a run can hit. Source-scoped variants
//! ([`CrawlError::Fetch`], [`CrawlError::MissingSecret`],
//! [`CrawlError::UnknownAdapter`], [`CrawlError::SourceConfig`]) are caught by
//! the pipeline and turned into per-source state; the I/O and decoding
//! variants surface to `main` when they concern the dataset or index files.

use thiserror::Error;

/// Boxed error produced by a transport or decoder inside the fetch layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CrawlError {
    /// Every retry attempt for a URL failed.
    #[error("failed to fetch {url} after {attempts} attempt(s): {source}")]
    Fetch {
        url: String,
        attempts: u32,
        source: BoxError,
    },

    #[error("Missing env: {}", .0.join(", "))]
    MissingSecret(Vec<String>),

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    /// Adapter configuration that cannot be used as written (bad selector, bad URL).
    #[error("invalid configuration for source {source_id}: {message}")]
    SourceConfig { source_id: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CrawlError {
    pub fn source_config(source_id: &str, message: impl Into<String>) -> Self {
        CrawlError::SourceConfig {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }
}
