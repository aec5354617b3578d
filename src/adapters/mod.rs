//! Source adapters that turn a [`SourceDefinition`] into raw items.
//!
//! Each adapter implements [`SourceAdapter`] and is registered in an
//! [`AdapterRegistry`] under its type tag. The pipeline looks the tag up once
//! per source and never branches on it.
//!
//! # Supported Types
//!
//! | Tag | Module | Method | Required config |
//! |-----|--------|--------|-----------------|
//! | `rss` | [`feed`] | RSS 2.0 / RSS 1.0 / Atom parsing | `feed_urls` |
//! | `html` | [`page`] | CSS selectors over listing pages | `list_urls`, `item_selector`, `title_selector`, `url_selector` |
//! | `api` | [`api`] | JSON traversal with dotted paths and templates | `endpoint` |
//!
//! # Contract
//!
//! - Network failures propagate as [`CrawlError::Fetch`]
//! - Rows that cannot be extracted are omitted; they never fail the source
//! - Fields that are missing or unparseable are left `None`

pub mod api;
pub mod feed;
pub mod page;

use crate::config::SecretStore;
use crate::error::CrawlError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::models::{RawItem, SourceDefinition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// What an adapter gets from the pipeline besides the source itself.
pub struct AdapterContext<'a> {
    /// User agent after any per-source `*_USER_AGENT` secret override.
    pub user_agent: &'a str,
    /// Shared retrying fetcher; carries the timeout and retry settings.
    pub fetcher: &'a Fetcher,
    pub secrets: &'a dyn SecretStore,
}

impl AdapterContext<'_> {
    /// A GET request with the effective user agent applied.
    pub fn request(&self, url: &str) -> FetchRequest {
        FetchRequest::get(url).header("User-Agent", self.user_agent)
    }
}

impl fmt::Debug for AdapterContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterContext")
            .field("user_agent", &self.user_agent)
            .field("fetcher", self.fetcher)
            .finish()
    }
}

/// Produces raw items for one kind of source.
#[async_trait(?Send)]
pub trait SourceAdapter {
    /// The catalog `type` this adapter handles.
    fn type_tag(&self) -> &str;

    async fn fetch_items(
        &self,
        source: &SourceDefinition,
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<RawItem>, CrawlError>;
}

/// Type tag -> adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `rss`, `html` and `api` adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(feed::FeedAdapter));
        registry.register(Box::new(page::PageAdapter));
        registry.register(Box::new(api::ApiAdapter));
        registry
    }

    /// Registers an adapter under its tag, replacing any previous one.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.insert(adapter.type_tag().to_string(), adapter);
    }

    pub fn get(&self, tag: &str) -> Option<&dyn SourceAdapter> {
        self.adapters.get(tag).map(|a| a.as_ref())
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.adapters.keys().collect();
        tags.sort();
        f.debug_struct("AdapterRegistry").field("tags", &tags).finish()
    }
}
