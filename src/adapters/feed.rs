//! Syndication feed adapter (`type: rss`).
//!
//! Handles RSS 2.0 (`<rss><channel><item>`), RSS 1.0 (`<rdf:RDF><item>`) and
//! Atom (`<feed><entry>`) with a single serde model: the root element's name is
//! never checked, so whichever children are present get picked up.
//!
//! # Field Mapping
//!
//! | RawItem | RSS | Atom |
//! |---------|-----|------|
//! | `title` | `title` | `title` |
//! | `url` | `link`, else `guid` | `link[@href]` (alternate first), else `id` |
//! | `published_at` | `pubDate`, else `date` | `published`, else `updated` |
//! | `summary` | `description` | `summary`, else `content` |
//! | `keywords` | `category` text | `category[@term]` |

use super::{AdapterContext, SourceAdapter};
use crate::error::CrawlError;
use crate::models::{RawItem, SourceDefinition};
use async_trait::async_trait;
use itertools::Itertools;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize, Default)]
struct FeedDocument {
    #[serde(default)]
    channel: Option<Channel>,
    /// RSS 1.0 puts items next to the channel.
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize, Default)]
struct RssItem {
    #[serde(default)]
    title: Option<Text>,
    #[serde(default)]
    link: Option<Text>,
    #[serde(default)]
    guid: Option<Text>,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<Text>,
    /// `dc:date` in RSS 1.0 feeds.
    #[serde(default)]
    date: Option<Text>,
    #[serde(default)]
    description: Option<Text>,
    #[serde(rename = "category", default)]
    categories: Vec<Text>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomEntry {
    #[serde(default)]
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    #[serde(default)]
    id: Option<Text>,
    #[serde(default)]
    published: Option<Text>,
    #[serde(default)]
    updated: Option<Text>,
    #[serde(default)]
    summary: Option<Text>,
    #[serde(default)]
    content: Option<Text>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomCategory {
    #[serde(rename = "@term", default)]
    term: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: Option<String>,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

/// Element text, tolerating attributes such as `<guid isPermaLink="false">`.
#[derive(Debug, Deserialize, Default)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

fn text(t: &Option<Text>) -> Option<String> {
    t.as_ref()
        .and_then(|t| t.value.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Trimmed, non-empty, first occurrence wins.
fn keywords<'a>(terms: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    terms
        .flatten()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}

/// Named HTML entities that feeds emit but XML does not define.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Parse one feed document into raw items.
///
/// A document that cannot be parsed yields no items; the source still counts
/// as fetched successfully.
pub fn parse_feed(xml: &str, source: &SourceDefinition) -> Vec<RawItem> {
    let cleaned = scrub_html_entities_for_xml(xml);
    let doc: FeedDocument = match from_str(&cleaned) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(source = %source.id, error = %e, "Feed document did not parse; no items");
            return Vec::new();
        }
    };

    let rss_items = doc
        .channel
        .map(|c| c.items)
        .unwrap_or_default()
        .into_iter()
        .chain(doc.items);

    let mut out: Vec<RawItem> = rss_items
        .map(|it| RawItem {
            title: text(&it.title),
            url: text(&it.link).or_else(|| text(&it.guid)),
            published_at: text(&it.pub_date).or_else(|| text(&it.date)),
            summary: text(&it.description),
            keywords: keywords(it.categories.iter().map(|c| c.value.as_deref())),
            ..RawItem::for_source(source)
        })
        .collect();

    out.extend(doc.entries.into_iter().map(|e| {
        let href = e
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| e.links.first())
            .and_then(|l| l.href.clone())
            .filter(|h| !h.trim().is_empty());
        RawItem {
            title: text(&e.title),
            url: href.or_else(|| text(&e.id)),
            published_at: text(&e.published).or_else(|| text(&e.updated)),
            summary: text(&e.summary).or_else(|| text(&e.content)),
            keywords: keywords(e.categories.iter().map(|c| c.term.as_deref())),
            ..RawItem::for_source(source)
        }
    }));

    debug!(source = %source.id, count = out.len(), "Parsed feed document");
    out
}

/// Fetches every URL in `feed_urls` and concatenates their items.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedAdapter;

#[async_trait(?Send)]
impl SourceAdapter for FeedAdapter {
    fn type_tag(&self) -> &str {
        "rss"
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn fetch_items(
        &self,
        source: &SourceDefinition,
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<RawItem>, CrawlError> {
        let feed_urls = source.config_str_list("feed_urls");
        if feed_urls.is_empty() {
            warn!("RSS source missing feed_urls");
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for url in &feed_urls {
            let body = ctx.fetcher.text(&ctx.request(url)).await?;
            let parsed = parse_feed(&body, source);
            info!(%url, count = parsed.len(), "Indexed feed entries");
            items.extend(parsed);
        }
        Ok(items)
    }
}
