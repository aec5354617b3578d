//! HTML listing-page adapter (`type: html`).
//!
//! Scrapes one or more listing pages with CSS selectors. Each element
//! matching `item_selector` is a row; within a row, `title_selector` gives the
//! headline text and `url_selector` the link whose `href` is resolved against
//! `base_url` (or the listing URL itself).
//!
//! Optional config:
//! - `published_selector`: element holding the publication time
//! - `published_attr`: read the time from this attribute (e.g. `datetime`)
//!   instead of the element text
//! - `base_url`: base for resolving relative links

use super::{AdapterContext, SourceAdapter};
use crate::error::CrawlError;
use crate::models::{RawItem, SourceDefinition};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Compiled selectors for one source.
#[derive(Debug)]
pub struct PageSelectors {
    item: Selector,
    title: Selector,
    url: Selector,
    published: Option<Selector>,
    published_attr: Option<String>,
}

impl PageSelectors {
    /// `Ok(None)` when a mandatory selector is not configured.
    pub fn from_source(source: &SourceDefinition) -> Result<Option<Self>, CrawlError> {
        let (Some(item), Some(title), Some(url)) = (
            source.config_str("item_selector"),
            source.config_str("title_selector"),
            source.config_str("url_selector"),
        ) else {
            return Ok(None);
        };

        let compile = |css: &str| {
            Selector::parse(css).map_err(|e| {
                CrawlError::source_config(&source.id, format!("bad selector {css:?}: {e:?}"))
            })
        };

        Ok(Some(PageSelectors {
            item: compile(item)?,
            title: compile(title)?,
            url: compile(url)?,
            published: source
                .config_str("published_selector")
                .map(compile)
                .transpose()?,
            published_attr: source.config_str("published_attr").map(str::to_string),
        }))
    }
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    let joined = el.text().collect::<Vec<_>>().join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Extract rows from one listing page.
///
/// Rows missing a title or link element are skipped silently.
pub fn parse_page(
    html: &str,
    selectors: &PageSelectors,
    base: Option<&Url>,
    source: &SourceDefinition,
) -> Vec<RawItem> {
    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for row in document.select(&selectors.item) {
        let (Some(title_el), Some(url_el)) = (
            row.select(&selectors.title).next(),
            row.select(&selectors.url).next(),
        ) else {
            continue;
        };

        let url = url_el
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|href| match base.and_then(|b| b.join(href).ok()) {
                Some(resolved) => resolved.to_string(),
                None => href.to_string(),
            });

        let published_at = selectors
            .published
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .and_then(|el| match &selectors.published_attr {
                Some(attr) => el.value().attr(attr).map(|v| v.trim().to_string()),
                None => element_text(el),
            })
            .filter(|s| !s.is_empty());

        items.push(RawItem {
            title: element_text(title_el),
            url,
            published_at,
            ..RawItem::for_source(source)
        });
    }

    debug!(source = %source.id, count = items.len(), "Parsed listing page");
    items
}

/// Scrapes every URL in `list_urls`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageAdapter;

#[async_trait(?Send)]
impl SourceAdapter for PageAdapter {
    fn type_tag(&self) -> &str {
        "html"
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn fetch_items(
        &self,
        source: &SourceDefinition,
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<RawItem>, CrawlError> {
        let list_urls = source.config_str_list("list_urls");
        let selectors = PageSelectors::from_source(source)?;
        let Some(selectors) = selectors.filter(|_| !list_urls.is_empty()) else {
            warn!("HTML source missing selector config");
            return Ok(Vec::new());
        };
        let configured_base = source.config_str("base_url").and_then(|b| Url::parse(b).ok());

        let mut items = Vec::new();
        for list_url in &list_urls {
            let html = ctx.fetcher.text(&ctx.request(list_url)).await?;
            let base = configured_base.clone().or_else(|| Url::parse(list_url).ok());
            let parsed = parse_page(&html, &selectors, base.as_ref(), source);
            info!(url = %list_url, count = parsed.len(), "Scraped listing page");
            items.extend(parsed);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(config: serde_json::Value) -> SourceDefinition {
        serde_json::from_value(json!({
            "id": "pboc",
            "name": "People's Bank of China",
            "type": "html",
            "config": config,
        }))
        .unwrap()
    }

    const LISTING: &str = r#"
<html><body>
  <ul class="news">
    <li class="row">
      <a class="title" href="/goutongjiaoliu/113456/113469/5330001/index.html">公开市场业务交易公告</a>
      <span class="date">2024-05-06</span>
      <time datetime="2024-05-06T09:15:00">May 6</time>
    </li>
    <li class="row">
      <a class="title" href="https://www.pbc.gov.cn/en/3688110/index.html">
        Monetary Policy   Report
      </a>
      <span class="date">2024-05-05</span>
    </li>
    <li class="row"><span class="date">2024-05-04</span></li>
  </ul>
</body></html>"#;

    fn config() -> serde_json::Value {
        json!({
            "list_urls": ["https://www.pbc.gov.cn/goutongjiaoliu/113456/113469/index.html"],
            "item_selector": "li.row",
            "title_selector": "a.title",
            "url_selector": "a.title",
            "published_selector": "span.date",
            "region": "CN",
            "language": "zh",
        })
    }

    #[test]
    fn extracts_rows_and_resolves_links() {
        let src = source(config());
        let selectors = PageSelectors::from_source(&src).unwrap().unwrap();
        let base = Url::parse("https://www.pbc.gov.cn/goutongjiaoliu/113456/113469/index.html").unwrap();
        let items = parse_page(LISTING, &selectors, Some(&base), &src);

        // third row has no link and is dropped
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("公开市场业务交易公告"));
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://www.pbc.gov.cn/goutongjiaoliu/113456/113469/5330001/index.html")
        );
        assert_eq!(items[0].published_at.as_deref(), Some("2024-05-06"));
        assert_eq!(items[0].region.as_deref(), Some("CN"));
        assert_eq!(items[1].title.as_deref(), Some("Monetary Policy Report"));
        assert_eq!(items[1].url.as_deref(), Some("https://www.pbc.gov.cn/en/3688110/index.html"));
    }

    #[test]
    fn published_attr_reads_attribute() {
        let mut cfg = config();
        cfg["published_selector"] = json!("time");
        cfg["published_attr"] = json!("datetime");
        let src = source(cfg);
        let selectors = PageSelectors::from_source(&src).unwrap().unwrap();
        let items = parse_page(LISTING, &selectors, None, &src);
        assert_eq!(items[0].published_at.as_deref(), Some("2024-05-06T09:15:00"));
        // row without a <time> element keeps a null timestamp
        assert!(items[1].published_at.is_none());
    }

    #[test]
    fn missing_selectors_is_not_an_error() {
        let src = source(json!({"list_urls": ["https://x.test"], "item_selector": "li"}));
        assert!(PageSelectors::from_source(&src).unwrap().is_none());
    }

    #[test]
    fn invalid_selector_is_a_config_error() {
        let mut cfg = config();
        cfg["item_selector"] = json!("li[[");
        let err = PageSelectors::from_source(&source(cfg)).unwrap_err();
        assert!(matches!(err, CrawlError::SourceConfig { .. }));
    }
}
