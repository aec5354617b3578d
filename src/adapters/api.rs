//! Structured JSON API adapter (`type: api`).
//!
//! Calls `endpoint` once, walks to the item list with `items_path`, then maps
//! each object to a [`RawItem`] via `field_map` and optional templates.
//!
//! # Configuration
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `endpoint` | URL to GET (required) |
//! | `params` | Static query parameters |
//! | `auth_env` | Query parameter -> secret name; added when the secret is set |
//! | `items_path` | Dotted path to the array of items (payload root if absent) |
//! | `field_map` | `title`/`url`/`published_at`/`summary` -> dotted path in an item |
//! | `static_fields` | Defaults merged into every item before mapping |
//! | `base_url` | Relative urls are joined against it |
//! | `*_template` | `"{field}"` templates used when the mapped field is empty |
//!
//! # Example
//!
//! ```yaml
//! endpoint: https://api.stlouisfed.org/fred/releases/dates
//! params: {file_type: json, limit: 50}
//! auth_env: {api_key: FRED_API_KEY}
//! items_path: release_dates
//! title_template: "FRED release: {release_name}"
//! url_template: "https://fred.stlouisfed.org/releases/{release_id}"
//! field_map: {published_at: date}
//! ```

use super::{AdapterContext, SourceAdapter};
use crate::error::CrawlError;
use crate::models::{RawItem, SourceDefinition};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use url::Url;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").expect("placeholder regex is valid"));

/// Follow a dotted path (`data.items`) through nested objects.
pub fn extract_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(payload, |current, part| current.as_object()?.get(part))
}

/// Strings pass through; numbers and booleans are rendered; anything else is absent.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fill `{field}` placeholders from `record`. `{{` and `}}` are literal braces.
///
/// Returns `None` when any placeholder has no scalar value in the record.
pub fn render_template(template: &str, record: &Value) -> Option<String> {
    const OPEN: &str = "\u{0}open\u{0}";
    const CLOSE: &str = "\u{0}close\u{0}";
    let escaped = template.replace("{{", OPEN).replace("}}", CLOSE);

    let mut out = String::with_capacity(escaped.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(&escaped) {
        let whole = caps.get(0)?;
        let value = extract_path(record, &caps[1]).and_then(scalar_to_string)?;
        out.push_str(&escaped[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&escaped[last..]);
    Some(out.replace(OPEN, "{").replace(CLOSE, "}"))
}

/// Mapping rules for one API source.
#[derive(Debug, Default)]
struct FieldRules {
    field_map: Map<String, Value>,
    static_fields: Map<String, Value>,
    base_url: Option<Url>,
    title_template: Option<String>,
    url_template: Option<String>,
    published_at_template: Option<String>,
    summary_template: Option<String>,
}

impl FieldRules {
    fn from_source(source: &SourceDefinition) -> Self {
        let template = |key: &str| source.config_str(key).map(str::to_string);
        FieldRules {
            field_map: source.config_map("field_map"),
            static_fields: source.config_map("static_fields"),
            base_url: source.config_str("base_url").and_then(|b| Url::parse(b).ok()),
            title_template: template("title_template"),
            url_template: template("url_template"),
            published_at_template: template("published_at_template"),
            summary_template: template("summary_template"),
        }
    }

    /// Mapped field if non-empty, else the template rendering.
    fn field(&self, record: &Value, name: &str, template: Option<&String>) -> Option<String> {
        let path = self
            .field_map
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(name);
        extract_path(record, path)
            .and_then(scalar_to_string)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| template.and_then(|t| render_template(t, record)))
    }

    fn map_item(&self, raw: &Map<String, Value>, source: &SourceDefinition) -> RawItem {
        let mut merged = raw.clone();
        for (k, v) in &self.static_fields {
            merged.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let record = Value::Object(merged);

        let url = self
            .field(&record, "url", self.url_template.as_ref())
            .map(|u| match self.base_url.as_ref().and_then(|b| b.join(u.trim()).ok()) {
                Some(joined) => joined.to_string(),
                None => u,
            });

        RawItem {
            title: self.field(&record, "title", self.title_template.as_ref()),
            url,
            published_at: self.field(&record, "published_at", self.published_at_template.as_ref()),
            summary: self.field(&record, "summary", self.summary_template.as_ref()),
            ..RawItem::for_source(source)
        }
    }
}

/// Map a decoded payload to raw items.
///
/// Non-object entries in the item list are skipped; a payload without a list
/// at `items_path` yields nothing.
pub fn extract_items(payload: &Value, source: &SourceDefinition) -> Vec<RawItem> {
    let list = match source.config_str("items_path") {
        Some(path) => extract_path(payload, path),
        None => Some(payload),
    };
    let Some(entries) = list.and_then(Value::as_array) else {
        warn!(source = %source.id, "API returned unexpected payload");
        return Vec::new();
    };

    let rules = FieldRules::from_source(source);
    entries
        .iter()
        .filter_map(Value::as_object)
        .map(|raw| rules.map_item(raw, source))
        .collect()
}

/// Query parameters: static `params` plus any `auth_env` secrets that are set.
fn query_params(source: &SourceDefinition, ctx: &AdapterContext<'_>) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = source
        .config_map("params")
        .iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
        .collect();
    for (param, env_key) in source.config_map("auth_env") {
        let Some(value) = env_key.as_str().and_then(|k| ctx.secrets.get(k)) else {
            continue;
        };
        match params.iter_mut().find(|(k, _)| *k == param) {
            Some(existing) => existing.1 = value,
            None => params.push((param, value)),
        }
    }
    params
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApiAdapter;

#[async_trait(?Send)]
impl SourceAdapter for ApiAdapter {
    fn type_tag(&self) -> &str {
        "api"
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn fetch_items(
        &self,
        source: &SourceDefinition,
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<RawItem>, CrawlError> {
        let Some(endpoint) = source.config_str("endpoint") else {
            warn!("API source missing endpoint");
            return Ok(Vec::new());
        };

        let request = ctx.request(endpoint).query(query_params(source, ctx));
        let payload = ctx.fetcher.json(&request).await?;
        let items = extract_items(&payload, source);
        info!(%endpoint, count = items.len(), "Extracted API items");
        Ok(items)
    }
}
