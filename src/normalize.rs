//! Turning adapter output into dataset records.
//!
//! - [`canonical_url`]: the URL form used for identity
//! - [`item_id`]: SHA-256 of `"<source_id>:<canonical_url>"`
//! - [`resolve_published_at`]: timezone hints, strict formats, fallbacks
//! - [`normalize`]: all of the above for one [`RawItem`]

use crate::models::{NewsItem, RawItem, SourceDefinition};
use crate::timestamps::{Zone, parse_permissive, parse_strict, to_iso};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::form_urlencoded;

/// Query keys dropped from canonical URLs (besides any `utm_*`).
const TRACKING_PARAMS: &[&str] = &[
    "spm", "from", "ref", "ref_src", "fbclid", "gclid", "igshid", "mc_cid", "mc_eid",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// A URL split into its components exactly as written. Nothing is decoded,
/// re-encoded or resolved.
#[derive(Debug, PartialEq, Eq)]
struct UrlParts<'a> {
    scheme: Option<&'a str>,
    authority: Option<&'a str>,
    path: &'a str,
    query: Option<&'a str>,
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl<'a> UrlParts<'a> {
    fn split(raw: &'a str) -> Self {
        let without_fragment = raw.split_once('#').map_or(raw, |(before, _)| before);
        let (rest, query) = match without_fragment.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (without_fragment, None),
        };
        let (scheme, rest) = match rest.split_once(':') {
            Some((scheme, after)) if is_scheme(scheme) => (Some(scheme), after),
            _ => (None, rest),
        };
        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find('/').unwrap_or(after.len());
                (Some(&after[..end]), &after[end..])
            }
            None => (None, rest),
        };
        UrlParts {
            scheme,
            authority,
            path,
            query,
        }
    }
}

/// Normalize a URL for identity comparison.
///
/// Strings with neither a scheme nor a host come back trimmed and otherwise
/// untouched. Everything else gets a lowercase scheme (`https` when the URL
/// is protocol-relative) and host, loses its fragment, one trailing slash and
/// any tracking parameters; remaining query parameters keep their order. The
/// path, port and user info are kept as written.
///
/// ```ignore
/// assert_eq!(
///     canonical_url("HTTP://Example.com/a/b/?utm_source=x&y=2#frag"),
///     "http://example.com/a/b?y=2"
/// );
/// ```
pub fn canonical_url(url: &str) -> String {
    let raw = url.trim();
    let parts = UrlParts::split(raw);
    if parts.scheme.is_none() && parts.authority.is_none_or(str::is_empty) {
        return raw.to_string();
    }

    let mut out = parts
        .scheme
        .map_or_else(|| "https".to_string(), str::to_ascii_lowercase);
    out.push(':');
    if let Some(authority) = parts.authority {
        out.push_str("//");
        let (userinfo, host) = match authority.rsplit_once('@') {
            Some((userinfo, host)) => (Some(userinfo), host),
            None => (None, authority),
        };
        if let Some(userinfo) = userinfo {
            out.push_str(userinfo);
            out.push('@');
        }
        out.push_str(&host.to_lowercase());
    }

    let path = match parts.path {
        "" => "/",
        p => p,
    };
    out.push_str(path.strip_suffix('/').unwrap_or(path));

    if let Some(query) = parts.query {
        let kept: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if !kept.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept)
                .finish();
            out.push('?');
            out.push_str(&query);
        }
    }
    out
}

/// Content-addressed record id: lowercase hex SHA-256 of `"<source_id>:<canonical_url>"`.
pub fn item_id(source_id: &str, canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Zone for naive timestamps: `published_timezone`, else Shanghai for `region: CN`.
fn source_zone(source: &SourceDefinition) -> Zone {
    match source.config_str("published_timezone") {
        Some(name) => Zone::resolve(name),
        None if source.config_str("region") == Some("CN") => Zone::resolve("Asia/Shanghai"),
        None => Zone::Utc,
    }
}

/// Resolve a raw publication time to the dataset's UTC rendering.
///
/// A blank value means "now". A value that does not parse (or names a local
/// time skipped by DST) falls back to `now` as well, which is also the
/// record's `fetched_at`.
pub fn resolve_published_at(
    raw: Option<&str>,
    source: &SourceDefinition,
    now: DateTime<Utc>,
) -> String {
    let Some(text) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return to_iso(now);
    };

    let parsed = match source.config_str("published_format") {
        Some(format) => parse_strict(text, format),
        None => parse_permissive(text),
    };
    match parsed.and_then(|p| p.to_utc(source_zone(source))) {
        Some(dt) => to_iso(dt),
        None => {
            debug!(source = %source.id, value = %text, "Unparseable published_at; using fetch time");
            to_iso(now)
        }
    }
}

/// Build a dataset record, or `None` when the title or url is blank.
pub fn normalize(raw: &RawItem, source: &SourceDefinition, now: DateTime<Utc>) -> Option<NewsItem> {
    let title = raw.title.as_deref().map(str::trim).unwrap_or_default();
    let url = raw.url.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() || url.is_empty() {
        return None;
    }

    let canonical = canonical_url(url);
    Some(NewsItem {
        id: item_id(&source.id, &canonical),
        source_id: source.id.clone(),
        source_name: source.name.clone(),
        title: title.to_string(),
        url: url.to_string(),
        canonical_url: canonical,
        published_at: resolve_published_at(raw.published_at.as_deref(), source, now),
        fetched_at: to_iso(now),
        summary: raw.summary.clone(),
        keywords: raw.keywords.clone(),
        content_type: raw.content_type.clone(),
        language: raw.language.clone(),
        region: raw.region.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn source(config: serde_json::Value) -> SourceDefinition {
        serde_json::from_value(json!({
            "id": "csrc",
            "name": "China Securities Regulatory Commission",
            "type": "html",
            "config": config,
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn canonical_url_reference_example() {
        assert_eq!(
            canonical_url("HTTP://Example.com/a/b/?utm_source=x&y=2#frag"),
            "http://example.com/a/b?y=2"
        );
    }

    #[test]
    fn canonical_url_strips_tracking_params_case_insensitively() {
        assert_eq!(
            canonical_url("https://news.example.com/p?id=1&UTM_Medium=mail&FBCLID=abc&from=timeline&page=2"),
            "https://news.example.com/p?id=1&page=2"
        );
        assert_eq!(canonical_url("https://x.test/p?ref=home"), "https://x.test/p");
        // keys that merely contain a tracking word are kept
        assert_eq!(canonical_url("https://x.test/p?referrer=a"), "https://x.test/p?referrer=a");
    }

    #[test]
    fn canonical_url_paths() {
        assert_eq!(canonical_url("https://Example.com"), "https://example.com");
        assert_eq!(canonical_url("https://example.com/"), "https://example.com");
        assert_eq!(canonical_url("https://example.com/a//"), "https://example.com/a/");
        assert_eq!(canonical_url("https://example.com:8443/a/"), "https://example.com:8443/a");
    }

    #[test]
    fn canonical_url_keeps_path_and_host_text_as_written() {
        assert_eq!(
            canonical_url("https://WWW.Gov.cn/zhengce/政策/a.html/"),
            "https://www.gov.cn/zhengce/政策/a.html"
        );
        assert_eq!(canonical_url("https://例子.测试/新闻"), "https://例子.测试/新闻");
        assert_eq!(canonical_url("https://example.com:443/a/"), "https://example.com:443/a");
        assert_eq!(canonical_url("https://example.com/a/../b/./c"), "https://example.com/a/../b/./c");
        assert_eq!(canonical_url("https://example.com/a%20b"), "https://example.com/a%20b");
        assert_eq!(canonical_url("https://User:Pw@Example.com/"), "https://User:Pw@example.com");
    }

    #[test]
    fn canonical_url_protocol_relative_defaults_to_https() {
        assert_eq!(canonical_url("//Example.com/a/"), "https://example.com/a");
        assert_eq!(canonical_url("//example.com/a?utm_medium=x&b=1"), "https://example.com/a?b=1");
    }

    #[test]
    fn canonical_url_query_edge_cases() {
        assert_eq!(canonical_url("https://x.test/p?"), "https://x.test/p");
        assert_eq!(canonical_url("https://x.test/p?a&b=&utm_x=1"), "https://x.test/p?a=&b=");
        assert_eq!(canonical_url("https://x.test/p?q=a+b"), "https://x.test/p?q=a+b");
        assert_eq!(canonical_url("https://x.test/p#section?x=1"), "https://x.test/p");
    }

    #[test]
    fn canonical_url_leaves_relative_strings_alone() {
        assert_eq!(canonical_url("  /news/2024/05/01.html "), "/news/2024/05/01.html");
        assert_eq!(canonical_url("example.com/Path/"), "example.com/Path/");
        assert_eq!(canonical_url("?page=2"), "?page=2");
        assert_eq!(canonical_url(""), "");
    }

    #[test]
    fn canonical_url_is_idempotent() {
        let once = canonical_url("HTTPS://WWW.Example.com/Path/?b=2&a=1&gclid=z#top");
        assert_eq!(once, "https://www.example.com/Path?b=2&a=1");
        assert_eq!(canonical_url(&once), once);
    }

    #[test]
    fn item_id_is_stable_sha256_hex() {
        let a = item_id("fed", "https://example.com/a");
        let b = item_id("fed", "https://example.com/a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, item_id("ecb", "https://example.com/a"));
        assert_eq!(
            item_id("a", "b"),
            "6783a31eabf68ccc0660f935c0826282bdd2241f3a80a9f2d10d59aea9ebb5d8"
        );
    }

    #[test]
    fn cn_region_defaults_to_shanghai() {
        let src = source(json!({"region": "CN"}));
        assert_eq!(
            resolve_published_at(Some("2024-05-01 08:00:00"), &src, now()),
            "2024-05-01T00:00:00+00:00"
        );
        // explicit offsets are respected
        assert_eq!(
            resolve_published_at(Some("2024-05-01T08:00:00Z"), &src, now()),
            "2024-05-01T08:00:00+00:00"
        );
    }

    #[test]
    fn explicit_timezone_beats_region() {
        let src = source(json!({"region": "CN", "published_timezone": "Europe/London"}));
        assert_eq!(
            resolve_published_at(Some("2024-01-15 09:00"), &src, now()),
            "2024-01-15T09:00:00+00:00"
        );
    }

    #[test]
    fn strict_format_and_fallbacks() {
        let src = source(json!({"published_format": "%Y年%m月%d日", "region": "CN"}));
        assert_eq!(
            resolve_published_at(Some("2024年04月30日"), &src, now()),
            "2024-04-29T16:00:00+00:00"
        );
        // the permissive parser would accept this, but the strict format does not
        assert_eq!(resolve_published_at(Some("2024-04-30"), &src, now()), to_iso(now()));
        assert_eq!(resolve_published_at(None, &src, now()), to_iso(now()));
        assert_eq!(resolve_published_at(Some("   "), &src, now()), to_iso(now()));
    }

    #[test]
    fn normalize_rejects_blank_title_or_url() {
        let src = source(json!({}));
        let raw = RawItem {
            title: Some("  ".into()),
            url: Some("https://x.test/a".into()),
            ..RawItem::default()
        };
        assert!(normalize(&raw, &src, now()).is_none());
        let raw = RawItem {
            title: Some("Title".into()),
            url: None,
            ..RawItem::default()
        };
        assert!(normalize(&raw, &src, now()).is_none());
    }

    #[test]
    fn normalize_builds_full_record() {
        let src = source(json!({}));
        let raw = RawItem {
            title: Some("  New rules on margin financing ".into()),
            url: Some(" https://www.csrc.gov.cn/csrc/c100028/c7475.shtml?spm=a.b ".into()),
            published_at: Some("2024-05-01T09:30:00+08:00".into()),
            summary: Some("summary".into()),
            keywords: vec!["margin".into()],
            content_type: Some("news".into()),
            language: Some("zh".into()),
            region: Some("CN".into()),
        };
        let item = normalize(&raw, &src, now()).unwrap();
        assert_eq!(item.title, "New rules on margin financing");
        assert_eq!(item.url, "https://www.csrc.gov.cn/csrc/c100028/c7475.shtml?spm=a.b");
        assert_eq!(item.canonical_url, "https://www.csrc.gov.cn/csrc/c100028/c7475.shtml");
        assert_eq!(item.id, item_id("csrc", &item.canonical_url));
        assert_eq!(item.published_at, "2024-05-01T01:30:00+00:00");
        assert_eq!(item.fetched_at, "2024-05-02T12:00:00+00:00");
        assert_eq!(item.source_name, "China Securities Regulatory Commission");
        assert_eq!(item.keywords, vec!["margin".to_string()]);
    }

    #[test]
    fn same_canonical_url_same_id() {
        let src = source(json!({}));
        let a = RawItem {
            title: Some("A".into()),
            url: Some("https://x.test/a/?utm_campaign=z".into()),
            ..RawItem::default()
        };
        let b = RawItem {
            title: Some("A (updated)".into()),
            url: Some("HTTPS://X.TEST/a#section".into()),
            ..RawItem::default()
        };
        assert_eq!(
            normalize(&a, &src, now()).unwrap().id,
            normalize(&b, &src, now()).unwrap().id
        );
    }
}
