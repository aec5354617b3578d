//! Timestamp parsing and the dataset's canonical UTC rendering.
//!
//! Every timestamp written by the crawler goes through [`to_iso`], so string
//! comparison of two stored values orders them chronologically.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use tracing::warn;

/// RFC 3339, second precision, `+00:00` suffix.
pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn now_iso() -> String {
    to_iso(Utc::now())
}

/// A parsed value, with or without its own offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl Parsed {
    /// Interpret naive values in `zone`. `None` for local times skipped by a DST jump.
    pub fn to_utc(self, zone: Zone) -> Option<DateTime<Utc>> {
        match self {
            Parsed::Aware(dt) => Some(dt.with_timezone(&Utc)),
            Parsed::Naive(naive) => match zone {
                Zone::Utc => Some(Utc.from_utc_datetime(&naive)),
                Zone::Named(tz) => tz
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc)),
            },
        }
    }
}

/// Zone used for values that carry no offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Utc,
    Named(Tz),
}

impl Zone {
    /// Resolve an IANA name. `UTC`/`Z` and unknown names (with a warning) mean UTC.
    pub fn resolve(name: &str) -> Zone {
        let name = name.trim();
        if name.eq_ignore_ascii_case("utc") || name.eq_ignore_ascii_case("z") {
            return Zone::Utc;
        }
        match name.parse::<Tz>() {
            Ok(tz) => Zone::Named(tz),
            Err(_) => {
                warn!(zone = %name, "Unknown timezone, falling back to UTC");
                Zone::Utc
            }
        }
    }
}

const AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
    "%a, %d %b %Y %H:%M %z",
    "%a %b %d %H:%M:%S %z %Y",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
    "%Y年%m月%d日 %H:%M:%S",
    "%Y年%m月%d日 %H:%M",
    "%Y年%m月%d日%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M %p",
    "%B %d, %Y %H:%M",
    "%b %d, %Y %H:%M",
    "%d %B %Y %H:%M",
    "%d %b %Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%Y年%m月%d日",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%b. %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %B %d, %Y",
];

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Best-effort parse of the layouts found across feeds, pages and APIs.
pub fn parse_permissive(text: &str) -> Option<Parsed> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Parsed::Aware(dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(Parsed::Aware(dt));
    }
    // `2024-05-01T08:30:00Z` with fractional digits rfc3339 rejected, or a
    // bare trailing `Z`/`UTC` on a naive layout.
    let (body, utc_suffix) = match text
        .strip_suffix('Z')
        .or_else(|| text.strip_suffix(" UTC"))
        .or_else(|| text.strip_suffix(" GMT"))
    {
        Some(rest) => (rest.trim_end(), true),
        None => (text, false),
    };

    if !utc_suffix {
        for fmt in AWARE_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(body, fmt) {
                return Some(Parsed::Aware(dt));
            }
        }
    }

    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(body, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(body, fmt).ok())
                .map(midnight)
        })?;

    Some(if utc_suffix {
        Parsed::Aware(Utc.from_utc_datetime(&naive).fixed_offset())
    } else {
        Parsed::Naive(naive)
    })
}

/// Parse with exactly one strftime-style format.
///
/// Formats with an offset directive produce aware values; date-only formats
/// mean midnight.
pub fn parse_strict(text: &str, format: &str) -> Option<Parsed> {
    let text = text.trim();
    if format.contains("%z") || format.contains("%:z") || format.contains("%#z") {
        return DateTime::parse_from_str(text, format).ok().map(Parsed::Aware);
    }
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| NaiveDate::parse_from_str(text, format).ok().map(midnight))
        .map(Parsed::Naive)
}
