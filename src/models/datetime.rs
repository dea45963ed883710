//! Timestamp coercion for scraped date strings.
//!
//! Sources publish dates in every shape imaginable. Output timestamps must be
//! offset-aware, so naive values are localized to the sources' fixed zone.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};

/// Suffix used when a bare `YYYY-MM-DD` value cannot be parsed as a date.
const BARE_DATE_SUFFIX: &str = "T00:00:00+08:00";

/// Naive layouts accepted after RFC 3339 parsing fails.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset-bearing layouts that RFC 3339 parsing does not cover.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"];

/// Normalize a scraped timestamp string.
///
/// - Values containing both `T` and `+` are assumed normalized and returned as-is.
/// - ISO-like values are parsed (a trailing `Z` means UTC); naive results are
///   localized to `offset`.
/// - Unparseable 10-character hyphenated values become local midnight.
/// - Anything else is returned unchanged for the caller to flag later.
pub fn normalize_datetime(value: &str, offset: FixedOffset) -> String {
    if value.contains('T') && value.contains('+') {
        return value.to_string();
    }

    if let Some(parsed) = parse_iso(value.trim(), offset) {
        return parsed.to_rfc3339_opts(SecondsFormat::AutoSi, false);
    }

    if value.len() == 10 && value.contains('-') {
        return format!("{}{}", value, BARE_DATE_SUFFIX);
    }

    value.to_string()
}

/// Parse an ISO-8601-ish timestamp, localizing naive values to `offset`.
pub fn parse_iso(value: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let value = value.replace('Z', "+00:00");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt);
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&value, fmt) {
            return Some(dt);
        }
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    naive.and_local_timezone(offset).single()
}
