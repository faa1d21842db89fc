//! Timestamp formatting for store persistence.
//!
//! Both store backends persist timestamps as RFC 3339 UTC text with
//! fixed microsecond precision and a `Z` suffix. The fixed width keeps
//! lexicographic ordering identical to chronological ordering, which
//! the watermark predicate relies on.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp for storage.
#[must_use]
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into UTC.
///
/// # Errors
///
/// Returns a parse error if `raw` is not valid RFC 3339.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}
