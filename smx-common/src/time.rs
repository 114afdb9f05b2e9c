//! Timestamp utilities shared by the ledger writer and the aggregator

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse an ISO-8601 timestamp, tolerating a trailing `Z`.
///
/// The `Z` suffix is normalized to `+00:00` before parsing; values with a
/// non-UTC offset are converted to UTC. Returns `None` on malformed input.
pub fn parse_iso_utc(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if let Some(stripped) = trimmed.strip_suffix('Z') {
        format!("{stripped}+00:00")
    } else {
        trimmed.to_string()
    };

    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// ISO-8601 rendering used inside ledger metadata (`+00:00` offset).
pub fn format_iso_utc(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Compact UTC stamp used in artifact filenames: `YYYYMMDDTHHMMSSZ`.
pub fn format_compact_utc(value: DateTime<Utc>) -> String {
    value.format("%Y%m%dT%H%M%SZ").to_string()
}
