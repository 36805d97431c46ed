//! Audit timestamp parsing.
//!
//! The platform emits `eventDate` with anywhere from zero to nine fractional
//! digits and a trailing `Z`. The fraction is cut or padded to exactly six
//! digits before parsing, so `12.345Z` and `12.345678Z` land on the same
//! millisecond.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeDelta, Utc};

const FRACTION_DIGITS: usize = 6;

/// Parse a source `eventDate` into a UTC instant.
pub fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(body) = raw.strip_suffix(['Z', 'z']) {
        return parse_naive(body).map(|n| n.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // No zone marker at all: the platform only ever reports UTC
    parse_naive(raw).map(|n| n.and_utc())
}

fn parse_naive(body: &str) -> Option<NaiveDateTime> {
    let (base, fraction) = body.split_once('.').unwrap_or((body, ""));
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let micros: String = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(FRACTION_DIGITS)
        .collect();
    let micros: i64 = micros.parse().ok()?;

    let base = NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some(base + TimeDelta::microseconds(micros))
}

/// `05/01/2024 12:30` style used in the exported `EventDate` column.
pub fn format_display(ts: DateTime<Utc>) -> String {
    ts.format("%m/%d/%Y %H:%M").to_string()
}

/// RFC 3339 with six fractional digits, e.g. `2024-05-01T12:30:45.123000Z`.
pub fn format_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn millis(raw: &str) -> i64 {
        parse_event_timestamp(raw)
            .unwrap_or_else(|| panic!("{raw} should parse"))
            .timestamp_millis()
    }

    #[test]
    fn test_fraction_width_does_not_change_instant() {
        let expected = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 30, 12)
            .unwrap()
            .timestamp_millis()
            + 345;

        assert_eq!(millis("2024-05-01T12:30:12.345Z"), expected);
        assert_eq!(millis("2024-05-01T12:30:12.345678Z"), expected);
        assert_eq!(millis("2024-05-01T12:30:12.3450Z"), expected);
        assert_eq!(millis("2024-05-01T12:30:12.345678912Z"), expected);
    }

    #[test]
    fn test_short_and_missing_fractions() {
        let whole = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 12).unwrap();
        assert_eq!(parse_event_timestamp("2024-05-01T12:30:12Z"), Some(whole));
        assert_eq!(
            parse_event_timestamp("2024-05-01T12:30:12.5Z"),
            Some(whole + TimeDelta::milliseconds(500))
        );
        assert_eq!(parse_event_timestamp("2024-05-01T12:30:12"), Some(whole));
    }

    #[test]
    fn test_offset_timestamps_convert_to_utc() {
        let ts = parse_event_timestamp("2024-05-01T14:30:12.100+02:00").unwrap();
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 12).unwrap() + TimeDelta::milliseconds(100)
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(parse_event_timestamp(""), None);
        assert_eq!(parse_event_timestamp("yesterday"), None);
        assert_eq!(parse_event_timestamp("2024-05-01T12:30:12.12abZ"), None);
    }

    #[test]
    fn test_formats() {
        let ts = parse_event_timestamp("2024-05-01T09:05:07.1234Z").unwrap();
        assert_eq!(format_display(ts), "05/01/2024 09:05");
        assert_eq!(format_iso(ts), "2024-05-01T09:05:07.123400Z");
        assert_eq!(parse_event_timestamp(&format_iso(ts)), Some(ts));
    }
}
