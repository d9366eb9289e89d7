// crates/cstp-core/src/core/time.rs
// ============================================================================
// Module: CSTP Time Model
// Description: Wall-clock timestamp parsing, formatting, and day arithmetic.
// Purpose: Provide deterministic, injectable time handling for decision records.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Decision records carry RFC 3339 wall-clock timestamps; circuit-breaker
//! arithmetic lives elsewhere on monotonic time. Engines that depend on the
//! current moment accept it as an explicit parameter so tests can pin it.
//! Stored dates appear either as full RFC 3339 datetimes or bare
//! `YYYY-MM-DD` dates; both parse here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use time::Date;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Formatting
// ============================================================================

/// Formats a timestamp as RFC 3339.
///
/// Falls back to the Unix-seconds rendering when formatting fails, which
/// cannot happen for in-range values.
#[must_use]
pub fn format_rfc3339(moment: OffsetDateTime) -> String {
    moment
        .format(&Rfc3339)
        .unwrap_or_else(|_| moment.unix_timestamp().to_string())
}

/// Formats the date component as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(moment: OffsetDateTime) -> String {
    let date = moment.date();
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses a stored timestamp string into a datetime.
///
/// Accepts full RFC 3339 datetimes and bare `YYYY-MM-DD` dates; bare dates
/// are interpreted as midnight UTC. Returns `None` for anything else.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    if value.len() >= 10 && value.as_bytes().get(10) == Some(&b'T') {
        return OffsetDateTime::parse(value, &Rfc3339)
            .ok()
            .or_else(|| parse_date_prefix(value));
    }
    parse_date_prefix(value)
}

/// Parses the leading `YYYY-MM-DD` of a value as midnight UTC.
fn parse_date_prefix(value: &str) -> Option<OffsetDateTime> {
    let prefix = value.get(..10)?;
    let mut parts = prefix.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    let date = Date::from_calendar_date(year, time::Month::try_from(month).ok()?, day).ok()?;
    Some(date.midnight().assume_utc())
}

// ============================================================================
// SECTION: Age Arithmetic
// ============================================================================

/// Whole days elapsed between a stored timestamp and `now`.
///
/// Returns `None` when the stored value does not parse.
#[must_use]
pub fn age_days(stored: &str, now: OffsetDateTime) -> Option<i64> {
    let then = parse_timestamp(stored)?;
    Some((now - then).whole_days())
}

/// Resolves a relative review interval (`7d`, `2w`, `1m`) to a date string.
///
/// Months are approximated as 30 days, matching the recorded convention.
/// Returns `None` for malformed intervals.
#[must_use]
pub fn resolve_review_interval(interval: &str, now: OffsetDateTime) -> Option<String> {
    let trimmed = interval.trim();
    if trimmed.len() < 2 {
        return None;
    }
    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);
    let value: i64 = digits.parse().ok()?;
    let days = match unit {
        "d" | "D" => value,
        "w" | "W" => value * 7,
        "m" | "M" => value * 30,
        _ => return None,
    };
    Some(format_date(now + Duration::days(days)))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::age_days;
    use super::format_date;
    use super::parse_timestamp;
    use super::resolve_review_interval;

    #[test]
    fn parses_full_and_bare_dates() {
        let full = parse_timestamp("2026-02-15T10:30:00Z");
        assert_eq!(full, Some(datetime!(2026-02-15 10:30:00 UTC)));

        let bare = parse_timestamp("2026-02-15");
        assert_eq!(bare, Some(datetime!(2026-02-15 00:00:00 UTC)));

        assert_eq!(parse_timestamp("soon"), None);
    }

    #[test]
    fn age_in_days_uses_whole_days() {
        let now = datetime!(2026-02-15 12:00:00 UTC);
        assert_eq!(age_days("2026-02-12", now), Some(3));
        assert_eq!(age_days("2026-02-15T06:00:00Z", now), Some(0));
    }

    #[test]
    fn review_intervals_resolve_to_dates() {
        let now = datetime!(2026-01-01 00:00:00 UTC);
        assert_eq!(resolve_review_interval("7d", now).as_deref(), Some("2026-01-08"));
        assert_eq!(resolve_review_interval("2w", now).as_deref(), Some("2026-01-15"));
        assert_eq!(resolve_review_interval("1m", now).as_deref(), Some("2026-01-31"));
        assert_eq!(resolve_review_interval("next week", now), None);
    }

    #[test]
    fn date_formatting_is_zero_padded() {
        assert_eq!(format_date(datetime!(2026-03-05 01:02:03 UTC)), "2026-03-05");
    }
}
