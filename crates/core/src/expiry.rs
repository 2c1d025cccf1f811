//! Expiry parsing for the `X-Expires` header and the metadata patch body.
//!
//! Accepted forms, tried in order:
//! - RFC 3339 (`2026-01-02T15:04:05Z`)
//! - `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`
//! - `YYYY-MM-DD HH:MM` / `YYYY-MM-DDTHH:MM` (HTML datetime-local)
//! - `YYYY-MM-DD` (midnight UTC)
//! - relative: `<N>d`, `<N>w`, or any combination of `h`/`m`/`s` units
//!   (`36h`, `1h30m`, `90s`)
//!
//! Absolute forms without an offset are interpreted as UTC.

use crate::error::{Error, Result};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};

const DATETIME_FORMATS: [&[BorrowedFormatItem<'static>]; 4] = [
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
];

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse an expiry value relative to `now`.
pub fn parse_expiry(input: &str, now: OffsetDateTime) -> Result<OffsetDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidExpiry("empty expiry value".to_string()));
    }

    if let Ok(t) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(t);
    }

    for format in DATETIME_FORMATS {
        if let Ok(t) = PrimitiveDateTime::parse(input, format) {
            return Ok(t.assume_utc());
        }
    }

    if let Ok(d) = Date::parse(input, DATE_FORMAT) {
        return Ok(PrimitiveDateTime::new(d, Time::MIDNIGHT).assume_utc());
    }

    if let Some(days) = input.strip_suffix('d').and_then(|s| s.parse::<i64>().ok()) {
        return Ok(now + Duration::days(days));
    }
    if let Some(weeks) = input.strip_suffix('w').and_then(|s| s.parse::<i64>().ok()) {
        return Ok(now + Duration::days(weeks * 7));
    }

    if let Some(dur) = parse_duration(input) {
        return Ok(now + dur);
    }

    Err(Error::InvalidExpiry(
        "use a duration (7d, 1h30m) or an absolute time (ISO 8601)".to_string(),
    ))
}

/// Parse a sequence of `<N>h` / `<N>m` / `<N>s` components.
fn parse_duration(input: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut seen_unit = false;

    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits.parse().ok()?;
        digits.clear();
        total += match c {
            'h' => Duration::hours(n),
            'm' => Duration::minutes(n),
            's' => Duration::seconds(n),
            _ => return None,
        };
        seen_unit = true;
    }

    if seen_unit && digits.is_empty() {
        Some(total)
    } else {
        None
    }
}
