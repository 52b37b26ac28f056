// Date and time handling for the date.* operators

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use thiserror::Error;

use crate::value::JValue;

/// DateTime errors
#[derive(Error, Debug, PartialEq)]
pub enum DateTimeError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Format error: {0}")]
    FormatError(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

const MILLIS_PER_SECOND: f64 = 1_000.0;
const MILLIS_PER_MINUTE: f64 = 60.0 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: f64 = 60.0 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: f64 = 24.0 * MILLIS_PER_HOUR;
const MILLIS_PER_WEEK: f64 = 7.0 * MILLIS_PER_DAY;
const MILLIS_PER_YEAR: f64 = 365.25 * MILLIS_PER_DAY;
const MILLIS_PER_MONTH: f64 = MILLIS_PER_YEAR / 12.0;

fn unit_millis(unit: &str) -> Option<f64> {
    let millis = match unit {
        "ms" | "msec" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => MILLIS_PER_SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MILLIS_PER_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => MILLIS_PER_HOUR,
        "d" | "day" | "days" => MILLIS_PER_DAY,
        "w" | "wk" | "wks" | "week" | "weeks" => MILLIS_PER_WEEK,
        "mo" | "month" | "months" => MILLIS_PER_MONTH,
        "y" | "yr" | "yrs" | "year" | "years" => MILLIS_PER_YEAR,
        _ => return None,
    };
    Some(millis)
}

/// Parse a human duration such as `1d`, `-2h 30m` or `1.5w`.
///
/// Each term is a number followed by a unit. A leading sign applies to the
/// whole duration. Months and years use average lengths.
pub fn parse_duration(input: &str) -> Result<TimeDelta, DateTimeError> {
    let invalid = || DateTimeError::InvalidDuration(input.to_string());

    let trimmed = input.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let mut total = 0.0;
    let mut terms = 0;
    let mut chars = body.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            continue;
        }

        let mut number_end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number_end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if number_end == start {
            return Err(invalid());
        }
        let amount: f64 = body[start..number_end].parse().map_err(|_| invalid())?;

        while chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
            chars.next();
        }

        let unit_start = chars.peek().map_or(body.len(), |&(i, _)| i);
        let mut unit_end = unit_start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit_end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        let unit = body[unit_start..unit_end].to_ascii_lowercase();
        let millis = if unit.is_empty() {
            1.0
        } else {
            unit_millis(&unit).ok_or_else(invalid)?
        };

        total += amount * millis;
        terms += 1;
    }

    if terms == 0 {
        return Err(invalid());
    }

    millis_to_delta(sign * total).ok_or_else(invalid)
}

/// Convert a millisecond count to a `TimeDelta`.
///
/// Non-finite values and values outside the `TimeDelta` range yield `None`.
pub fn millis_to_delta(millis: f64) -> Option<TimeDelta> {
    let millis = millis.round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    TimeDelta::try_milliseconds(millis as i64)
}

/// Parse an ISO 8601 / RFC 3339 datetime string.
///
/// A bare `YYYY-MM-DD` date is read as midnight UTC, and a datetime without
/// offset is read as UTC.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, DateTimeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(DateTimeError::ParseError(s.to_string()))
}

/// Parse `s` with a strftime-style pattern.
///
/// Patterns carrying a time zone are honoured; patterns without one are read
/// as UTC, and date-only patterns as midnight.
pub fn parse_with_format(s: &str, format: &str) -> Result<DateTime<Utc>, DateTimeError> {
    if let Ok(dt) = DateTime::parse_from_str(s, format) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(s, format)
        .map_err(|e| DateTimeError::ParseError(format!("{s}: {e}")))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| DateTimeError::ParseError(s.to_string()))
}

/// Validate a strftime pattern up front so formatting cannot fail later.
pub fn validate_format(format: &str) -> Result<(), DateTimeError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(DateTimeError::FormatError(format.to_string()));
    }
    Ok(())
}

/// Format with a strftime pattern previously checked by [`validate_format`].
pub fn format_with(dt: &DateTime<Utc>, format: &str) -> String {
    dt.format(format).to_string()
}

/// Format a datetime as ISO 8601 string
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    crate::value::format_date(dt)
}

/// Read a value as a point in time.
///
/// Dates pass through, numbers are epoch milliseconds and strings are parsed
/// as ISO 8601. Anything else has no date reading.
pub fn coerce_date(value: &JValue) -> Option<DateTime<Utc>> {
    match value {
        JValue::Date(d) => Some(*d),
        JValue::Number(n) if n.is_finite() => DateTime::from_timestamp_millis(*n as i64),
        JValue::String(s) => parse_iso8601(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("1d"), Ok(TimeDelta::days(1)));
        assert_eq!(parse_duration("2h"), Ok(TimeDelta::hours(2)));
        assert_eq!(parse_duration("30 minutes"), Ok(TimeDelta::minutes(30)));
        assert_eq!(parse_duration("1.5w"), Ok(TimeDelta::hours(252)));
        assert_eq!(parse_duration("250ms"), Ok(TimeDelta::milliseconds(250)));
    }

    #[test]
    fn test_parse_duration_compound_and_negative() {
        assert_eq!(
            parse_duration("-2h 30m"),
            Ok(-(TimeDelta::hours(2) + TimeDelta::minutes(30)))
        );
        assert_eq!(
            parse_duration("1h,15m"),
            Ok(TimeDelta::minutes(75))
        );
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("3 fortnights").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_out_of_range() {
        assert!(parse_duration("-99999999999999999999999y").is_err());
        assert!(parse_duration("99999999999999999999999y").is_err());
        assert_eq!(millis_to_delta(f64::NAN), None);
        assert_eq!(millis_to_delta(-1e30), None);
        assert_eq!(millis_to_delta(1500.4), Some(TimeDelta::milliseconds(1500)));
    }

    #[test]
    fn test_parse_iso8601_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_iso8601("2024-01-02"), Ok(expected));
        assert_eq!(parse_iso8601("2024-01-02T00:00:00Z"), Ok(expected));
        assert_eq!(parse_iso8601("2024-01-02T01:00:00+01:00"), Ok(expected));
        assert_eq!(parse_iso8601("2024-01-02T00:00:00"), Ok(expected));
        assert!(parse_iso8601("yesterday").is_err());
    }

    #[test]
    fn test_parse_with_format() {
        let expected = Utc.with_ymd_and_hms(2023, 12, 25, 0, 0, 0).unwrap();
        assert_eq!(parse_with_format("25/12/2023", "%d/%m/%Y"), Ok(expected));
        assert!(parse_with_format("2023-12-25", "%d/%m/%Y").is_err());
    }

    #[test]
    fn test_coerce_date() {
        let expected = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(coerce_date(&JValue::from(1000i64)), Some(expected));
        assert_eq!(coerce_date(&JValue::from("1970-01-01T00:00:01Z")), Some(expected));
        assert_eq!(coerce_date(&JValue::Bool(true)), None);
    }

    #[test]
    fn test_validate_format() {
        assert!(validate_format("%Y-%m-%d").is_ok());
        assert!(validate_format("%Q").is_err());
    }
}
