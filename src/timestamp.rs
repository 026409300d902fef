//! Timestamp parsing and storage formatting

use crate::error::{validation_error, AppResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` or `YYYY-MM-DD` (all UTC)
pub fn parse_timestamp(input: &str) -> AppResult<DateTime<Utc>> {
    let trimmed = input.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Some(naive) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }

    Err(validation_error(format!("Invalid date/time value \"{}\"", input)))
}

/// Storage form: RFC 3339 with microseconds and a `Z` suffix, so stored
/// timestamps also sort correctly as text
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read an optional timestamp field. Null or missing is `None`; strings must
/// parse; anything else is a validation error.
pub fn timestamp_from_value(field: &str, value: Option<&Value>) -> AppResult<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_timestamp(s)
            .map(Some)
            .map_err(|e| validation_error(format!("{}: {}", field, e))),
        Some(other) => Err(validation_error(format!(
            "{} must be a date/time string, got {}",
            field, other
        ))),
    }
}

pub fn timestamp_to_value(ts: Option<&DateTime<Utc>>) -> Value {
    ts.map(|t| Value::String(format_timestamp(t)))
        .unwrap_or(Value::Null)
}
