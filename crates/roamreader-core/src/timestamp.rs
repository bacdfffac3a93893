//! Timestamp parsing for timeline exports and elapsed-minute computation.

use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const NANOS_PER_MINUTE: i128 = 60 * 1_000_000_000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TimestampError {
    #[error("unrecognized timestamp: {0:?}")]
    ParseFailure(String),
}

/// Parse `YYYY-MM-DDTHH:MM:SS.ffffffZ`, falling back to `YYYY-MM-DDTHH:MM:SSZ`.
///
/// # Errors
/// Returns [`TimestampError::ParseFailure`] when neither form matches.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, TimestampError> {
    let fractional =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]Z");
    let whole_seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

    PrimitiveDateTime::parse(value, fractional)
        .or_else(|_| PrimitiveDateTime::parse(value, whole_seconds))
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| TimestampError::ParseFailure(value.to_string()))
}

/// Whole minutes from `arrival` to `departure`, rounded toward negative infinity.
///
/// Out-of-order inputs produce a negative value.
///
/// # Errors
/// Returns [`TimestampError::ParseFailure`] when either side cannot be parsed.
pub fn duration_minutes(arrival: &str, departure: &str) -> Result<i64, TimestampError> {
    let arrival = parse_timestamp(arrival)?;
    let departure = parse_timestamp(departure)?;
    Ok(minutes_between(arrival, departure))
}

#[must_use]
pub fn minutes_between(arrival: OffsetDateTime, departure: OffsetDateTime) -> i64 {
    let nanos = (departure - arrival).whole_nanoseconds();
    // an i128 nanosecond span divided down to minutes always fits in i64
    i64::try_from(nanos.div_euclid(NANOS_PER_MINUTE)).unwrap_or(i64::MAX)
}

/// Date portion of an export timestamp (text before the first `T`).
#[must_use]
pub fn date_part(timestamp: &str) -> &str {
    timestamp.split('T').next().unwrap_or_default()
}
