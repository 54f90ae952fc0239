//! Compact duration strings such as `90s`, `1m`, `3h`, used in config files
//! and query parameters.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, value},
    IResult, Parser,
};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration '{0}': expected <number><ms|s|m|h|d>")]
    Malformed(String),
    #[error("duration '{0}' is out of range")]
    Overflow(String),
}

/// Parses `<integer><unit>` where unit is one of `ms`, `s`, `m`, `h`, `d`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tallymon_common::duration::parse_duration;
///
/// assert_eq!(parse_duration("3h").unwrap(), Duration::from_secs(3 * 3600));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert!(parse_duration("3 hours").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    let (_, (digits, millis_per_unit)) = all_consuming(amount_with_unit)
        .parse(s)
        .map_err(|_| DurationError::Malformed(s.to_string()))?;
    // digits are ASCII-only here; the only parse failure left is overflow
    let millis = digits
        .parse::<u64>()
        .ok()
        .and_then(|amount| amount.checked_mul(millis_per_unit))
        .ok_or_else(|| DurationError::Overflow(s.to_string()))?;
    Ok(Duration::from_millis(millis))
}

/// `<digits><unit>`, yielding the digits and the unit size in milliseconds.
fn amount_with_unit(input: &str) -> IResult<&str, (&str, u64)> {
    (
        digit1,
        alt((
            value(1, tag("ms")),
            value(1_000, tag("s")),
            value(60_000, tag("m")),
            value(3_600_000, tag("h")),
            value(86_400_000, tag("d")),
        )),
    )
        .parse(input)
}

/// Renders a duration in the largest unit that divides it evenly.
///
/// ```
/// use std::time::Duration;
/// use tallymon_common::duration::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(10_800)), "3h");
/// assert_eq!(format_duration(Duration::from_secs(90)), "90s");
/// ```
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    for (unit, size) in [("d", 86_400_000), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if millis >= size && millis % size == 0 {
            return format!("{}{unit}", millis / size);
        }
    }
    format!("{millis}ms")
}

/// `serde(with = ...)` adapter storing a [`Duration`] as a compact string.
pub mod compact {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
