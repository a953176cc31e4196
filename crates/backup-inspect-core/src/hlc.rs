//! Hybrid logical clock timestamps.
//!
//! Backups stamp every write with an [`HlcTimestamp`]: a wall-clock reading in
//! Unix nanoseconds plus a logical counter that orders writes sharing the
//! same wall-clock instant. The zero value doubles as "unbounded/none" for
//! the start time of a full backup.
//!
//! Users address points in time either with a calendar timestamp or with the
//! exact decimal form `<wall>.<logical, 10 digits>` printed by the database;
//! [`parse_read_time`] accepts both, calendar first.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::error::ErrorKind;

/// Number of decimal digits reserved for the logical component.
const LOGICAL_DIGITS: usize = 10;

/// A totally ordered `(wall_time, logical)` timestamp.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HlcTimestamp {
    /// Wall-clock component in nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Tie-breaking counter within a single wall-clock instant.
    #[serde(default)]
    pub logical: i32,
}

/// Errors produced when parsing user-supplied times.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TimeParseError {
    /// The value matched neither a calendar layout nor the decimal form.
    #[snafu(display("value {value} is neither timestamp nor decimal"))]
    Unrecognized {
        /// The rejected input.
        value: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The value looked like a decimal but cannot be represented.
    #[snafu(display("invalid decimal timestamp {value}: {reason}"))]
    InvalidDecimal {
        /// The rejected input.
        value: String,
        /// Why the decimal was rejected.
        reason: String,
    },
}

impl TimeParseError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

impl HlcTimestamp {
    /// Build a timestamp from its two components.
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Timestamp with only a wall-clock component.
    pub const fn from_wall(wall_time: i64) -> Self {
        Self {
            wall_time,
            logical: 0,
        }
    }

    /// True for the zero value used as "no lower bound".
    pub fn is_empty(&self) -> bool {
        self.wall_time == 0 && self.logical == 0
    }

    /// Wall-clock component as a UTC datetime (nanosecond precision).
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_nanos(self.wall_time)
    }

    /// Lossy conversion used for revision rows: the logical counter is
    /// discarded and the wall time is rounded to the nearest microsecond.
    pub fn to_approx_datetime(&self) -> DateTime<Utc> {
        let micros = self.wall_time.saturating_add(500).div_euclid(1_000);
        DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_else(|| self.to_datetime())
    }

    /// RFC 3339 rendering of the wall-clock component, whole seconds.
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Parse the exact decimal form `<wall>[.<logical>]`.
    pub fn parse_decimal(value: &str) -> Result<Self, TimeParseError> {
        let invalid = |reason: &str| TimeParseError::InvalidDecimal {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = value.trim();
        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((i, f)) => (i, f),
            None => (trimmed, ""),
        };

        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("wall time must be a non-negative integer"));
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("logical component must be numeric"));
        }
        if frac_part.len() > LOGICAL_DIGITS {
            return Err(invalid("logical component has more than 10 digits"));
        }

        let wall_time = int_part
            .parse::<i64>()
            .map_err(|_| invalid("wall time out of range"))?;

        let logical = if frac_part.is_empty() {
            0
        } else {
            let padded = format!("{frac_part:0<width$}", width = LOGICAL_DIGITS);
            padded
                .parse::<i32>()
                .map_err(|_| invalid("logical component out of range"))?
        };

        Ok(Self { wall_time, logical })
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.wall_time,
            self.logical,
            width = LOGICAL_DIGITS
        )
    }
}

impl FromStr for HlcTimestamp {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_read_time(s)
    }
}

fn parse_calendar(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse a user-supplied read time.
///
/// Calendar layouts are tried first (RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`,
/// the same with a `T` separator, and a bare date; all UTC), then the exact
/// decimal form.
pub fn parse_read_time(value: &str) -> Result<HlcTimestamp, TimeParseError> {
    let trimmed = value.trim();

    if let Some(wall) = parse_calendar(trimmed).and_then(|dt| dt.timestamp_nanos_opt()) {
        return Ok(HlcTimestamp::from_wall(wall));
    }

    match HlcTimestamp::parse_decimal(trimmed) {
        Ok(ts) => Ok(ts),
        Err(TimeParseError::InvalidDecimal { .. })
            if !trimmed.bytes().next().is_some_and(|b| b.is_ascii_digit()) =>
        {
            UnrecognizedSnafu { value: trimmed }.fail()
        }
        Err(e) => Err(e),
    }
}
