//! Backend-neutral point in time with nanosecond precision.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// A point in time as whole seconds since the Unix epoch plus a nanosecond remainder.
///
/// `nanoseconds` is always in `0..1_000_000_000`, so instants before the epoch carry a
/// negative `seconds` and a positive remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Creates a timestamp, rejecting a nanosecond remainder of one second or more.
    pub fn new(seconds: i64, nanoseconds: u32) -> ParseResult<Self> {
        if i64::from(nanoseconds) >= NANOS_PER_SECOND {
            return Err(ParseError::validation(format!(
                "Timestamp nanoseconds out of range: {nanoseconds}"
            )));
        }

        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    pub fn now() -> Self {
        Self::from_date_time(Utc::now())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            seconds: millis.div_euclid(1_000),
            nanoseconds: (millis.rem_euclid(1_000) * NANOS_PER_MILLI) as u32,
        }
    }

    /// Milliseconds since the epoch, truncating any sub-millisecond remainder.
    ///
    /// Instants beyond the `i64` millisecond range saturate to `i64::MIN` or `i64::MAX`.
    pub fn to_millis(&self) -> i64 {
        self.seconds
            .checked_mul(1_000)
            .and_then(|millis| millis.checked_add(i64::from(self.nanoseconds) / NANOS_PER_MILLI))
            .unwrap_or(if self.seconds < 0 { i64::MIN } else { i64::MAX })
    }

    /// Milliseconds since the epoch, keeping the sub-millisecond fraction.
    pub fn to_millis_f64(&self) -> f64 {
        self.seconds as f64 * 1_000.0 + f64::from(self.nanoseconds) / NANOS_PER_MILLI as f64
    }

    pub fn from_date_time(date_time: DateTime<Utc>) -> Self {
        Self {
            seconds: date_time.timestamp(),
            nanoseconds: date_time.timestamp_subsec_nanos(),
        }
    }

    pub fn to_date_time(&self) -> ParseResult<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanoseconds)
            .single()
            .ok_or_else(|| {
                ParseError::validation(format!(
                    "Timestamp out of range: {}s {}ns",
                    self.seconds, self.nanoseconds
                ))
            })
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date_time: DateTime<Utc>) -> Self {
        Timestamp::from_date_time(date_time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timestamp(seconds={}, nanoseconds={})",
            self.seconds, self.nanoseconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_split_into_seconds_and_nanos() {
        let ts = Timestamp::from_millis(1_705_315_800_123);
        assert_eq!(ts.seconds, 1_705_315_800);
        assert_eq!(ts.nanoseconds, 123_000_000);
        assert_eq!(ts.to_millis(), 1_705_315_800_123);
    }

    #[test]
    fn negative_millis_keep_nanos_positive() {
        let ts = Timestamp::from_millis(-1);
        assert_eq!(ts.seconds, -1);
        assert_eq!(ts.nanoseconds, 999_000_000);
        assert_eq!(ts.to_millis(), -1);
    }

    #[test]
    fn sub_millisecond_precision_truncates() {
        let ts = Timestamp::new(10, 1_999_999).unwrap();
        assert_eq!(ts.to_millis(), 10_001);
        assert!((ts.to_millis_f64() - 10_001.999_999).abs() < 1e-6);
    }

    #[test]
    fn date_time_round_trips_at_millisecond_resolution() {
        for millis in [0_i64, 1, 999, 1_705_315_800_000, 1_705_315_800_123, -86_400_001] {
            let date_time = Utc.timestamp_millis_opt(millis).single().unwrap();
            let back = Timestamp::from_date_time(date_time).to_date_time().unwrap();
            assert_eq!(back, date_time);
            assert_eq!(back.timestamp_millis(), millis);
        }
    }

    #[test]
    fn rejects_overflowing_nanos() {
        assert!(Timestamp::new(0, 1_000_000_000).is_err());
    }

    #[test]
    fn millis_saturate_outside_the_i64_range() {
        assert_eq!(Timestamp::new(i64::MAX / 100, 0).unwrap().to_millis(), i64::MAX);
        assert_eq!(Timestamp::new(i64::MAX / 1_000, 999_000_000).unwrap().to_millis(), i64::MAX);
        assert_eq!(Timestamp::new(i64::MIN, 0).unwrap().to_millis(), i64::MIN);
        assert_eq!(
            Timestamp::from_millis(i64::MAX - 1).to_millis(),
            i64::MAX - 1
        );
    }

    #[test]
    fn orders_chronologically() {
        assert!(Timestamp::from_millis(-5) < Timestamp::from_millis(0));
        assert!(Timestamp::new(1, 5).unwrap() < Timestamp::new(1, 6).unwrap());
    }
}
