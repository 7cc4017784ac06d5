//! Device time stamps.
//!
//! [`TimeSpec`] splits a time into whole seconds and a fractional part so
//! large epoch values keep sub-nanosecond resolution. The fractional part is
//! always kept in `[0, 1)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// Time stamp as whole plus fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpec {
    full_secs: i64,
    frac_secs: f64,
}

impl TimeSpec {
    /// Time zero.
    pub const ZERO: TimeSpec = TimeSpec {
        full_secs: 0,
        frac_secs: 0.0,
    };

    /// Build from parts; the fractional part may be out of `[0, 1)` and is
    /// carried into the whole seconds.
    pub fn new(full_secs: i64, frac_secs: f64) -> Self {
        let carry = frac_secs.floor();
        Self {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        }
    }

    /// Build from a real number of seconds.
    pub fn from_real_secs(secs: f64) -> Self {
        let full = secs.floor();
        Self::new(full as i64, secs - full)
    }

    /// Build from a UTC wall-clock instant.
    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self::new(
            instant.timestamp(),
            f64::from(instant.timestamp_subsec_nanos()) / 1e9,
        )
    }

    /// Sample the host wall clock.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Whole seconds.
    pub fn full_secs(&self) -> i64 {
        self.full_secs
    }

    /// Fractional seconds in `[0, 1)`.
    pub fn frac_secs(&self) -> f64 {
        self.frac_secs
    }

    /// Seconds as a single float (loses precision for large values).
    pub fn real_secs(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }

    /// The next whole second strictly after this time.
    pub fn next_whole_second(&self) -> Self {
        Self::new(self.full_secs + 1, 0.0)
    }
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::new(self.full_secs + rhs.full_secs, self.frac_secs + rhs.frac_secs)
    }
}

impl Sub for TimeSpec {
    type Output = TimeSpec;

    fn sub(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::new(self.full_secs - rhs.full_secs, self.frac_secs - rhs.frac_secs)
    }
}

impl PartialOrd for TimeSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.full_secs.cmp(&other.full_secs) {
            Ordering::Equal => self.frac_secs.partial_cmp(&other.frac_secs),
            ord => Some(ord),
        }
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = ((self.frac_secs * 1e9).round() as u64).min(999_999_999);
        write!(f, "{}.{:09}s", self.full_secs, nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalizes_fraction() {
        let t = TimeSpec::new(3, 1.25);
        assert_eq!(t.full_secs(), 4);
        assert!((t.frac_secs() - 0.25).abs() < 1e-12);

        let t = TimeSpec::from_real_secs(-0.5);
        assert_eq!(t.full_secs(), -1);
        assert!((t.frac_secs() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn arithmetic_and_ordering() {
        let a = TimeSpec::new(10, 0.75);
        let b = TimeSpec::new(2, 0.5);
        let sum = a + b;
        assert_eq!(sum.full_secs(), 13);
        assert!((sum.frac_secs() - 0.25).abs() < 1e-12);
        let diff = a - b;
        assert_eq!(diff.full_secs(), 8);
        assert!((diff.frac_secs() - 0.25).abs() < 1e-12);
        assert!(b < a);
        assert!(TimeSpec::ZERO < b);
    }

    #[test]
    fn from_datetime_keeps_subsecond_part() {
        let instant = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        let t = TimeSpec::from_datetime(instant);
        assert_eq!(t.full_secs(), 1_700_000_000);
        assert!((t.frac_secs() - 0.5).abs() < 1e-12);
        assert_eq!(t.next_whole_second().full_secs(), 1_700_000_001);
        assert_eq!(t.to_string(), "1700000000.500000000s");
    }
}
