//! Nanosecond timestamps.

use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

pub const NS_PER_SECOND: i64 = 1_000_000_000;

/// Signed nanosecond count, used for presentation timestamps and durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_ns(ns: i64) -> Self {
        Self(ns)
    }

    pub const fn from_ms(ms: i64) -> Self {
        Self(ms * 1_000_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * NS_PER_SECOND)
    }

    pub const fn ns(&self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NS_PER_SECOND as f64
    }

    /// Duration of `samples` at `rate` samples per second, truncated to whole nanoseconds.
    pub fn from_samples(samples: u64, rate: u64) -> Option<Self> {
        if rate == 0 {
            return None;
        }

        let ns = samples as i128 * NS_PER_SECOND as i128 / rate as i128;
        i64::try_from(ns).ok().map(Self)
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let secs = abs / NS_PER_SECOND as u64;

        write!(
            f,
            "{sign}{:02}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            abs % NS_PER_SECOND as u64
        )
    }
}
