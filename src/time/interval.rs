use std::{
    ops::{Deref, DerefMut, RangeInclusive},
    time::Duration,
};

use fixed::types::I48F16;
use serde::{Deserialize, Serialize};

/// A message interval expressed as a base 2 logarithm of seconds
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Interval(i8);

impl std::fmt::Debug for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interval")
            .field("seconds", &self.as_f64())
            .field("log_base_2", &self.0)
            .finish()
    }
}

impl Interval {
    pub const ONE_SECOND: Self = Self(0);
    pub const EIGHTH_SECOND: Self = Self(-3);

    /// Log intervals accepted from configuration
    pub const SUPPORTED_LOG_2: RangeInclusive<i8> = -8..=8;

    pub const fn from_log_2(log_2: i8) -> Self {
        Self(log_2)
    }

    pub fn as_f64(self) -> f64 {
        2.0f64.powi(self.0 as i32)
    }

    /// Saturates at [Duration::MAX]
    pub fn as_duration(self) -> Duration {
        Duration::try_from_secs_f64(self.as_f64()).unwrap_or(Duration::MAX)
    }

    /// The interval scaled by a timeout multiplier, saturating at
    /// [Duration::MAX]
    pub fn times(self, multiplier: u32) -> Duration {
        Duration::try_from_secs_f64(self.as_f64() * multiplier as f64).unwrap_or(Duration::MAX)
    }

    pub fn as_log_2(self) -> i8 {
        self.0
    }
}

impl From<i8> for Interval {
    fn from(value: i8) -> Self {
        Self::from_log_2(value)
    }
}

/// Nanoseconds with a 16 bit fraction, the representation of the
/// correction field of a message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeInterval(pub I48F16);

impl TimeInterval {
    pub fn from_nanos(nanos: i64) -> Self {
        TimeInterval(I48F16::saturating_from_num(nanos))
    }

    /// The whole nanoseconds, the equivalent of shifting the raw field right
    /// by 16 bits.
    pub fn whole_nanos(&self) -> i64 {
        self.0.to_bits() >> 16
    }
}

impl Deref for TimeInterval {
    type Target = I48F16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TimeInterval {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl std::ops::Add for TimeInterval {
    type Output = TimeInterval;

    fn add(self, rhs: TimeInterval) -> TimeInterval {
        TimeInterval(self.0.saturating_add(rhs.0))
    }
}
