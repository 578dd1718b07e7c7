use std::{
    fmt::Display,
    ops::{Add, Sub},
};

use serde::{Deserialize, Serialize};

pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Version tag carried by the result of arithmetic on timestamps taken from
/// different timestamper generations.
pub const INVALID_TIMESTAMP_VERSION: u8 = 0xFF;

/// A point in time as reported by a system clock or a timestamping device.
///
/// The seconds are split into a high and a low word so the type can carry
/// the full range of a PTP timestamp. `version` identifies the timestamper
/// generation that produced the value, which allows detecting stale pairs
/// of device and system time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_ms: u32,
    pub seconds_ls: u32,
    /// Always less than 10^9
    pub nanoseconds: u32,
    pub version: u8,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        seconds_ms: 0,
        seconds_ls: 0,
        nanoseconds: 0,
        version: 0,
    };

    /// Create a timestamp, carrying excess nanoseconds into the seconds
    pub fn new(seconds: u64, nanoseconds: u32) -> Self {
        let seconds = seconds.wrapping_add((nanoseconds / NANOS_PER_SECOND) as u64);
        Self::from_parts(seconds, nanoseconds % NANOS_PER_SECOND, 0)
    }

    fn from_parts(seconds: u64, nanoseconds: u32, version: u8) -> Self {
        Timestamp {
            seconds_ms: (seconds >> 32) as u32,
            seconds_ls: seconds as u32,
            nanoseconds,
            version,
        }
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn seconds(&self) -> u64 {
        ((self.seconds_ms as u64) << 32) | self.seconds_ls as u64
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self::from_parts(
            nanos / NANOS_PER_SECOND as u64,
            (nanos % NANOS_PER_SECOND as u64) as u32,
            0,
        )
    }

    /// Collapse into a single nanosecond count. Wraps for timestamps beyond
    /// roughly 584 years.
    pub fn to_nanos(&self) -> u64 {
        self.seconds()
            .wrapping_mul(NANOS_PER_SECOND as u64)
            .wrapping_add(self.nanoseconds as u64)
    }

    pub fn add_nanos(self, nanos: u64) -> Self {
        self + Timestamp::from_nanos(nanos).with_version(self.version)
    }

    pub fn sub_nanos(self, nanos: u64) -> Self {
        self - Timestamp::from_nanos(nanos).with_version(self.version)
    }

    /// Signed difference `self - earlier` in nanoseconds, saturating at the
    /// bounds of `i64`.
    pub fn nanos_since(&self, earlier: &Timestamp) -> i64 {
        let seconds = self.seconds() as i128 - earlier.seconds() as i128;
        let nanos = seconds * NANOS_PER_SECOND as i128 + self.nanoseconds as i128
            - earlier.nanoseconds as i128;
        nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    fn combined_version(&self, other: &Timestamp) -> u8 {
        if self.version == other.version {
            self.version
        } else {
            INVALID_TIMESTAMP_VERSION
        }
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        let mut nanoseconds = self.nanoseconds + rhs.nanoseconds;
        let mut carry = 0;
        if nanoseconds >= NANOS_PER_SECOND {
            nanoseconds -= NANOS_PER_SECOND;
            carry = 1;
        }
        let seconds = self
            .seconds()
            .wrapping_add(rhs.seconds())
            .wrapping_add(carry);
        Timestamp::from_parts(seconds, nanoseconds, self.combined_version(&rhs))
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timestamp) -> Timestamp {
        let (nanoseconds, borrow) = if self.nanoseconds >= rhs.nanoseconds {
            (self.nanoseconds - rhs.nanoseconds, 0)
        } else {
            (self.nanoseconds + NANOS_PER_SECOND - rhs.nanoseconds, 1)
        };
        let seconds = self
            .seconds()
            .wrapping_sub(rhs.seconds())
            .wrapping_sub(borrow);
        Timestamp::from_parts(seconds, nanoseconds, self.combined_version(&rhs))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds(), self.nanoseconds)
    }
}
