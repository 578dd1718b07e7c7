use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::network::MacAddress;

/// The identity of a PTP node.
///
/// Must have a unique value for each node in a ptp network. Ordered
/// bytewise, which is the order the best master clock algorithm uses for its
/// final tie break.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    /// Identity no real clock can carry, used before any grandmaster was seen
    pub const UNKNOWN: ClockIdentity = ClockIdentity([0xFF; 8]);

    /// EUI-64 expansion of a link layer address
    pub fn from_mac(mac: MacAddress) -> Self {
        let m = mac.0;
        ClockIdentity([m[0], m[1], m[2], 0xFF, 0xFE, m[3], m[4], m[5]])
    }
}

impl Display for ClockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eui64_expansion() {
        let identity = ClockIdentity::from_mac(MacAddress([0x00, 0x1b, 0x21, 0x3c, 0x4d, 0x5e]));
        assert_eq!(
            identity,
            ClockIdentity([0x00, 0x1b, 0x21, 0xff, 0xfe, 0x3c, 0x4d, 0x5e])
        );
        assert_eq!(identity.to_string(), "00:1b:21:ff:fe:3c:4d:5e");
    }

    #[test]
    fn lexicographic_order() {
        let a = ClockIdentity([0, 0, 0, 0, 0, 0, 0, 9]);
        let b = ClockIdentity([0, 0, 0, 0, 0, 0, 1, 0]);
        assert!(a < b);
        assert!(b < ClockIdentity::UNKNOWN);
    }
}
