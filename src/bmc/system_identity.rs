//! Implementation of the systemIdentity comparison of IEEE 802.1AS 10.3.2

use crate::datastructures::{
    common::{ClockIdentity, ClockQuality},
    messages::AnnounceMessage,
};

/// Priority vector of a candidate grandmaster as a single 14 octet string.
///
/// Octets are laid out as priority1, clockClass, clockAccuracy,
/// offsetScaledLogVariance (network order), priority2 and clockIdentity.
/// Comparison is a plain lexicographic compare of the octets, lower is
/// better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemIdentity([u8; 14]);

impl SystemIdentity {
    pub fn new(
        priority_1: u8,
        quality: ClockQuality,
        priority_2: u8,
        identity: ClockIdentity,
    ) -> Self {
        let mut vector = [0; 14];
        vector[0] = priority_1;
        vector[1] = quality.clock_class;
        vector[2] = quality.clock_accuracy;
        vector[3..5].copy_from_slice(&quality.offset_scaled_log_variance.to_be_bytes());
        vector[5] = priority_2;
        vector[6..14].copy_from_slice(&identity.0);
        SystemIdentity(vector)
    }

    /// The grandmaster described by an announce message
    pub fn from_announce(message: &AnnounceMessage) -> Self {
        Self::new(
            message.grandmaster_priority_1,
            message.grandmaster_clock_quality,
            message.grandmaster_priority_2,
            message.grandmaster_identity,
        )
    }

    pub fn is_better_than(&self, other: &SystemIdentity) -> bool {
        self.0 < other.0
    }

    pub fn as_bytes(&self) -> &[u8; 14] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const IDENTITY_A: ClockIdentity = ClockIdentity([1, 1, 1, 1, 1, 1, 1, 1]);
    const IDENTITY_B: ClockIdentity = ClockIdentity([2, 2, 2, 2, 2, 2, 2, 2]);

    #[test]
    fn vector_layout() {
        let quality = ClockQuality {
            clock_class: 248,
            clock_accuracy: 0x22,
            offset_scaled_log_variance: 0x436A,
        };
        let vector = SystemIdentity::new(246, quality, 248, IDENTITY_B);
        assert_eq!(
            vector.as_bytes(),
            &[246, 248, 0x22, 0x43, 0x6A, 248, 2, 2, 2, 2, 2, 2, 2, 2]
        );
    }

    #[test]
    fn identity_breaks_ties() {
        let quality = ClockQuality::default();
        let a = SystemIdentity::new(248, quality, 248, IDENTITY_A);
        let b = SystemIdentity::new(248, quality, 248, IDENTITY_B);
        assert!(a.is_better_than(&b));
        assert!(!b.is_better_than(&a));
        assert!(!a.is_better_than(&a));
    }

    #[test]
    fn variance_compares_high_octet_first() {
        let low = ClockQuality {
            offset_scaled_log_variance: 0x00FF,
            ..Default::default()
        };
        let high = ClockQuality {
            offset_scaled_log_variance: 0x0100,
            ..Default::default()
        };
        let a = SystemIdentity::new(248, low, 248, IDENTITY_B);
        let b = SystemIdentity::new(248, high, 248, IDENTITY_A);
        assert!(a.is_better_than(&b));
    }

    fn arbitrary_system() -> impl Strategy<Value = (u8, u8, u8, u16, u8, [u8; 8])> {
        (
            any::<u8>(),
            any::<u8>(),
            any::<u8>(),
            any::<u16>(),
            any::<u8>(),
            any::<[u8; 8]>(),
        )
    }

    proptest! {
        #[test]
        fn lower_priority_1_always_wins(
            (p1_a, class, accuracy, variance, p2, identity) in arbitrary_system(),
            p1_b in any::<u8>(),
        ) {
            prop_assume!(p1_a != p1_b);
            let quality = ClockQuality {
                clock_class: class,
                clock_accuracy: accuracy,
                offset_scaled_log_variance: variance,
            };
            let a = SystemIdentity::new(p1_a, quality, p2, ClockIdentity(identity));
            let b = SystemIdentity::new(p1_b, quality, p2, ClockIdentity(identity));
            prop_assert_eq!(a.is_better_than(&b), p1_a < p1_b);
            prop_assert_eq!(b.is_better_than(&a), p1_b < p1_a);
        }
    }
}
