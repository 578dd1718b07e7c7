use serde::{Deserialize, Serialize};

use super::Header;
use crate::{
    datastructures::common::{ClockIdentity, ClockQuality, TimeSource},
    time::Timestamp,
};

/// Steps removed at which an announce message no longer qualifies
pub const MAX_STEPS_REMOVED: u16 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub header: Header,
    pub origin_timestamp: Timestamp,
    pub current_utc_offset: i16,
    pub grandmaster_priority_1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority_2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_source: TimeSource,
}
