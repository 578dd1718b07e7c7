use serde::{Deserialize, Serialize};

use super::Header;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub header: Header,
    pub origin_timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpMessage {
    pub header: Header,
    pub precise_origin_timestamp: Timestamp,
    /// Rate ratio to the grandmaster minus one, scaled by 2^41
    pub cumulative_scaled_rate_offset: i32,
    pub gm_time_base_indicator: u16,
}

const RATE_OFFSET_SCALE: f64 = (1u64 << 41) as f64;

impl FollowUpMessage {
    pub fn rate_ratio(&self) -> f64 {
        self.cumulative_scaled_rate_offset as f64 / RATE_OFFSET_SCALE + 1.0
    }

    pub fn scaled_rate_offset(ratio: f64) -> i32 {
        ((ratio - 1.0) * RATE_OFFSET_SCALE) as i32
    }
}
