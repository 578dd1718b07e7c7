use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

impl Default for ClockQuality {
    /// Quality of a time-aware system without an external time source
    fn default() -> Self {
        ClockQuality {
            clock_class: 248,
            clock_accuracy: 0x22,
            offset_scaled_log_variance: 0x436A,
        }
    }
}

/// Time source of a grandmaster, as carried in announce messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSource(pub u8);

impl TimeSource {
    pub const ATOMIC_CLOCK: TimeSource = TimeSource(0x10);
    pub const GPS: TimeSource = TimeSource(0x20);
    pub const PTP: TimeSource = TimeSource(0x40);
    pub const NTP: TimeSource = TimeSource(0x50);
    pub const INTERNAL_OSCILLATOR: TimeSource = TimeSource(0xA0);
}

impl Default for TimeSource {
    fn default() -> Self {
        TimeSource::INTERNAL_OSCILLATOR
    }
}
