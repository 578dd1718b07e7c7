//! Time definitions

mod interval;
mod timestamp;

pub use interval::{Interval, TimeInterval};
pub use timestamp::{Timestamp, INVALID_TIMESTAMP_VERSION, NANOS_PER_SECOND};

/// Current wall clock time as a [Timestamp]
pub fn system_time() -> Timestamp {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(now.as_secs(), now.subsec_nanos())
}
