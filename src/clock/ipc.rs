//! Publication of synchronization results to other processes

use crate::{datastructures::common::ClockIdentity, port::PortState};

/// Snapshot of the offsets computed for one synchronization cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterOffset {
    pub master_local_offset: i64,
    pub local_system_offset: i64,
    pub master_local_freq_offset: f64,
    pub local_system_freq_offset: f64,
    /// Local time of the measurement, in nanoseconds
    pub local_time: u64,
    pub sync_count: u32,
    pub pdelay_count: u32,
    pub port_state: PortState,
    pub as_capable: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("telemetry sink unavailable")]
    Unavailable,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fire and forget consumer of [MasterOffset] snapshots, for example a
/// shared memory segment read by media clock recovery.
pub trait IpcSink: Send {
    fn publish(
        &mut self,
        offset: &MasterOffset,
        grandmaster: ClockIdentity,
        domain_number: u8,
    ) -> Result<(), IpcError>;
}
