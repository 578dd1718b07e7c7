//! Interface to the link layer transport

use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Destination of all gPTP traffic, peer delay included
pub const GPTP_MULTICAST: MacAddress = MacAddress([0x01, 0x80, 0xC2, 0x00, 0x00, 0x0E]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Nothing happened within the poll granularity, or the operation
    /// should be retried later
    #[error("transient network condition")]
    Transient,
    #[error("fatal network error: {0}")]
    Fatal(String),
}

/// A link layer socket bound to a single interface.
///
/// `recv` blocks for at most an implementation defined poll granularity
/// and reports [NetworkError::Transient] when nothing arrived, so that the
/// receive loop can observe cancellation.
pub trait NetworkInterface: Send + Sync {
    fn send(
        &self,
        destination: MacAddress,
        data: &[u8],
        timestamp: bool,
    ) -> Result<(), NetworkError>;

    /// Receive a single frame, returning its source and length
    fn recv(&self, buffer: &mut [u8]) -> Result<(MacAddress, usize), NetworkError>;

    fn link_layer_address(&self) -> MacAddress;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_display() {
        assert_eq!(GPTP_MULTICAST.to_string(), "01:80:c2:00:00:0e");
    }
}
