use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::clock_identity::ClockIdentity;

/// Ordered first by clock identity, then by port number
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PortIdentity {
    pub clock_identity: ClockIdentity,
    pub port_number: u16,
}

impl Display for PortIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.clock_identity, self.port_number)
    }
}
