use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    #[default]
    Initializing,
    Faulty,
    Disabled,
    Listening,
    PreMaster,
    Master,
    Passive,
    Uncalibrated,
    Slave,
}

impl PortState {
    pub fn code(&self) -> u8 {
        match self {
            PortState::Initializing => 0x01,
            PortState::Faulty => 0x02,
            PortState::Disabled => 0x03,
            PortState::Listening => 0x04,
            PortState::PreMaster => 0x05,
            PortState::Master => 0x06,
            PortState::Passive => 0x07,
            PortState::Uncalibrated => 0x08,
            PortState::Slave => 0x09,
        }
    }

    /// Ports in these states take no part in master selection
    pub fn is_inactive(&self) -> bool {
        matches!(self, PortState::Disabled | PortState::Faulty)
    }
}

impl Display for PortState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Initializing => write!(f, "Initializing"),
            PortState::Faulty => write!(f, "Faulty"),
            PortState::Disabled => write!(f, "Disabled"),
            PortState::Listening => write!(f, "Listening"),
            PortState::PreMaster => write!(f, "Pre-Master"),
            PortState::Master => write!(f, "Master"),
            PortState::Passive => write!(f, "Passive"),
            PortState::Uncalibrated => write!(f, "Uncalibrated"),
            PortState::Slave => write!(f, "Slave"),
        }
    }
}
