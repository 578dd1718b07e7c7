use serde::{Deserialize, Serialize};

use crate::{datastructures::common::PortIdentity, time::TimeInterval};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    pub domain_number: u8,
    pub two_step_flag: bool,
    pub correction_field: TimeInterval,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub log_message_interval: i8,
}

impl Header {
    pub fn new(source_port_identity: PortIdentity, sequence_id: u16) -> Self {
        Header {
            source_port_identity,
            sequence_id,
            ..Default::default()
        }
    }
}
