use serde::{Deserialize, Serialize};

use super::Header;
use crate::{datastructures::common::PortIdentity, time::Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PDelayReqMessage {
    pub header: Header,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PDelayRespMessage {
    pub header: Header,
    pub request_receipt_timestamp: Timestamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PDelayRespFollowUpMessage {
    pub header: Header,
    pub response_origin_timestamp: Timestamp,
    pub requesting_port_identity: PortIdentity,
}
