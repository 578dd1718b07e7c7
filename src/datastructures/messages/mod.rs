//! Ptp network messages
//!
//! Only the message content lives here. Turning messages into octets and
//! back is done by a [MessageCodec] supplied by the platform.

use serde::{Deserialize, Serialize};

mod announce;
mod header;
mod p_delay;
mod sync;

pub use announce::*;
pub use header::*;
pub use p_delay::*;
pub use sync::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Sync = 0x0,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    PDelayRespFollowUp = 0xA,
    Announce = 0xB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Sync(SyncMessage),
    PDelayReq(PDelayReqMessage),
    PDelayResp(PDelayRespMessage),
    FollowUp(FollowUpMessage),
    PDelayRespFollowUp(PDelayRespFollowUpMessage),
    Announce(AnnounceMessage),
}

impl Message {
    pub fn header(&self) -> &Header {
        match self {
            Message::Sync(m) => &m.header,
            Message::PDelayReq(m) => &m.header,
            Message::PDelayResp(m) => &m.header,
            Message::FollowUp(m) => &m.header,
            Message::PDelayRespFollowUp(m) => &m.header,
            Message::Announce(m) => &m.header,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Sync(_) => MessageType::Sync,
            Message::PDelayReq(_) => MessageType::PDelayReq,
            Message::PDelayResp(_) => MessageType::PDelayResp,
            Message::FollowUp(_) => MessageType::FollowUp,
            Message::PDelayRespFollowUp(_) => MessageType::PDelayRespFollowUp,
            Message::Announce(_) => MessageType::Announce,
        }
    }

    /// Event messages are timestamped on transmission and reception
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            Message::Sync(_) | Message::PDelayReq(_) | Message::PDelayResp(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too small for message")]
    BufferTooSmall,
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Conversion between messages and their wire representation
pub trait MessageCodec: Send + Sync {
    /// Write `message` into `buffer`, returning the number of bytes used
    fn encode(&self, message: &Message, buffer: &mut [u8]) -> Result<usize, CodecError>;

    fn decode(&self, buffer: &[u8]) -> Result<Message, CodecError>;
}
