use super::Event;
use crate::{
    datastructures::messages::CodecError, network::NetworkError, servo::ServoError,
    timestamper::TimestampError,
};

pub type Result<T, E = PortError> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("message codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("servo error: {0}")]
    Servo(#[from] ServoError),
    #[error("event {0} is not handled")]
    UnhandledEvent(Event),
    #[error("could not start receive thread: {0}")]
    Spawn(std::io::Error),
    #[error("link closed before signalling ready")]
    LinkNotReady,
    #[error("port is no longer registered")]
    Removed,
}
