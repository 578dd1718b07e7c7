//! Datastructures shared by the protocol, following IEEE 802.1AS

pub mod common;
pub mod messages;
