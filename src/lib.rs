//! An IEEE 802.1AS (gPTP) time synchronization engine.
//!
//! The engine selects a grandmaster among the clocks of a network, measures
//! the delay of each link with its neighbor and steers the local clock to
//! the grandmaster. It is built around three parts:
//!
//! - A [`Clock`] owns the ports of a time-aware system and runs master
//!   selection over the announce messages they qualified.
//! - A [`Port`] runs the per port state machine driven by [`port::Event`]s.
//! - A [`media::MediaPort`] performs the actual message exchanges on an
//!   ethernet or wireless link.
//!
//! Everything platform specific is supplied through traits: the link layer
//! socket ([`network::NetworkInterface`]), the message codec
//! ([`datastructures::messages::MessageCodec`]), the timestamping device
//! ([`timestamper::HardwareTimestamper`]) and an optional telemetry sink
//! ([`clock::IpcSink`]).
//!
//! Locks are always acquired in the order timer dispatch, clock, port,
//! media dependent port, timestamper.

pub mod bmc;
pub mod clock;
pub mod config;
pub mod datastructures;
pub mod instance;
pub mod media;
pub mod network;
pub mod port;
pub mod servo;
pub mod time;
pub mod timer;
pub mod timestamper;
pub mod tracing;

pub use clock::{Clock, DefaultDs};
pub use config::Config;
pub use instance::Instance;
pub use port::{Port, PortSettings, PortState};
pub use timer::TimerQueue;
