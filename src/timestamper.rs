//! Access to the timestamping device of a port
//!
//! A port either has a hardware timestamper or falls back to reading the
//! system clock when a message is sent or received. The choice is made once
//! when the port is built.

use std::time::Duration;

use tracing::{debug, trace};

use crate::{
    datastructures::{common::PortIdentity, messages::MessageType},
    time::{self, Timestamp},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("timestamp not yet available")]
    WouldBlock,
    #[error("timestamp could not be retrieved")]
    Fatal,
}

/// Simultaneous reading of the system clock and the device clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTime {
    pub system: Timestamp,
    pub device: Timestamp,
}

/// Identifies the message a timestamp is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampKey {
    pub port_identity: PortIdentity,
    pub sequence_id: u16,
    pub message_type: MessageType,
}

/// Steering of the local oscillator
pub trait ClockAdjust {
    /// Adjust the clock frequency by `ppm` parts per million
    fn adjust_clock_rate(&mut self, ppm: f32) -> bool;

    /// Step the clock phase by `offset` nanoseconds
    fn adjust_clock_phase(&mut self, offset: i64) -> bool;

    /// Block outgoing transmissions so that no timestamp straddles a phase
    /// step
    fn suspend_transmission(&mut self) -> bool;

    fn resume_transmission(&mut self) -> bool;
}

pub trait HardwareTimestamper: ClockAdjust + Send {
    /// `last` is set on the final attempt of a retry sequence, so the
    /// device may drop any state kept for the message.
    fn tx_timestamp(&mut self, key: &TimestampKey, last: bool) -> Result<Timestamp, TimestampError>;

    fn rx_timestamp(&mut self, key: &TimestampKey, last: bool) -> Result<Timestamp, TimestampError>;

    fn device_time(&mut self) -> Result<DeviceTime, TimestampError>;

    /// Identifies the clock domain of the device. Timestamps of devices
    /// with equal ids are directly comparable.
    fn device_id(&self) -> u32 {
        0
    }
}

pub enum Timestamper {
    Hardware(Box<dyn HardwareTimestamper>),
    SoftwareFallback,
}

impl std::fmt::Debug for Timestamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timestamper::Hardware(_) => write!(f, "Timestamper::Hardware"),
            Timestamper::SoftwareFallback => write!(f, "Timestamper::SoftwareFallback"),
        }
    }
}

impl Timestamper {
    pub fn new(hardware: Option<Box<dyn HardwareTimestamper>>) -> Self {
        match hardware {
            Some(hardware) => Timestamper::Hardware(hardware),
            None => Timestamper::SoftwareFallback,
        }
    }

    pub fn tx_timestamp(
        &mut self,
        key: &TimestampKey,
        last: bool,
    ) -> Result<Timestamp, TimestampError> {
        match self {
            Timestamper::Hardware(hw) => hw.tx_timestamp(key, last),
            Timestamper::SoftwareFallback => Ok(time::system_time()),
        }
    }

    pub fn rx_timestamp(
        &mut self,
        key: &TimestampKey,
        last: bool,
    ) -> Result<Timestamp, TimestampError> {
        match self {
            Timestamper::Hardware(hw) => hw.rx_timestamp(key, last),
            Timestamper::SoftwareFallback => Ok(time::system_time()),
        }
    }

    pub fn device_time(&mut self) -> Result<DeviceTime, TimestampError> {
        match self {
            Timestamper::Hardware(hw) => hw.device_time(),
            Timestamper::SoftwareFallback => {
                let now = time::system_time();
                Ok(DeviceTime {
                    system: now,
                    device: now,
                })
            }
        }
    }

    pub fn device_id(&self) -> u32 {
        match self {
            Timestamper::Hardware(hw) => hw.device_id(),
            Timestamper::SoftwareFallback => 0,
        }
    }
}

impl ClockAdjust for Timestamper {
    fn adjust_clock_rate(&mut self, ppm: f32) -> bool {
        match self {
            Timestamper::Hardware(hw) => hw.adjust_clock_rate(ppm),
            Timestamper::SoftwareFallback => false,
        }
    }

    fn adjust_clock_phase(&mut self, offset: i64) -> bool {
        match self {
            Timestamper::Hardware(hw) => hw.adjust_clock_phase(offset),
            Timestamper::SoftwareFallback => false,
        }
    }

    fn suspend_transmission(&mut self) -> bool {
        match self {
            Timestamper::Hardware(hw) => hw.suspend_transmission(),
            Timestamper::SoftwareFallback => true,
        }
    }

    fn resume_transmission(&mut self) -> bool {
        match self {
            Timestamper::Hardware(hw) => hw.resume_transmission(),
            Timestamper::SoftwareFallback => true,
        }
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Bounded retry with exponential backoff for timestamp retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub retries: u32,
    /// Sleep before the first retry, doubled before each following one
    pub base_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 6,
            base_timeout: Duration::from_micros(1000),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds, fails fatally or the retries are
    /// exhausted. Also returns the total time spent sleeping.
    pub fn run<T>(
        &self,
        sleeper: &dyn Sleeper,
        mut attempt: impl FnMut(bool) -> Result<T, TimestampError>,
    ) -> (Result<T, TimestampError>, Duration) {
        let mut waited = Duration::ZERO;
        let mut timeout = self.base_timeout;
        let mut remaining = self.retries;

        let mut result = attempt(remaining == 0);
        while let Err(TimestampError::WouldBlock) = result {
            if remaining == 0 {
                break;
            }
            sleeper.sleep(timeout);
            waited += timeout;
            timeout *= 2;
            remaining -= 1;
            trace!(remaining, "retrying timestamp retrieval");
            result = attempt(remaining == 0);
        }

        if let Err(error) = &result {
            debug!(?error, ?waited, "giving up on timestamp");
        }

        (result, waited)
    }
}
