//! Media dependent parts of a port
//!
//! A [MediaPort] performs the message exchanges of a port on one kind of
//! link. [EtherPort] uses event messages with transmit and receive
//! timestamps, [WirelessPort] uses the timing measurement dialogs of a
//! wireless driver.

mod ether;
mod wireless;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

pub use ether::EtherPort;
use tracing::{debug, error, warn};
pub use wireless::{
    TimingMeasurementRequest, WirelessDialog, WirelessDriver, WirelessPort, MAX_DIALOG_TOKEN,
};

use crate::{
    clock::{MasterOffset, SyncRelayInfo},
    datastructures::messages::{FollowUpMessage, Header, Message, MessageCodec, SyncMessage},
    network::{MacAddress, NetworkError, NetworkInterface},
    port::{Event, Port, PortContext, PortInner, PortState, Result},
    time::{TimeInterval, Timestamp},
    timestamper::{DeviceTime, Timestamper},
};

/// One way link delay assumed before the first measurement, in nanoseconds
pub const INITIAL_LINK_DELAY: i64 = 3_600_000_000_000;

/// Largest frame handled by the receive loops
pub const MAX_FRAME_SIZE: usize = 1518;

/// Shared stop flag for a receive loop
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Transmit timestamp of an outstanding message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTimestamp {
    /// Sent, timestamp not yet retrieved
    Pending,
    /// Retrieval failed
    Invalid,
    Valid(Timestamp),
}

impl MessageTimestamp {
    pub fn valid(self) -> Option<Timestamp> {
        match self {
            MessageTimestamp::Valid(timestamp) => Some(timestamp),
            _ => None,
        }
    }
}

/// A Sync waiting for its FollowUp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceivedSync {
    pub message: SyncMessage,
    pub arrival: Timestamp,
    pub device_id: u32,
}

pub trait MediaPort: Send + Sync {
    /// Receive and dispatch frames until `cancel` is set or the link fails.
    /// `ready` is signalled once the link is listening.
    fn receive_loop(&self, port: &Arc<Port>, ready: mpsc::Sender<()>, cancel: &CancellationToken);

    /// Handle a single received frame. Takes the dispatch, clock, port,
    /// media and timestamper locks in that order.
    fn receive_frame(&self, port: &Port, source: MacAddress, frame: &[u8]);

    /// Start a peer delay exchange, returning the time spent waiting for
    /// timestamps. Called with the port lock held.
    fn process_pdelay(&self, port: &Port, inner: &mut PortInner, sequence_id: u16) -> Duration;

    /// Send a Sync and its FollowUp, returning the time spent waiting for
    /// timestamps. Called with the clock and port locks held.
    fn process_sync(
        &self,
        context: &mut PortContext<'_>,
        sequence_id: u16,
        grandmaster: bool,
    ) -> Duration;

    /// Send a message that needs no timestamp
    fn send_general(&self, message: &Message) -> Result<()>;

    /// Current one way link delay estimate in nanoseconds
    fn link_delay(&self) -> i64;

    /// Whether as capable is decided by peer delay measurement
    fn uses_pdelay(&self) -> bool {
        true
    }
}

pub(crate) fn encode(codec: &dyn MessageCodec, message: &Message) -> Result<Vec<u8>> {
    let mut buffer = [0u8; MAX_FRAME_SIZE];
    let length = codec.encode(message, &mut buffer)?;
    Ok(buffer[..length].to_vec())
}

/// Receive loop shared by the link types: runs until cancelled, turns a
/// fatal network error into [Event::FaultDetected].
pub(crate) fn run_receive_loop(
    network: &dyn NetworkInterface,
    media: &dyn MediaPort,
    port: &Arc<Port>,
    ready: mpsc::Sender<()>,
    cancel: &CancellationToken,
) {
    let mut buffer = [0u8; MAX_FRAME_SIZE];
    if ready.send(()).is_err() {
        debug!(port = %port.identity(), "nobody waiting for the link to open");
    }

    while !cancel.is_cancelled() {
        match network.recv(&mut buffer) {
            Ok((source, length)) => {
                if cancel.is_cancelled() {
                    break;
                }
                media.receive_frame(port, source, &buffer[..length]);
            }
            Err(NetworkError::Transient) => continue,
            Err(NetworkError::Fatal(reason)) => {
                error!(port = %port.identity(), %reason, "receive failed, closing link");
                if let Err(error) = port.handle_event(Event::FaultDetected) {
                    warn!(port = %port.identity(), %error, "could not report fault");
                }
                break;
            }
        }
    }
    debug!(port = %port.identity(), "receive loop finished");
}

pub(crate) fn offset_by(timestamp: Timestamp, nanos: i64) -> Timestamp {
    if nanos >= 0 {
        timestamp.add_nanos(nanos as u64)
    } else {
        timestamp.sub_nanos(nanos.unsigned_abs())
    }
}

/// Process a FollowUp matched to its Sync: compute the offset to the
/// master and, on a slave port, steer the local clock and record the
/// timing for relaying on master ports.
pub(crate) fn process_follow_up(
    context: &mut PortContext<'_>,
    timestamper: &mut Timestamper,
    sync: &ReceivedSync,
    follow_up: &FollowUpMessage,
    link_delay: i64,
) {
    let port = context.port;
    let clock = &mut *context.clock;
    let inner = &mut *context.inner;

    let master_rate = follow_up.rate_ratio() * inner.peer_rate_ratio;
    let correction = (link_delay as f64 * master_rate) as i64
        + follow_up.header.correction_field.whole_nanos()
        + sync.message.header.correction_field.whole_nanos();
    let master_time = offset_by(follow_up.precise_origin_timestamp, correction);
    let master_local_offset = sync.arrival.nanos_since(&master_time);

    let master_local_freq_offset = match clock.calc_master_local_rate(master_time, sync.arrival)
    {
        Ok(rate) => rate,
        Err(error) => {
            error!(port = %port.identity(), %error, "skipping synchronization cycle");
            return;
        }
    };

    if inner.last_gm_time_base_indicator != 0
        && follow_up.gm_time_base_indicator != inner.last_gm_time_base_indicator
    {
        warn!(port = %port.identity(), "grandmaster time base changed");
    }
    inner.last_gm_time_base_indicator = follow_up.gm_time_base_indicator;

    if inner.state() != PortState::Slave {
        return;
    }
    inner.sync_count += 1;

    let now = timestamper.device_time().unwrap_or_else(|error| {
        debug!(%error, "device time unavailable, using sync arrival");
        DeviceTime {
            system: sync.arrival,
            device: sync.arrival,
        }
    });
    let local_system_freq_offset = clock
        .calc_local_system_rate(now.device, now.system)
        .unwrap_or(1.0);

    let since_arrival = now.device.nanos_since(&sync.arrival) as f64 / local_system_freq_offset;
    let system_at_arrival = offset_by(now.system, -(since_arrival as i64));
    let local_system_offset = system_at_arrival.nanos_since(&sync.arrival);

    clock.set_master_offset(&MasterOffset {
        master_local_offset,
        local_system_offset,
        master_local_freq_offset,
        local_system_freq_offset,
        local_time: sync.arrival.to_nanos(),
        sync_count: inner.sync_count,
        pdelay_count: inner.pdelay_count,
        port_state: inner.state(),
        as_capable: inner.as_capable(),
    });

    if let Err(error) =
        inner
            .servo
            .adjust_phase_error(timestamper, master_local_offset, master_local_freq_offset)
    {
        debug!(port = %port.identity(), %error, "clock left unadjusted this cycle");
    }

    clock.set_last_sync(SyncRelayInfo {
        precise_origin: follow_up.precise_origin_timestamp,
        correction: TimeInterval::from_nanos(correction),
        receive_device_time: sync.arrival,
        receive_system_time: system_at_arrival,
        device_id: sync.device_id,
        cumulative_rate_ratio: master_rate,
        gm_time_base_indicator: follow_up.gm_time_base_indicator,
    });

    port.restart_sync_receipt_timer(inner);
}

/// Build the FollowUp for a Sync that left at `departure`. A grandmaster
/// sends its own time, a boundary clock relays the last received sync with
/// its residence time added. `None` when there is nothing to relay.
pub(crate) fn build_follow_up(
    context: &PortContext<'_>,
    header: Header,
    departure: Timestamp,
    now: DeviceTime,
    device_id: u32,
    grandmaster: bool,
) -> Option<FollowUpMessage> {
    let (precise_origin, correction, rate_ratio, gm_time_base_indicator) = if grandmaster {
        (departure, TimeInterval::default(), 1.0, 0)
    } else {
        let last = context.clock.last_sync()?;
        if last.device_id == device_id {
            let residence = departure.nanos_since(&last.receive_device_time) as f64
                * last.cumulative_rate_ratio;
            (
                last.precise_origin,
                last.correction + TimeInterval::from_nanos(residence as i64),
                last.cumulative_rate_ratio,
                last.gm_time_base_indicator,
            )
        } else {
            let local_system = context.clock.local_system_freq_offset();
            let master_system = context.clock.master_system_freq_offset();
            let since_departure = now.device.nanos_since(&departure) as f64 / local_system;
            let system_at_departure = offset_by(now.system, -(since_departure as i64));
            let residence =
                system_at_departure.nanos_since(&last.receive_system_time) as f64 * master_system;
            (
                last.precise_origin,
                last.correction + TimeInterval::from_nanos(residence as i64),
                master_system / local_system,
                last.gm_time_base_indicator,
            )
        }
    };

    Some(FollowUpMessage {
        header: Header {
            correction_field: correction,
            ..header
        },
        precise_origin_timestamp: precise_origin,
        cumulative_scaled_rate_offset: FollowUpMessage::scaled_rate_offset(rate_ratio),
        gm_time_base_indicator,
    })
}

/// Offsets published by the grandmaster, where the master is the local
/// clock itself
pub(crate) fn publish_grandmaster_offset(context: &mut PortContext<'_>, now: DeviceTime) {
    let local_system_freq_offset = context
        .clock
        .calc_local_system_rate(now.device, now.system)
        .unwrap_or(1.0);

    context.clock.set_master_offset(&MasterOffset {
        master_local_offset: 0,
        local_system_offset: now.system.nanos_since(&now.device),
        master_local_freq_offset: 1.0,
        local_system_freq_offset,
        local_time: now.device.to_nanos(),
        sync_count: context.inner.sync_count,
        pdelay_count: context.inner.pdelay_count,
        port_state: context.inner.state(),
        as_capable: context.inner.as_capable(),
    });
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard, Weak};

    use super::*;
    use crate::{
        clock::{Clock, DefaultDs},
        datastructures::common::{ClockIdentity, PortIdentity},
        port::PortSettings,
        timer::{lock, EventScheduler, EventTarget, TimerHandle, TimerKey},
    };

    #[derive(Default)]
    struct NoTimers(Mutex<()>);

    impl EventScheduler for NoTimers {
        fn schedule(&self, _: Weak<dyn EventTarget>, _: TimerKey, _: Duration) -> TimerHandle {
            TimerHandle::new(0)
        }

        fn cancel(&self, _: TimerKey) {}

        fn dispatch_lock(&self) -> MutexGuard<'_, ()> {
            lock(&self.0)
        }
    }

    struct Idle;

    impl MediaPort for Idle {
        fn receive_loop(&self, _: &Arc<Port>, _: mpsc::Sender<()>, _: &CancellationToken) {}

        fn receive_frame(&self, _: &Port, _: MacAddress, _: &[u8]) {}

        fn process_pdelay(&self, _: &Port, _: &mut PortInner, _: u16) -> Duration {
            Duration::ZERO
        }

        fn process_sync(&self, _: &mut PortContext<'_>, _: u16, _: bool) -> Duration {
            Duration::ZERO
        }

        fn send_general(&self, _: &Message) -> Result<()> {
            Ok(())
        }

        fn link_delay(&self) -> i64 {
            0
        }
    }

    // one part in 4096, exact in binary
    const RATE: f64 = 1.0 + 1.0 / 4096.0;

    fn relay_port() -> (Arc<Clock>, Arc<Port>) {
        let clock = Clock::new(
            DefaultDs::new(ClockIdentity([7; 8])),
            Arc::new(NoTimers::default()),
            None,
        );
        let port = Port::new(clock.clone(), 2, Box::new(Idle), PortSettings::default());
        (clock, port)
    }

    fn received_sync() -> SyncRelayInfo {
        SyncRelayInfo {
            precise_origin: Timestamp::new(100, 0),
            correction: TimeInterval::from_nanos(500),
            receive_device_time: Timestamp::new(200, 0),
            receive_system_time: Timestamp::new(300, 0),
            device_id: 7,
            cumulative_rate_ratio: RATE,
            gm_time_base_indicator: 3,
        }
    }

    fn follow_up(
        clock: &Clock,
        port: &Port,
        departure: Timestamp,
        now: DeviceTime,
        device_id: u32,
    ) -> Option<FollowUpMessage> {
        let mut clock_state = clock.lock();
        let mut inner = port.lock_inner();
        let context = PortContext {
            port,
            clock: &mut clock_state,
            inner: &mut inner,
        };
        let header = Header::new(PortIdentity::default(), 9);
        build_follow_up(&context, header, departure, now, device_id, false)
    }

    #[test]
    fn nothing_to_relay_without_a_received_sync() {
        let (clock, port) = relay_port();
        let now = DeviceTime {
            system: Timestamp::new(1, 0),
            device: Timestamp::new(1, 0),
        };
        assert!(follow_up(&clock, &port, Timestamp::new(1, 0), now, 7).is_none());
    }

    #[test]
    fn relay_on_the_same_device_scales_by_cumulative_rate() {
        let (clock, port) = relay_port();
        clock.lock().set_last_sync(received_sync());

        let departure = Timestamp::new(200, 4096);
        let now = DeviceTime {
            system: Timestamp::new(300, 8192),
            device: Timestamp::new(200, 8192),
        };
        let relayed = follow_up(&clock, &port, departure, now, 7).unwrap();

        // 4096 ns of residence at the grandmaster rate
        assert_eq!(relayed.header.correction_field.whole_nanos(), 500 + 4097);
        assert_eq!(relayed.header.sequence_id, 9);
        assert_eq!(relayed.precise_origin_timestamp, Timestamp::new(100, 0));
        assert_eq!(
            relayed.cumulative_scaled_rate_offset,
            FollowUpMessage::scaled_rate_offset(RATE)
        );
        assert_eq!(relayed.cumulative_scaled_rate_offset, 1 << 29);
        assert_eq!(relayed.gm_time_base_indicator, 3);
    }

    #[test]
    fn relay_across_devices_goes_through_the_system_clock() {
        let (clock, port) = relay_port();
        {
            let mut state = clock.lock();
            state.set_last_sync(received_sync());
            // device runs at twice the system rate
            state.set_master_offset(&MasterOffset {
                master_local_offset: 0,
                local_system_offset: 0,
                master_local_freq_offset: RATE,
                local_system_freq_offset: 2.0,
                local_time: 0,
                sync_count: 1,
                pdelay_count: 1,
                port_state: PortState::Slave,
                as_capable: true,
            });
        }

        let departure = Timestamp::new(200, 4096);
        let now = DeviceTime {
            system: Timestamp::new(300, 8192),
            device: Timestamp::new(200, 8192),
        };
        let relayed = follow_up(&clock, &port, departure, now, 8).unwrap();

        // departure is 2048 system ns before now, 6144 after the receipt,
        // scaled by the master to system rate of 2 + 2^-11
        assert_eq!(relayed.header.correction_field.whole_nanos(), 500 + 12291);
        assert_eq!(relayed.precise_origin_timestamp, Timestamp::new(100, 0));
        assert_eq!(
            relayed.cumulative_scaled_rate_offset,
            FollowUpMessage::scaled_rate_offset(RATE)
        );
        assert_eq!(relayed.gm_time_base_indicator, 3);
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::default();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn signed_offsets() {
        let base = Timestamp::new(10, 500);
        assert_eq!(offset_by(base, 600), Timestamp::new(10, 1100));
        assert_eq!(offset_by(base, -1_000), Timestamp::new(9, 999_999_500));
        assert_eq!(offset_by(base, 0), base);
    }

    #[test]
    fn only_valid_timestamps_are_usable() {
        assert_eq!(MessageTimestamp::Pending.valid(), None);
        assert_eq!(MessageTimestamp::Invalid.valid(), None);
        assert_eq!(
            MessageTimestamp::Valid(Timestamp::new(1, 0)).valid(),
            Some(Timestamp::new(1, 0))
        );
    }
}
