//! The media independent part of a gPTP port
//!
//! A [Port] runs the per port state machine: it reacts to [Event]s from
//! the timer queue and the receive path, decides when Sync, Announce and
//! peer delay exchanges happen and tracks the port state and capability.
//! The actual I/O is delegated to a [MediaPort].
//!
//! Locks are always taken in the order clock, port, media dependent port,
//! timestamper. Handlers that need clock state take the clock lock first.

mod error;
mod event;
mod sequence_id;
mod state;

use std::{
    sync::{mpsc, Arc, Mutex, MutexGuard, Weak},
    thread::JoinHandle,
    time::Duration,
};

pub use error::{PortError, Result};
pub use event::Event;
pub use sequence_id::SequenceIdGenerator;
pub use state::PortState;
use tracing::{debug, error, info, warn};

use crate::{
    bmc,
    clock::{Clock, ClockState},
    datastructures::{
        common::PortIdentity,
        messages::{AnnounceMessage, Header, Message, MAX_STEPS_REMOVED},
    },
    media::{CancellationToken, MediaPort},
    network::MacAddress,
    servo::{Servo, ServoConfig},
    time::{Interval, Timestamp},
    timer::{lock, EventTarget, EVENT_TIMER_GRANULARITY},
};

/// Delay before the first announce, the first sync and master selection
pub const STARTUP_DELAY: Duration = Duration::from_millis(16);
/// Delay before the first peer delay request
pub const PDELAY_STARTUP_DELAY: Duration = Duration::from_millis(32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortSettings {
    pub sync_interval: Interval,
    pub announce_interval: Interval,
    pub pdelay_interval: Interval,
    pub announce_receipt_timeout: u32,
    pub sync_receipt_timeout: u32,
    pub pdelay_resp_receipt_timeout: u32,
    /// Largest link delay, in nanoseconds, for which the port is as capable
    pub neighbor_prop_delay_thresh: i64,
    /// Syncs sent at the timer granularity after becoming master, before
    /// announcing starts
    pub accelerated_sync_count: u32,
    pub servo: ServoConfig,
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettings {
            sync_interval: Interval::EIGHTH_SECOND,
            announce_interval: Interval::ONE_SECOND,
            pdelay_interval: Interval::ONE_SECOND,
            announce_receipt_timeout: 3,
            sync_receipt_timeout: 3,
            pdelay_resp_receipt_timeout: 3,
            neighbor_prop_delay_thresh: 800,
            accelerated_sync_count: 0,
            servo: ServoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCounters {
    pub rx_sync: u32,
    pub rx_follow_up: u32,
    pub rx_announce: u32,
    pub rx_pdelay_req: u32,
    pub rx_pdelay_resp: u32,
    pub rx_pdelay_resp_follow_up: u32,
    pub rx_discarded: u32,
    pub tx_sync: u32,
    pub tx_follow_up: u32,
    pub tx_announce: u32,
    pub tx_pdelay_req: u32,
    pub tx_pdelay_resp: u32,
    pub tx_pdelay_resp_follow_up: u32,
    pub announce_receipt_timeouts: u32,
    pub sync_receipt_timeouts: u32,
    pub pdelay_resp_receipt_timeouts: u32,
}

/// Port state guarded by the port lock
#[derive(Debug)]
pub struct PortInner {
    state: PortState,
    as_capable: bool,
    sync_interval: Interval,
    announce_interval: Interval,
    pdelay_interval: Interval,
    announce_sequence: SequenceIdGenerator,
    sync_sequence: SequenceIdGenerator,
    pdelay_sequence: SequenceIdGenerator,
    qualified_announce: Option<AnnounceMessage>,
    pub(crate) peer_rate_ratio: f64,
    accelerated_sync_count: i32,
    pub(crate) servo: Servo,
    pub(crate) sync_count: u32,
    pub(crate) pdelay_count: u32,
    pub(crate) last_gm_time_base_indicator: u16,
    pub(crate) counters: PortCounters,
}

impl PortInner {
    fn new(settings: &PortSettings) -> Self {
        PortInner {
            state: PortState::Initializing,
            as_capable: false,
            sync_interval: settings.sync_interval,
            announce_interval: settings.announce_interval,
            pdelay_interval: settings.pdelay_interval,
            announce_sequence: SequenceIdGenerator::new(),
            sync_sequence: SequenceIdGenerator::new(),
            pdelay_sequence: SequenceIdGenerator::new(),
            qualified_announce: None,
            peer_rate_ratio: 1.0,
            accelerated_sync_count: -1,
            servo: Servo::new(settings.servo),
            sync_count: 0,
            pdelay_count: 0,
            last_gm_time_base_indicator: 0,
            counters: PortCounters::default(),
        }
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn as_capable(&self) -> bool {
        self.as_capable
    }

    pub fn sync_interval(&self) -> Interval {
        self.sync_interval
    }

    pub fn announce_interval(&self) -> Interval {
        self.announce_interval
    }

    pub fn pdelay_interval(&self) -> Interval {
        self.pdelay_interval
    }

    /// Best announce received on this port (ERBest)
    pub fn qualified_announce(&self) -> Option<&AnnounceMessage> {
        self.qualified_announce.as_ref()
    }
}

/// Everything a media dependent port needs while the clock and port locks
/// are held
pub struct PortContext<'a> {
    pub port: &'a Port,
    pub clock: &'a mut ClockState,
    pub inner: &'a mut PortInner,
}

pub struct Port {
    identity: PortIdentity,
    settings: PortSettings,
    clock: Arc<Clock>,
    media: Box<dyn MediaPort>,
    inner: Mutex<PortInner>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    this: Weak<Port>,
}

fn at_least_granularity(delay: Duration) -> Duration {
    delay.max(EVENT_TIMER_GRANULARITY)
}

impl Port {
    /// Create a port and register it with its clock
    pub fn new(
        clock: Arc<Clock>,
        port_number: u16,
        media: Box<dyn MediaPort>,
        settings: PortSettings,
    ) -> Arc<Port> {
        let identity = PortIdentity {
            clock_identity: clock.identity(),
            port_number,
        };
        let port = Arc::new_cyclic(|this| Port {
            identity,
            settings,
            clock: clock.clone(),
            media,
            inner: Mutex::new(PortInner::new(&settings)),
            receiver: Mutex::new(None),
            cancel: CancellationToken::default(),
            this: this.clone(),
        });
        clock.register_port(port.clone());
        port
    }

    pub fn identity(&self) -> PortIdentity {
        self.identity
    }

    pub fn port_number(&self) -> u16 {
        self.identity.port_number
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn media(&self) -> &dyn MediaPort {
        &*self.media
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    pub(crate) fn weak(&self) -> Weak<Port> {
        self.this.clone()
    }

    /// Take the port lock. The clock lock, when needed, must be taken
    /// before this one.
    pub fn lock_inner(&self) -> MutexGuard<'_, PortInner> {
        lock(&self.inner)
    }

    pub fn state(&self) -> PortState {
        self.lock_inner().state
    }

    pub fn as_capable(&self) -> bool {
        self.lock_inner().as_capable
    }

    pub fn counters(&self) -> PortCounters {
        self.lock_inner().counters
    }

    pub fn sync_count(&self) -> u32 {
        self.lock_inner().sync_count
    }

    pub fn pdelay_count(&self) -> u32 {
        self.lock_inner().pdelay_count
    }

    pub fn peer_rate_ratio(&self) -> f64 {
        self.lock_inner().peer_rate_ratio
    }

    pub fn qualified_announce(&self) -> Option<AnnounceMessage> {
        self.lock_inner().qualified_announce
    }

    /// Feed a frame received on the link into the port
    pub fn receive_frame(&self, source: MacAddress, frame: &[u8]) {
        if self.state() == PortState::Disabled {
            debug!(port = %self.identity, "frame for stopped port dropped");
            return;
        }
        self.media.receive_frame(self, source, frame);
    }

    pub(crate) fn add_event_timer(&self, event: Event, delay: Duration) {
        self.clock.add_event_timer(self, event, delay);
    }

    pub(crate) fn delete_event_timer(&self, event: Event) {
        self.clock.delete_event_timer(self, event);
    }

    pub(crate) fn header(&self, sequence_id: u16, interval: Interval) -> Header {
        Header {
            domain_number: self.clock.default_ds().domain_number,
            log_message_interval: interval.as_log_2(),
            ..Header::new(self.identity, sequence_id)
        }
    }

    /// Process a single event. Must be called without holding any of the
    /// clock, port or media locks.
    pub fn handle_event(&self, event: Event) -> Result<()> {
        match event {
            Event::Powerup | Event::Initialize => self.power_up(),
            Event::StateChange => {
                self.clock.state_change();
                Ok(())
            }
            Event::AnnounceReceiptTimeoutExpires | Event::SyncReceiptTimeoutExpires => {
                self.receipt_timeout(event);
                Ok(())
            }
            Event::PDelayIntervalTimeoutExpires => {
                self.pdelay_interval();
                Ok(())
            }
            Event::SyncIntervalTimeoutExpires => {
                self.sync_interval();
                Ok(())
            }
            Event::AnnounceIntervalTimeoutExpires => self.announce_interval(),
            Event::PDelayRespReceiptTimeoutExpires => {
                let mut inner = self.lock_inner();
                inner.counters.pdelay_resp_receipt_timeouts += 1;
                inner.pdelay_count = 0;
                self.unset_as_capable(&mut inner);
                Ok(())
            }
            Event::FaultDetected => {
                error!(port = %self.identity, "fault detected, port needs a restart");
                Ok(())
            }
            Event::Null | Event::QualificationTimeoutExpires | Event::PDelayDeferredProcessing => {
                Err(PortError::UnhandledEvent(event))
            }
        }
    }

    fn power_up(&self) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.state == PortState::Disabled {
            debug!(port = %self.identity, "stopped port is not powered up");
            return Ok(());
        }

        if self.media.uses_pdelay() {
            if !matches!(inner.state, PortState::Slave | PortState::Master) {
                self.add_event_timer(Event::PDelayIntervalTimeoutExpires, PDELAY_STARTUP_DELAY);
            }
        } else {
            self.set_as_capable(&mut inner);
        }

        if self.clock.default_ds().slave_only() || inner.state == PortState::Slave {
            self.become_slave(&mut inner, false);
        } else if inner.state == PortState::Master {
            self.become_master(&mut inner, true);
        }

        self.open_link()
    }

    /// Start the receive thread and wait until it is listening
    fn open_link(&self) -> Result<()> {
        let mut receiver = lock(&self.receiver);
        if receiver.is_some() {
            return Ok(());
        }

        let port = self.this.upgrade().ok_or(PortError::Removed)?;
        let cancel = self.cancel.clone();
        let (ready_sender, ready) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(format!("gptp-port-{}", self.port_number()))
            .spawn(move || port.media.receive_loop(&port, ready_sender, &cancel))
            .map_err(PortError::Spawn)?;
        *receiver = Some(handle);

        ready.recv().map_err(|_| PortError::LinkNotReady)
    }

    /// Stop the receive thread, cancel all timers of this port and remove
    /// it from its clock.
    pub fn stop(&self) {
        self.lock_inner().state = PortState::Disabled;
        self.cancel.cancel();

        for event in [
            Event::StateChange,
            Event::SyncIntervalTimeoutExpires,
            Event::PDelayIntervalTimeoutExpires,
            Event::SyncReceiptTimeoutExpires,
            Event::AnnounceReceiptTimeoutExpires,
            Event::AnnounceIntervalTimeoutExpires,
            Event::PDelayRespReceiptTimeoutExpires,
        ] {
            self.delete_event_timer(event);
        }
        self.clock.remove_port(self.port_number());

        let handle = lock(&self.receiver).take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                warn!(port = %self.identity, "receive thread panicked");
            }
        }

        info!(port = %self.identity, "port stopped");
    }

    fn receipt_timeout(&self, event: Event) {
        let mut clock = self.clock.lock();
        let mut inner = self.lock_inner();
        if inner.state == PortState::Disabled {
            return;
        }

        if event == Event::AnnounceReceiptTimeoutExpires {
            inner.counters.announce_receipt_timeouts += 1;
        } else {
            inner.counters.sync_receipt_timeouts += 1;
        }

        if self.clock.default_ds().slave_only() {
            let delay = if event == Event::AnnounceReceiptTimeoutExpires {
                inner
                    .announce_interval
                    .times(self.settings.announce_receipt_timeout)
            } else {
                inner.sync_interval.times(self.settings.sync_receipt_timeout)
            };
            self.add_event_timer(event, delay);
            return;
        }

        match inner.state {
            PortState::Initializing
            | PortState::Uncalibrated
            | PortState::Slave
            | PortState::PreMaster => {
                info!(port = %self.identity, %event, "no master heard, assuming grandmaster role");
                clock.become_grandmaster(self.clock.default_ds());
                inner.qualified_announce = None;
                self.become_master(&mut inner, true);
            }
            state => debug!(port = %self.identity, %state, %event, "receipt timeout ignored"),
        }
    }

    fn pdelay_interval(&self) {
        let mut inner = self.lock_inner();
        if inner.state == PortState::Disabled {
            return;
        }

        let sequence_id = inner.pdelay_sequence.generate();
        let elapsed = self.media.process_pdelay(self, &mut inner, sequence_id);

        let interval = inner.pdelay_interval;
        self.add_event_timer(
            Event::PDelayRespReceiptTimeoutExpires,
            at_least_granularity(
                interval
                    .times(self.settings.pdelay_resp_receipt_timeout)
                    .saturating_sub(elapsed),
            ),
        );
        self.add_event_timer(
            Event::PDelayIntervalTimeoutExpires,
            at_least_granularity(interval.as_duration().saturating_sub(elapsed)),
        );
    }

    fn sync_interval(&self) {
        let mut clock = self.clock.lock();
        let mut inner = self.lock_inner();
        if inner.state == PortState::Disabled {
            return;
        }

        let mut elapsed = Duration::ZERO;
        let grandmaster = clock.is_grandmaster();
        if inner.as_capable && (grandmaster || clock.last_sync().is_some()) {
            let sequence_id = inner.sync_sequence.generate();
            let mut context = PortContext {
                port: self,
                clock: &mut clock,
                inner: &mut inner,
            };
            elapsed = self
                .media
                .process_sync(&mut context, sequence_id, grandmaster);
        }

        let next = if inner.accelerated_sync_count > 0 {
            inner.accelerated_sync_count -= 1;
            EVENT_TIMER_GRANULARITY
        } else {
            if inner.accelerated_sync_count == 0 {
                self.start_announce();
                inner.accelerated_sync_count = -1;
            }
            at_least_granularity(inner.sync_interval.as_duration().saturating_sub(elapsed))
        };
        self.add_event_timer(Event::SyncIntervalTimeoutExpires, next);
    }

    fn announce_interval(&self) -> Result<()> {
        let clock = self.clock.lock();
        let mut inner = self.lock_inner();
        if inner.state == PortState::Disabled {
            return Ok(());
        }

        let mut result = Ok(());
        if inner.as_capable {
            let announce = self.build_announce(&clock, &mut inner);
            result = self.media.send_general(&Message::Announce(announce));
            if result.is_ok() {
                inner.counters.tx_announce += 1;
            }
        }

        self.add_event_timer(
            Event::AnnounceIntervalTimeoutExpires,
            inner.announce_interval.as_duration(),
        );
        result
    }

    fn build_announce(&self, clock: &ClockState, inner: &mut PortInner) -> AnnounceMessage {
        let grandmaster = clock.grandmaster();
        let sequence_id = inner.announce_sequence.generate();
        AnnounceMessage {
            header: self.header(sequence_id, inner.announce_interval),
            origin_timestamp: Timestamp::ZERO,
            current_utc_offset: 0,
            grandmaster_priority_1: grandmaster.priority_1,
            grandmaster_clock_quality: grandmaster.clock_quality,
            grandmaster_priority_2: grandmaster.priority_2,
            grandmaster_identity: grandmaster.identity,
            steps_removed: if clock.is_grandmaster() {
                0
            } else {
                grandmaster.steps_removed.saturating_add(1)
            },
            time_source: grandmaster.time_source,
        }
    }

    fn start_announce(&self) {
        self.add_event_timer(Event::AnnounceIntervalTimeoutExpires, STARTUP_DELAY);
    }

    fn become_master(&self, inner: &mut PortInner, announce: bool) {
        inner.state = PortState::Master;
        self.delete_event_timer(Event::AnnounceReceiptTimeoutExpires);
        self.delete_event_timer(Event::SyncReceiptTimeoutExpires);

        if announce {
            if self.settings.accelerated_sync_count > 0 {
                inner.accelerated_sync_count = self.settings.accelerated_sync_count as i32;
            } else {
                self.start_announce();
            }
        }
        self.add_event_timer(Event::SyncIntervalTimeoutExpires, STARTUP_DELAY);
        info!(port = %self.identity, "switched to master");
    }

    fn become_slave(&self, inner: &mut PortInner, restart_syntonization: bool) {
        inner.state = PortState::Slave;
        self.delete_event_timer(Event::AnnounceIntervalTimeoutExpires);
        self.delete_event_timer(Event::SyncIntervalTimeoutExpires);
        self.add_event_timer(
            Event::AnnounceReceiptTimeoutExpires,
            inner
                .announce_interval
                .times(self.settings.announce_receipt_timeout),
        );

        if restart_syntonization {
            inner.servo.request_set_point();
        }
        info!(port = %self.identity, "switched to slave");
    }

    pub(crate) fn recommend_state(&self, inner: &mut PortInner, state: PortState, changed: bool) {
        match state {
            PortState::Master => {
                if inner.state != PortState::Master {
                    self.become_master(inner, true);
                    inner.sync_count = 0;
                }
            }
            PortState::Slave => {
                if inner.state != PortState::Slave {
                    self.become_slave(inner, true);
                    inner.sync_count = 0;
                } else if changed {
                    inner.servo.request_set_point();
                }
            }
            state => {
                error!(port = %self.identity, %state, "invalid state recommendation");
            }
        }
    }

    pub(crate) fn set_as_capable(&self, inner: &mut PortInner) {
        if !inner.as_capable {
            info!(port = %self.identity, "port is as capable");
            inner.as_capable = true;
            self.add_event_timer(
                Event::AnnounceReceiptTimeoutExpires,
                inner
                    .announce_interval
                    .times(self.settings.announce_receipt_timeout),
            );
        }
    }

    pub(crate) fn unset_as_capable(&self, inner: &mut PortInner) {
        if inner.as_capable {
            info!(port = %self.identity, "port is no longer as capable");
            inner.as_capable = false;
        }
    }

    pub(crate) fn restart_sync_receipt_timer(&self, inner: &PortInner) {
        self.delete_event_timer(Event::SyncReceiptTimeoutExpires);
        self.add_event_timer(
            Event::SyncReceiptTimeoutExpires,
            inner.sync_interval.times(self.settings.sync_receipt_timeout),
        );
    }

    /// Qualify a received announce and schedule master selection
    pub(crate) fn handle_announce(&self, inner: &mut PortInner, announce: &AnnounceMessage) {
        inner.counters.rx_announce += 1;
        if announce.header.source_port_identity == self.identity {
            return;
        }

        self.delete_event_timer(Event::AnnounceReceiptTimeoutExpires);

        let own = self.clock.identity();
        if announce.steps_removed >= MAX_STEPS_REMOVED
            || announce.grandmaster_identity == own
            || announce.header.source_port_identity.clock_identity == own
        {
            debug!(
                port = %self.identity,
                sender = %announce.header.source_port_identity,
                "announce not qualified"
            );
        } else if bmc::replaces_qualified(inner.qualified_announce.as_ref(), announce) {
            inner.qualified_announce = Some(*announce);
            self.add_event_timer(Event::StateChange, STARTUP_DELAY);
        }

        self.add_event_timer(
            Event::AnnounceReceiptTimeoutExpires,
            inner
                .announce_interval
                .times(self.settings.announce_receipt_timeout),
        );
    }
}

impl EventTarget for Port {
    fn process_event(self: Arc<Self>, event: Event) {
        if let Err(error) = self.handle_event(event) {
            warn!(port = %self.identity, %event, %error, "could not handle event");
        }
    }
}
