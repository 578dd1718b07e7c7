//! The clock of a time-aware system
//!
//! A [Clock] owns the ports of the system, selects the grandmaster among
//! the announce messages the ports qualified and keeps the data needed to
//! relay the grandmaster's time from the slave port to the master ports.

mod ipc;
mod rate;

use std::{
    sync::{Arc, MutexGuard},
    time::Duration,
};

pub use ipc::{IpcError, IpcSink, MasterOffset};
pub use rate::{NegativeTimeJump, RateRatioEstimator};
use tracing::{debug, info, warn};

use crate::{
    bmc::{self, SystemIdentity},
    datastructures::{
        common::{ClockIdentity, ClockQuality, TimeSource},
        messages::AnnounceMessage,
    },
    port::{Event, Port, PortState},
    time::{TimeInterval, Timestamp},
    timer::{lock, EventScheduler, EventTarget, TimerKey},
};

/// Static properties of the local clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDs {
    pub clock_identity: ClockIdentity,
    pub priority_1: u8,
    pub priority_2: u8,
    pub clock_quality: ClockQuality,
    pub time_source: TimeSource,
    pub domain_number: u8,
}

impl DefaultDs {
    pub fn new(clock_identity: ClockIdentity) -> Self {
        DefaultDs {
            clock_identity,
            priority_1: 248,
            priority_2: 248,
            clock_quality: ClockQuality::default(),
            time_source: TimeSource::default(),
            domain_number: 0,
        }
    }

    pub fn system_identity(&self) -> SystemIdentity {
        SystemIdentity::new(
            self.priority_1,
            self.clock_quality,
            self.priority_2,
            self.clock_identity,
        )
    }

    /// A clock with priority1 255 can never become grandmaster
    pub fn slave_only(&self) -> bool {
        self.priority_1 == 255
    }
}

/// Cached properties of the current grandmaster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrandmasterDs {
    pub identity: ClockIdentity,
    pub priority_1: u8,
    pub priority_2: u8,
    pub clock_quality: ClockQuality,
    pub time_source: TimeSource,
    pub steps_removed: u16,
}

impl GrandmasterDs {
    fn from_default_ds(ds: &DefaultDs) -> Self {
        GrandmasterDs {
            identity: ds.clock_identity,
            priority_1: ds.priority_1,
            priority_2: ds.priority_2,
            clock_quality: ds.clock_quality,
            time_source: ds.time_source,
            steps_removed: 0,
        }
    }

    fn from_announce(message: &AnnounceMessage) -> Self {
        GrandmasterDs {
            identity: message.grandmaster_identity,
            priority_1: message.grandmaster_priority_1,
            priority_2: message.grandmaster_priority_2,
            clock_quality: message.grandmaster_clock_quality,
            time_source: message.time_source,
            steps_removed: message.steps_removed,
        }
    }
}

/// Timing of the last synchronization received on the slave port, used
/// to compute residence time when forwarding it on master ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncRelayInfo {
    pub precise_origin: Timestamp,
    /// Correction accumulated up to and including the upstream link
    pub correction: TimeInterval,
    pub receive_device_time: Timestamp,
    pub receive_system_time: Timestamp,
    pub device_id: u32,
    /// Rate of the grandmaster relative to the local device clock
    pub cumulative_rate_ratio: f64,
    pub gm_time_base_indicator: u16,
}

/// Result of a master selection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmcaOutcome {
    pub grandmaster: ClockIdentity,
    pub changed_grandmaster: bool,
    /// Port the grandmaster's announce was received on, `None` when the
    /// local clock is grandmaster
    pub slave_port: Option<u16>,
}

/// Mutable clock state, guarded by the clock lock
pub struct ClockState {
    ports: Vec<Arc<Port>>,
    grandmaster: GrandmasterDs,
    is_grandmaster: bool,
    last_ebest_identity: ClockIdentity,
    last_sync: Option<SyncRelayInfo>,
    master_local_rate: RateRatioEstimator,
    local_system_rate: RateRatioEstimator,
    master_local_freq_offset: f64,
    local_system_freq_offset: f64,
    domain_number: u8,
    ipc: Option<Box<dyn IpcSink>>,
}

impl ClockState {
    pub fn grandmaster(&self) -> &GrandmasterDs {
        &self.grandmaster
    }

    pub fn is_grandmaster(&self) -> bool {
        self.is_grandmaster
    }

    pub fn last_sync(&self) -> Option<&SyncRelayInfo> {
        self.last_sync.as_ref()
    }

    pub(crate) fn set_last_sync(&mut self, info: SyncRelayInfo) {
        self.last_sync = Some(info);
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub(crate) fn become_grandmaster(&mut self, ds: &DefaultDs) {
        self.grandmaster = GrandmasterDs::from_default_ds(ds);
        self.is_grandmaster = true;
    }

    pub fn master_local_freq_offset(&self) -> f64 {
        self.master_local_freq_offset
    }

    pub fn local_system_freq_offset(&self) -> f64 {
        self.local_system_freq_offset
    }

    /// Rate of the grandmaster relative to the system clock
    pub fn master_system_freq_offset(&self) -> f64 {
        self.master_local_freq_offset * self.local_system_freq_offset
    }

    pub(crate) fn calc_master_local_rate(
        &mut self,
        master_time: Timestamp,
        sync_time: Timestamp,
    ) -> Result<f64, NegativeTimeJump> {
        self.master_local_rate.update(master_time, sync_time)
    }

    pub(crate) fn calc_local_system_rate(
        &mut self,
        local_time: Timestamp,
        system_time: Timestamp,
    ) -> Result<f64, NegativeTimeJump> {
        self.local_system_rate.update(local_time, system_time)
    }

    /// Record the offsets of a synchronization cycle and hand them to the
    /// telemetry sink, if any.
    pub(crate) fn set_master_offset(&mut self, offset: &MasterOffset) {
        self.master_local_freq_offset = offset.master_local_freq_offset;
        self.local_system_freq_offset = offset.local_system_freq_offset;

        if let Some(ipc) = self.ipc.as_mut() {
            if let Err(error) = ipc.publish(offset, self.grandmaster.identity, self.domain_number)
            {
                debug!(%error, "could not publish master offset");
            }
        }
    }
}

pub struct Clock {
    default_ds: DefaultDs,
    scheduler: Arc<dyn EventScheduler>,
    state: std::sync::Mutex<ClockState>,
}

impl Clock {
    pub fn new(
        default_ds: DefaultDs,
        scheduler: Arc<dyn EventScheduler>,
        ipc: Option<Box<dyn IpcSink>>,
    ) -> Arc<Self> {
        Arc::new(Clock {
            default_ds,
            scheduler,
            state: std::sync::Mutex::new(ClockState {
                ports: Vec::new(),
                grandmaster: GrandmasterDs::from_default_ds(&default_ds),
                is_grandmaster: false,
                last_ebest_identity: ClockIdentity::UNKNOWN,
                last_sync: None,
                master_local_rate: RateRatioEstimator::default(),
                local_system_rate: RateRatioEstimator::default(),
                master_local_freq_offset: 1.0,
                local_system_freq_offset: 1.0,
                domain_number: default_ds.domain_number,
                ipc,
            }),
        })
    }

    pub fn default_ds(&self) -> &DefaultDs {
        &self.default_ds
    }

    pub fn identity(&self) -> ClockIdentity {
        self.default_ds.clock_identity
    }

    pub fn scheduler(&self) -> &dyn EventScheduler {
        &*self.scheduler
    }

    /// Take the clock lock. Must not be called while holding a port lock.
    pub fn lock(&self) -> MutexGuard<'_, ClockState> {
        lock(&self.state)
    }

    pub fn register_port(&self, port: Arc<Port>) {
        self.lock().ports.push(port);
    }

    pub(crate) fn remove_port(&self, port_number: u16) {
        self.lock()
            .ports
            .retain(|port| port.port_number() != port_number);
    }

    pub fn add_event_timer(&self, port: &Port, event: Event, delay: Duration) {
        let target: std::sync::Weak<dyn EventTarget> = port.weak();
        self.scheduler.schedule(
            target,
            TimerKey {
                port_number: port.port_number(),
                event,
            },
            delay,
        );
    }

    pub fn delete_event_timer(&self, port: &Port, event: Event) {
        self.scheduler.cancel(TimerKey {
            port_number: port.port_number(),
            event,
        });
    }

    /// Whether the local clock beats the grandmaster described by
    /// `announce`. Always true when there is no candidate.
    pub fn is_better_than(&self, announce: Option<&AnnounceMessage>) -> bool {
        match announce {
            None => true,
            Some(message) => self
                .default_ds
                .system_identity()
                .is_better_than(&SystemIdentity::from_announce(message)),
        }
    }

    /// Run master selection across all ports and recommend each port its
    /// new state. Takes the clock lock and then each port's lock in turn.
    pub fn state_change(&self) -> BmcaOutcome {
        let mut state = self.lock();
        let ports = state.ports.clone();

        let candidates: Vec<_> = ports
            .iter()
            .filter_map(|port| {
                let inner = port.lock_inner();
                if inner.state().is_inactive() {
                    return None;
                }
                inner
                    .qualified_announce()
                    .map(|announce| (port.port_number(), *announce))
            })
            .collect();

        let ebest = bmc::select_best(candidates);
        let local_wins = self.is_better_than(ebest.as_ref().map(|(_, message)| message));

        let (grandmaster, slave_port) = match ebest {
            Some((port_number, message)) if !local_wins => {
                state.is_grandmaster = false;
                state.grandmaster = GrandmasterDs::from_announce(&message);
                (message.grandmaster_identity, Some(port_number))
            }
            _ => {
                state.become_grandmaster(&self.default_ds);
                (self.default_ds.clock_identity, None)
            }
        };

        let changed_grandmaster = grandmaster != state.last_ebest_identity;
        state.last_ebest_identity = grandmaster;
        if changed_grandmaster {
            info!(%grandmaster, "grandmaster changed");
        }

        for port in &ports {
            let mut inner = port.lock_inner();
            if inner.state().is_inactive() {
                continue;
            }
            let recommended = if Some(port.port_number()) == slave_port {
                PortState::Slave
            } else {
                PortState::Master
            };
            port.recommend_state(&mut inner, recommended, changed_grandmaster);
        }

        if ports.is_empty() {
            warn!("master selection ran without any ports");
        }

        BmcaOutcome {
            grandmaster,
            changed_grandmaster,
            slave_port,
        }
    }
}
