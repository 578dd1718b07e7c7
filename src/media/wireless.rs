//! Wireless link using timing measurement dialogs
//!
//! Each sync interval starts a new dialog with the peer. The driver
//! reports the device clock times of the action frame and its ack for our
//! own dialogs (confirmation) and for the dialogs of the peer
//! (indication). The FollowUp describing a dialog travels as payload of the
//! next request, together with the times of the previous dialog.

use std::{
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use tracing::{debug, error, trace, warn};

use super::{
    build_follow_up, encode, process_follow_up, publish_grandmaster_offset, run_receive_loop,
    CancellationToken, MediaPort, ReceivedSync, INITIAL_LINK_DELAY,
};
use crate::{
    datastructures::messages::{Header, Message, MessageCodec, SyncMessage},
    network::{MacAddress, NetworkError, NetworkInterface, GPTP_MULTICAST},
    port::{Port, PortContext, PortInner, Result},
    time::{TimeInterval, Timestamp},
    timer::lock,
    timestamper::Timestamper,
};

/// Dialog tokens run from 1 to this value, 0 means no dialog
pub const MAX_DIALOG_TOKEN: u16 = 255;

/// Length of a device clock tick in nanoseconds
const DEVICE_CLOCK_TICK: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WirelessDialog {
    pub dialog_token: u8,
    /// Sequence id of the FollowUp describing this dialog
    pub fwup_seq: u16,
    pub action_devclk: u64,
    pub ack_devclk: u64,
}

impl WirelessDialog {
    fn for_sequence(sequence_id: u16) -> Self {
        WirelessDialog {
            dialog_token: (sequence_id % MAX_DIALOG_TOKEN) as u8 + 1,
            fwup_seq: sequence_id,
            action_devclk: 0,
            ack_devclk: 0,
        }
    }

    /// Device time of the action frame
    pub fn action(&self) -> Timestamp {
        Timestamp::from_nanos(self.action_devclk.saturating_mul(DEVICE_CLOCK_TICK))
    }

    /// Time from action frame to ack, in nanoseconds
    fn ack_delay(&self) -> i64 {
        (self.ack_devclk as i64 - self.action_devclk as i64) * DEVICE_CLOCK_TICK as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingMeasurementRequest {
    pub dialog_token: u8,
    /// Token of the dialog the times and payload refer to
    pub follow_up_dialog_token: u8,
    pub t1: u32,
    pub t4: u32,
    /// Encoded FollowUp, empty when the previous dialog was not confirmed
    pub payload: Vec<u8>,
}

pub trait WirelessDriver: Send + Sync {
    /// Start a dialog with `peer`. The confirmation may be delivered before
    /// this returns, indications must come from another thread.
    fn request_timing_measurement(
        &self,
        peer: MacAddress,
        request: &TimingMeasurementRequest,
    ) -> std::result::Result<(), NetworkError>;
}

#[derive(Debug)]
struct WirelessState {
    prev_dialog: WirelessDialog,
    one_way_delay: i64,
}

struct Shared {
    network: Arc<dyn NetworkInterface>,
    codec: Arc<dyn MessageCodec>,
    driver: Arc<dyn WirelessDriver>,
    peer: MacAddress,
    timestamper: Mutex<Timestamper>,
    state: Mutex<WirelessState>,
}

/// Handle to a wireless link. Clones share state, so the driver callbacks
/// can be wired to a clone of the port's media.
#[derive(Clone)]
pub struct WirelessPort {
    shared: Arc<Shared>,
}

impl WirelessPort {
    pub fn new(
        network: Arc<dyn NetworkInterface>,
        codec: Arc<dyn MessageCodec>,
        driver: Arc<dyn WirelessDriver>,
        peer: MacAddress,
        timestamper: Timestamper,
    ) -> Self {
        WirelessPort {
            shared: Arc::new(Shared {
                network,
                codec,
                driver,
                peer,
                timestamper: Mutex::new(timestamper),
                state: Mutex::new(WirelessState {
                    prev_dialog: WirelessDialog::default(),
                    one_way_delay: INITIAL_LINK_DELAY,
                }),
            }),
        }
    }

    pub fn prev_dialog(&self) -> WirelessDialog {
        lock(&self.shared.state).prev_dialog
    }

    /// Driver callback with the times of one of our own dialogs
    pub fn timing_measurement_confirm(&self, dialog: WirelessDialog) {
        let mut state = lock(&self.shared.state);
        if dialog.dialog_token == state.prev_dialog.dialog_token {
            state.prev_dialog = WirelessDialog {
                fwup_seq: state.prev_dialog.fwup_seq,
                ..dialog
            };
        } else {
            debug!(token = dialog.dialog_token, "confirmation for a stale dialog");
        }
    }

    /// Driver callback for a dialog started by the peer. `previous` carries
    /// the peer's times of the dialog before `current`, `payload` its
    /// FollowUp.
    pub fn timing_measurement_indication(
        &self,
        port: &Port,
        current: WirelessDialog,
        previous: WirelessDialog,
        payload: &[u8],
    ) {
        let clock_handle = port.clock().clone();
        let _dispatch = clock_handle.scheduler().dispatch_lock();
        let mut clock = clock_handle.lock();
        let mut inner = port.lock_inner();
        let mut state = lock(&self.shared.state);
        let mut timestamper = lock(&self.shared.timestamper);

        let local = state.prev_dialog;
        state.prev_dialog = current;

        if payload.is_empty()
            || previous.dialog_token != local.dialog_token
            || previous.action_devclk == 0
        {
            return;
        }
        let follow_up = match self.shared.codec.decode(payload) {
            Ok(Message::FollowUp(follow_up)) => follow_up,
            Ok(other) => {
                error!(
                    port = %port.identity(),
                    message_type = ?other.message_type(),
                    "unexpected timing measurement payload"
                );
                return;
            }
            Err(error) => {
                debug!(
                    port = %port.identity(),
                    %error,
                    "discarding undecodable timing measurement payload"
                );
                inner.counters.rx_discarded += 1;
                return;
            }
        };

        let delay = (previous.ack_delay() - local.ack_delay()) / 2;
        trace!(
            port = %port.identity(),
            delay,
            token = previous.dialog_token,
            "wireless link delay"
        );
        state.one_way_delay = delay;
        inner.pdelay_count += 1;
        inner.counters.rx_follow_up += 1;

        let sync = ReceivedSync {
            message: SyncMessage {
                header: Header {
                    correction_field: TimeInterval::default(),
                    ..follow_up.header
                },
                origin_timestamp: Timestamp::ZERO,
            },
            arrival: local.action(),
            device_id: timestamper.device_id(),
        };
        let mut context = PortContext {
            port,
            clock: &mut clock,
            inner: &mut inner,
        };
        process_follow_up(&mut context, &mut timestamper, &sync, &follow_up, delay.max(0));
    }
}

impl MediaPort for WirelessPort {
    fn receive_loop(&self, port: &Arc<Port>, ready: mpsc::Sender<()>, cancel: &CancellationToken) {
        run_receive_loop(&*self.shared.network, self, port, ready, cancel);
    }

    fn receive_frame(&self, port: &Port, source: MacAddress, frame: &[u8]) {
        let clock_handle = port.clock().clone();
        let _dispatch = clock_handle.scheduler().dispatch_lock();
        let mut inner = port.lock_inner();

        let message = match self.shared.codec.decode(frame) {
            Ok(message) => message,
            Err(error) => {
                debug!(port = %port.identity(), %source, %error, "discarding undecodable frame");
                inner.counters.rx_discarded += 1;
                return;
            }
        };

        match message {
            Message::Announce(announce) => port.handle_announce(&mut inner, &announce),
            message if message.is_event() => {
                error!(
                    port = %port.identity(),
                    message_type = ?message.message_type(),
                    "event message on a wireless link"
                );
                inner.counters.rx_discarded += 1;
            }
            message => {
                debug!(
                    port = %port.identity(),
                    message_type = ?message.message_type(),
                    "ignoring message"
                );
            }
        }
    }

    fn process_pdelay(&self, port: &Port, _inner: &mut PortInner, _sequence_id: u16) -> Duration {
        debug!(port = %port.identity(), "no peer delay exchange on wireless links");
        Duration::ZERO
    }

    fn process_sync(
        &self,
        context: &mut PortContext<'_>,
        sequence_id: u16,
        grandmaster: bool,
    ) -> Duration {
        let port = context.port;
        let mut state = lock(&self.shared.state);
        let mut timestamper = lock(&self.shared.timestamper);

        let previous = state.prev_dialog;
        let confirmed = previous.dialog_token != 0 && previous.action_devclk != 0;

        let mut payload = Vec::new();
        if confirmed {
            match timestamper.device_time() {
                Ok(now) => {
                    if grandmaster && port.port_number() == 1 {
                        publish_grandmaster_offset(context, now);
                    }
                    let header = port.header(previous.fwup_seq, context.inner.sync_interval());
                    let device_id = timestamper.device_id();
                    if let Some(follow_up) = build_follow_up(
                        context,
                        header,
                        previous.action(),
                        now,
                        device_id,
                        grandmaster,
                    ) {
                        match encode(&*self.shared.codec, &Message::FollowUp(follow_up)) {
                            Ok(encoded) => payload = encoded,
                            Err(error) => warn!(
                                port = %port.identity(),
                                %error,
                                "could not encode follow up"
                            ),
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        port = %port.identity(),
                        %error,
                        "device time unavailable,
                        sending no follow up"
                    )
                }
            }
        }

        let next = WirelessDialog::for_sequence(sequence_id);
        let request = TimingMeasurementRequest {
            dialog_token: next.dialog_token,
            follow_up_dialog_token: previous.dialog_token,
            t1: if confirmed { previous.action_devclk as u32 } else { 0 },
            t4: if confirmed { previous.ack_devclk as u32 } else { 0 },
            payload,
        };
        state.prev_dialog = next;
        drop(timestamper);
        drop(state);

        match self
            .shared
            .driver
            .request_timing_measurement(self.shared.peer, &request)
        {
            Ok(()) => {
                context.inner.counters.tx_sync += 1;
                if !request.payload.is_empty() {
                    context.inner.counters.tx_follow_up += 1;
                }
            }
            Err(error) => warn!(
                port = %port.identity(),
                %error,
                "timing measurement request failed"
            ),
        }
        Duration::ZERO
    }

    fn send_general(&self, message: &Message) -> Result<()> {
        let frame = encode(&*self.shared.codec, message)?;
        self.shared.network.send(GPTP_MULTICAST, &frame, false)?;
        Ok(())
    }

    fn link_delay(&self) -> i64 {
        lock(&self.shared.state).one_way_delay.max(0)
    }

    fn uses_pdelay(&self) -> bool {
        false
    }
}
