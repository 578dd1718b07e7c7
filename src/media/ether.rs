use std::{
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use tracing::{debug, error, trace, warn};

use super::{
    build_follow_up, encode, process_follow_up, publish_grandmaster_offset, run_receive_loop,
    CancellationToken, MediaPort, MessageTimestamp, ReceivedSync, INITIAL_LINK_DELAY,
};
use crate::{
    datastructures::{
        common::PortIdentity,
        messages::{
            FollowUpMessage, Header, Message, MessageCodec, PDelayReqMessage,
            PDelayRespFollowUpMessage, PDelayRespMessage, SyncMessage,
        },
    },
    network::{MacAddress, NetworkInterface, GPTP_MULTICAST},
    port::{Event, Port, PortContext, PortInner, PortState, Result},
    time::Timestamp,
    timer::lock,
    timestamper::{RetryPolicy, Sleeper, ThreadSleeper, TimestampKey, Timestamper},
};

#[derive(Debug)]
struct EtherState {
    last_pdelay_req: Option<(PDelayReqMessage, MessageTimestamp)>,
    last_pdelay_resp: Option<(PDelayRespMessage, Timestamp)>,
    /// Responder, t3 and t4 of the last completed exchange
    previous_exchange: Option<(PortIdentity, Timestamp, Timestamp)>,
    last_sync: Option<ReceivedSync>,
    one_way_delay: i64,
}

/// Wired link using event messages timestamped by the interface
pub struct EtherPort {
    network: Arc<dyn NetworkInterface>,
    codec: Arc<dyn MessageCodec>,
    timestamper: Mutex<Timestamper>,
    state: Mutex<EtherState>,
    tx_lock: Mutex<()>,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

/// Neighbor rate ratio from two successive responses
fn neighbor_rate_ratio(
    previous: (Timestamp, Timestamp),
    t3: Timestamp,
    t4: Timestamp,
) -> Option<f64> {
    let (previous_t3, previous_t4) = previous;
    let local = t4.nanos_since(&previous_t4);
    let remote = t3.nanos_since(&previous_t3);
    (local > 0 && remote > 0).then(|| remote as f64 / local as f64)
}

/// `((t4 - t1) * nrr - (t3 - t2)) / 2`
fn mean_link_delay(t1: Timestamp, t2: Timestamp, t3: Timestamp, t4: Timestamp, nrr: f64) -> i64 {
    let round_trip = t4.nanos_since(&t1) as f64;
    let turnaround = t3.nanos_since(&t2) as f64;
    ((round_trip * nrr - turnaround) / 2.0) as i64
}

impl EtherPort {
    pub fn new(
        network: Arc<dyn NetworkInterface>,
        codec: Arc<dyn MessageCodec>,
        timestamper: Timestamper,
        retry: RetryPolicy,
    ) -> Self {
        EtherPort {
            network,
            codec,
            timestamper: Mutex::new(timestamper),
            state: Mutex::new(EtherState {
                last_pdelay_req: None,
                last_pdelay_resp: None,
                previous_exchange: None,
                last_sync: None,
                one_way_delay: INITIAL_LINK_DELAY,
            }),
            tx_lock: Mutex::new(()),
            retry,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper used between timestamp retrieval attempts
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn key(message: &Message) -> TimestampKey {
        TimestampKey {
            port_identity: message.header().source_port_identity,
            sequence_id: message.header().sequence_id,
            message_type: message.message_type(),
        }
    }

    fn send(&self, message: &Message, timestamp: bool) -> Result<()> {
        let frame = encode(&*self.codec, message)?;
        self.network.send(GPTP_MULTICAST, &frame, timestamp)?;
        Ok(())
    }

    /// Send an event message and retrieve its transmit timestamp while
    /// holding the tx lock
    fn send_event(
        &self,
        timestamper: &mut Timestamper,
        message: &Message,
    ) -> (Result<Timestamp>, Duration) {
        let _tx = lock(&self.tx_lock);
        if let Err(error) = self.send(message, true) {
            return (Err(error), Duration::ZERO);
        }

        let key = Self::key(message);
        let (result, waited) = self
            .retry
            .run(&*self.sleeper, |last| timestamper.tx_timestamp(&key, last));
        (result.map_err(Into::into), waited)
    }

    fn handle_sync(
        &self,
        inner: &mut PortInner,
        state: &mut EtherState,
        timestamper: &Timestamper,
        sync: SyncMessage,
        arrival: Timestamp,
    ) {
        inner.counters.rx_sync += 1;
        if inner.state() == PortState::Master {
            debug!(sender = %sync.header.source_port_identity, "ignoring sync while master");
            return;
        }
        state.last_sync = Some(ReceivedSync {
            message: sync,
            arrival,
            device_id: timestamper.device_id(),
        });
    }

    fn handle_follow_up(
        &self,
        context: &mut PortContext<'_>,
        state: &mut EtherState,
        timestamper: &mut Timestamper,
        follow_up: FollowUpMessage,
    ) {
        context.inner.counters.rx_follow_up += 1;
        if context.inner.state().is_inactive() {
            return;
        }

        let Some(sync) = state.last_sync.take() else {
            debug!(sender = %follow_up.header.source_port_identity, "follow up without sync");
            return;
        };
        if sync.message.header.sequence_id != follow_up.header.sequence_id
            || sync.message.header.source_port_identity != follow_up.header.source_port_identity
        {
            error!(
                sync = sync.message.header.sequence_id,
                follow_up = follow_up.header.sequence_id,
                "follow up does not match the last sync"
            );
            return;
        }

        let link_delay = state.one_way_delay.max(0);
        process_follow_up(context, timestamper, &sync, &follow_up, link_delay);
    }

    fn handle_pdelay_req(
        &self,
        port: &Port,
        inner: &mut PortInner,
        timestamper: &mut Timestamper,
        request: PDelayReqMessage,
        arrival: Timestamp,
    ) {
        inner.counters.rx_pdelay_req += 1;
        let sequence_id = request.header.sequence_id;
        let requesting_port_identity = request.header.source_port_identity;

        let response = PDelayRespMessage {
            header: Header {
                two_step_flag: true,
                ..port.header(sequence_id, inner.pdelay_interval())
            },
            request_receipt_timestamp: arrival,
            requesting_port_identity,
        };
        let (departure, _) = self.send_event(timestamper, &Message::PDelayResp(response));
        let departure = match departure {
            Ok(departure) => departure,
            Err(error) => {
                warn!(port = %port.identity(), %error, "could not answer peer delay request");
                return;
            }
        };
        inner.counters.tx_pdelay_resp += 1;

        let follow_up = PDelayRespFollowUpMessage {
            header: port.header(sequence_id, inner.pdelay_interval()),
            response_origin_timestamp: departure,
            requesting_port_identity,
        };
        match self.send_general(&Message::PDelayRespFollowUp(follow_up)) {
            Ok(()) => inner.counters.tx_pdelay_resp_follow_up += 1,
            Err(error) => warn!(
                port = %port.identity(),
                %error,
                "could not send response follow up"
            ),
        }
    }

    fn handle_pdelay_resp(
        &self,
        port: &Port,
        inner: &mut PortInner,
        state: &mut EtherState,
        response: PDelayRespMessage,
        arrival: Timestamp,
    ) {
        inner.counters.rx_pdelay_resp += 1;
        let outstanding = state.last_pdelay_req.map(|(request, _)| request.header.sequence_id);
        if response.requesting_port_identity != port.identity()
            || outstanding != Some(response.header.sequence_id)
        {
            debug!(
                port = %port.identity(),
                sequence_id = response.header.sequence_id,
                "unexpected peer delay response"
            );
            return;
        }
        state.last_pdelay_resp = Some((response, arrival));
    }

    fn handle_pdelay_resp_follow_up(
        &self,
        port: &Port,
        inner: &mut PortInner,
        state: &mut EtherState,
        follow_up: PDelayRespFollowUpMessage,
    ) {
        inner.counters.rx_pdelay_resp_follow_up += 1;
        if follow_up.requesting_port_identity != port.identity() {
            return;
        }

        let (Some((request, sent)), Some((response, t4))) =
            (state.last_pdelay_req, state.last_pdelay_resp)
        else {
            debug!(port = %port.identity(), "response follow up without exchange in progress");
            return;
        };
        let Some(t1) = sent.valid() else {
            debug!(port = %port.identity(), "no transmit timestamp for peer delay request");
            return;
        };
        let responder = response.header.source_port_identity;
        if request.header.sequence_id != follow_up.header.sequence_id
            || response.header.sequence_id != follow_up.header.sequence_id
            || responder != follow_up.header.source_port_identity
        {
            debug!(port = %port.identity(), "response follow up does not match exchange");
            return;
        }

        let t2 = response.request_receipt_timestamp;
        let t3 = follow_up.response_origin_timestamp;
        let nrr = match state.previous_exchange {
            Some((previous, previous_t3, previous_t4)) if previous == responder => {
                neighbor_rate_ratio((previous_t3, previous_t4), t3, t4)
                    .unwrap_or(inner.peer_rate_ratio)
            }
            _ => 1.0,
        };
        let delay = mean_link_delay(t1, t2, t3, t4, nrr);
        trace!(port = %port.identity(), delay, nrr, "peer delay measured");

        state.previous_exchange = Some((responder, t3, t4));
        state.last_pdelay_resp = None;
        state.one_way_delay = delay;
        inner.peer_rate_ratio = nrr;
        inner.pdelay_count += 1;
        port.delete_event_timer(Event::PDelayRespReceiptTimeoutExpires);

        if delay <= port.settings().neighbor_prop_delay_thresh {
            port.set_as_capable(inner);
        } else {
            debug!(port = %port.identity(), delay, "link delay above threshold");
            port.unset_as_capable(inner);
        }
    }
}

impl MediaPort for EtherPort {
    fn receive_loop(&self, port: &Arc<Port>, ready: mpsc::Sender<()>, cancel: &CancellationToken) {
        run_receive_loop(&*self.network, self, port, ready, cancel);
    }

    fn receive_frame(&self, port: &Port, source: MacAddress, frame: &[u8]) {
        let clock_handle = port.clock().clone();
        let _dispatch = clock_handle.scheduler().dispatch_lock();
        let mut clock = clock_handle.lock();
        let mut inner = port.lock_inner();
        let mut state = lock(&self.state);
        let mut timestamper = lock(&self.timestamper);

        let message = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(error) => {
                debug!(port = %port.identity(), %source, %error, "discarding undecodable frame");
                inner.counters.rx_discarded += 1;
                return;
            }
        };
        if message.header().source_port_identity == port.identity() {
            return;
        }

        let arrival = if message.is_event() {
            let key = Self::key(&message);
            let (result, _) = self
                .retry
                .run(&*self.sleeper, |last| timestamper.rx_timestamp(&key, last));
            match result {
                Ok(arrival) => Some(arrival),
                Err(error) => {
                    debug!(
                        port = %port.identity(),
                        %error,
                        "discarding event message without timestamp"
                    );
                    inner.counters.rx_discarded += 1;
                    return;
                }
            }
        } else {
            None
        };

        match (message, arrival) {
            (Message::Sync(sync), Some(arrival)) => {
                self.handle_sync(&mut inner, &mut state, &timestamper, sync, arrival)
            }
            (Message::PDelayReq(request), Some(arrival)) => {
                self.handle_pdelay_req(port, &mut inner, &mut timestamper, request, arrival)
            }
            (Message::PDelayResp(response), Some(arrival)) => {
                self.handle_pdelay_resp(port, &mut inner, &mut state, response, arrival)
            }
            (Message::FollowUp(follow_up), _) => {
                let mut context = PortContext {
                    port,
                    clock: &mut clock,
                    inner: &mut inner,
                };
                self.handle_follow_up(&mut context, &mut state, &mut timestamper, follow_up)
            }
            (Message::PDelayRespFollowUp(follow_up), _) => {
                self.handle_pdelay_resp_follow_up(port, &mut inner, &mut state, follow_up)
            }
            (Message::Announce(announce), _) => port.handle_announce(&mut inner, &announce),
            (message, None) => {
                error!(
                    port = %port.identity(),
                    message_type = ?message.message_type(),
                    "event message without timestamp"
                );
            }
        }
    }

    fn process_pdelay(&self, port: &Port, inner: &mut PortInner, sequence_id: u16) -> Duration {
        let mut state = lock(&self.state);
        let mut timestamper = lock(&self.timestamper);

        let request = PDelayReqMessage {
            header: port.header(sequence_id, inner.pdelay_interval()),
        };
        state.last_pdelay_req = Some((request, MessageTimestamp::Pending));
        state.last_pdelay_resp = None;

        let (result, elapsed) = self.send_event(&mut timestamper, &Message::PDelayReq(request));
        let sent = match result {
            Ok(timestamp) => {
                inner.counters.tx_pdelay_req += 1;
                MessageTimestamp::Valid(timestamp)
            }
            Err(error) => {
                debug!(port = %port.identity(), %error, "peer delay request without timestamp");
                MessageTimestamp::Invalid
            }
        };
        state.last_pdelay_req = Some((request, sent));
        elapsed
    }

    fn process_sync(
        &self,
        context: &mut PortContext<'_>,
        sequence_id: u16,
        grandmaster: bool,
    ) -> Duration {
        let mut timestamper = lock(&self.timestamper);
        let port = context.port;

        let now = match timestamper.device_time() {
            Ok(now) => now,
            Err(error) => {
                warn!(port = %port.identity(), %error, "device time unavailable, skipping sync");
                return Duration::ZERO;
            }
        };
        if grandmaster && port.port_number() == 1 {
            publish_grandmaster_offset(context, now);
        }

        let header = port.header(sequence_id, context.inner.sync_interval());
        let sync = SyncMessage {
            header: Header {
                two_step_flag: true,
                ..header
            },
            origin_timestamp: Timestamp::ZERO,
        };
        let (result, elapsed) = self.send_event(&mut timestamper, &Message::Sync(sync));
        let departure = match result {
            Ok(departure) => departure,
            Err(error) => {
                warn!(port = %port.identity(), %error, "sync not sent");
                return elapsed;
            }
        };
        context.inner.counters.tx_sync += 1;

        let device_id = timestamper.device_id();
        let Some(follow_up) =
            build_follow_up(context, header, departure, now, device_id, grandmaster)
        else {
            return elapsed;
        };
        match self.send_general(&Message::FollowUp(follow_up)) {
            Ok(()) => context.inner.counters.tx_follow_up += 1,
            Err(error) => warn!(port = %port.identity(), %error, "follow up not sent"),
        }
        elapsed
    }

    fn send_general(&self, message: &Message) -> Result<()> {
        let _tx = lock(&self.tx_lock);
        self.send(message, false)
    }

    fn link_delay(&self) -> i64 {
        lock(&self.state).one_way_delay.max(0)
    }
}
