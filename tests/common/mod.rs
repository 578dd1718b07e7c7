#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc, Arc, Mutex, MutexGuard, Weak,
    },
    time::{Duration, Instant},
};

use gptp::{
    clock::{Clock, DefaultDs},
    datastructures::{
        common::{ClockIdentity, ClockQuality, PortIdentity, TimeSource},
        messages::{AnnounceMessage, CodecError, Header, Message, MessageCodec},
    },
    media::EtherPort,
    network::{MacAddress, NetworkError, NetworkInterface},
    port::{Event, Port, PortSettings},
    time::Timestamp,
    timer::{EventScheduler, EventTarget, TimerHandle, TimerKey},
    timestamper::{RetryPolicy, Timestamper},
};

/// Messages as json, standing in for the wire format
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &Message, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let encoded =
            serde_json::to_vec(message).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let target = buffer
            .get_mut(..encoded.len())
            .ok_or(CodecError::BufferTooSmall)?;
        target.copy_from_slice(&encoded);
        Ok(encoded.len())
    }

    fn decode(&self, buffer: &[u8]) -> Result<Message, CodecError> {
        serde_json::from_slice(buffer).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

pub fn encode(message: &Message) -> Vec<u8> {
    serde_json::to_vec(message).unwrap()
}

type Frame = (MacAddress, Vec<u8>);

/// One end of a point to point link, delivering to the other end
pub struct LoopbackLink {
    address: MacAddress,
    outgoing: Mutex<mpsc::Sender<Frame>>,
    incoming: Mutex<mpsc::Receiver<Frame>>,
    sent: AtomicUsize,
}

pub fn loopback_pair(a: MacAddress, b: MacAddress) -> (Arc<LoopbackLink>, Arc<LoopbackLink>) {
    let (to_b, from_a) = mpsc::channel();
    let (to_a, from_b) = mpsc::channel();
    (
        Arc::new(LoopbackLink {
            address: a,
            outgoing: Mutex::new(to_b),
            incoming: Mutex::new(from_b),
            sent: AtomicUsize::new(0),
        }),
        Arc::new(LoopbackLink {
            address: b,
            outgoing: Mutex::new(to_a),
            incoming: Mutex::new(from_a),
            sent: AtomicUsize::new(0),
        }),
    )
}

impl LoopbackLink {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl NetworkInterface for LoopbackLink {
    fn send(
        &self,
        _destination: MacAddress,
        data: &[u8],
        _timestamp: bool,
    ) -> Result<(), NetworkError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.outgoing
            .lock()
            .unwrap()
            .send((self.address, data.to_vec()))
            .map_err(|_| NetworkError::Fatal("peer closed".into()))
    }

    fn recv(&self, buffer: &mut [u8]) -> Result<(MacAddress, usize), NetworkError> {
        match self
            .incoming
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_millis(16))
        {
            Ok((source, data)) => {
                buffer[..data.len()].copy_from_slice(&data);
                Ok((source, data.len()))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Err(NetworkError::Transient),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(NetworkError::Fatal("peer closed".into()))
            }
        }
    }

    fn link_layer_address(&self) -> MacAddress {
        self.address
    }
}

/// Accepts everything, never receives
#[derive(Default)]
pub struct SinkNetwork {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl SinkNetwork {
    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| JsonCodec.decode(frame).unwrap())
            .collect()
    }
}

impl NetworkInterface for SinkNetwork {
    fn send(
        &self,
        _destination: MacAddress,
        data: &[u8],
        _timestamp: bool,
    ) -> Result<(), NetworkError> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn recv(&self, _buffer: &mut [u8]) -> Result<(MacAddress, usize), NetworkError> {
        std::thread::sleep(Duration::from_millis(1));
        Err(NetworkError::Transient)
    }

    fn link_layer_address(&self) -> MacAddress {
        MacAddress([2, 0, 0, 0, 0, 0xff])
    }
}

struct Scheduled {
    key: TimerKey,
    delay: Duration,
    target: Weak<dyn EventTarget>,
}

/// Records timers instead of running them. Tests fire them explicitly.
#[derive(Default)]
pub struct ManualScheduler {
    timers: Mutex<Vec<Scheduled>>,
    dispatch: Mutex<()>,
    next_handle: AtomicU64,
}

impl ManualScheduler {
    pub fn pending(&self, port_number: u16, event: Event) -> usize {
        self.delays(port_number, event).len()
    }

    pub fn delays(&self, port_number: u16, event: Event) -> Vec<Duration> {
        let key = TimerKey { port_number, event };
        self.timers
            .lock()
            .unwrap()
            .iter()
            .filter(|timer| timer.key == key)
            .map(|timer| timer.delay)
            .collect()
    }

    /// Deliver the oldest pending timer for this key, as the timer thread
    /// would. Returns false when none was pending.
    pub fn fire(&self, port_number: u16, event: Event) -> bool {
        let key = TimerKey { port_number, event };
        let target = {
            let mut timers = self.timers.lock().unwrap();
            match timers.iter().position(|timer| timer.key == key) {
                Some(index) => timers.remove(index).target,
                None => return false,
            }
        };

        let _dispatch = self.dispatch.lock().unwrap();
        if let Some(target) = target.upgrade() {
            target.process_event(event);
        }
        true
    }
}

impl EventScheduler for ManualScheduler {
    fn schedule(
        &self,
        target: Weak<dyn EventTarget>,
        key: TimerKey,
        delay: Duration,
    ) -> TimerHandle {
        self.timers
            .lock()
            .unwrap()
            .push(Scheduled { key, delay, target });
        TimerHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn cancel(&self, key: TimerKey) {
        self.timers.lock().unwrap().retain(|timer| timer.key != key);
    }

    fn dispatch_lock(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drops every timer. For tests that drive a port by hand.
#[derive(Default)]
pub struct NullScheduler {
    dispatch: Mutex<()>,
    next_handle: AtomicU64,
}

impl EventScheduler for NullScheduler {
    fn schedule(
        &self,
        _target: Weak<dyn EventTarget>,
        _key: TimerKey,
        _delay: Duration,
    ) -> TimerHandle {
        TimerHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn cancel(&self, _key: TimerKey) {}

    fn dispatch_lock(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn identity(last: u8) -> ClockIdentity {
    ClockIdentity::from_mac(mac(last))
}

pub fn mac(last: u8) -> MacAddress {
    MacAddress([2, 0, 0, 0, 0, last])
}

pub fn clock(
    priority_1: u8,
    identity: ClockIdentity,
    scheduler: Arc<dyn EventScheduler>,
) -> Arc<Clock> {
    let mut ds = DefaultDs::new(identity);
    ds.priority_1 = priority_1;
    Clock::new(ds, scheduler, None)
}

pub fn ether_port(
    clock: &Arc<Clock>,
    port_number: u16,
    network: Arc<dyn NetworkInterface>,
    settings: PortSettings,
) -> Arc<Port> {
    let media = EtherPort::new(
        network,
        Arc::new(JsonCodec),
        Timestamper::new(None),
        RetryPolicy::default(),
    );
    Port::new(clock.clone(), port_number, Box::new(media), settings)
}

pub fn announce(
    sender: PortIdentity,
    grandmaster: ClockIdentity,
    priority_1: u8,
    steps_removed: u16,
) -> Message {
    Message::Announce(AnnounceMessage {
        header: Header::new(sender, 0),
        origin_timestamp: Timestamp::ZERO,
        current_utc_offset: 0,
        grandmaster_priority_1: priority_1,
        grandmaster_clock_quality: ClockQuality::default(),
        grandmaster_priority_2: 248,
        grandmaster_identity: grandmaster,
        steps_removed,
        time_source: TimeSource::default(),
    })
}
