mod common;

use std::sync::{Arc, Mutex};

use common::{
    announce, encode, identity, mac, JsonCodec, ManualScheduler, SinkNetwork,
};
use gptp::{
    clock::{IpcError, IpcSink, MasterOffset},
    datastructures::{
        common::{ClockIdentity, PortIdentity},
        messages::{Message, MessageCodec},
    },
    media::{
        MediaPort, TimingMeasurementRequest, WirelessDialog, WirelessDriver, WirelessPort,
    },
    network::{MacAddress, NetworkError},
    port::{Event, Port, PortSettings},
    timestamper::Timestamper,
    Clock, DefaultDs, PortState,
};

#[derive(Default)]
struct RecordingDriver {
    requests: Mutex<Vec<TimingMeasurementRequest>>,
}

impl WirelessDriver for RecordingDriver {
    fn request_timing_measurement(
        &self,
        _peer: MacAddress,
        request: &TimingMeasurementRequest,
    ) -> Result<(), NetworkError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

struct Offsets(Arc<Mutex<Vec<MasterOffset>>>);

impl IpcSink for Offsets {
    fn publish(
        &mut self,
        offset: &MasterOffset,
        _grandmaster: ClockIdentity,
        _domain_number: u8,
    ) -> Result<(), IpcError> {
        self.0.lock().unwrap().push(*offset);
        Ok(())
    }
}

struct Station {
    scheduler: Arc<ManualScheduler>,
    clock: Arc<Clock>,
    media: WirelessPort,
    driver: Arc<RecordingDriver>,
    port: Arc<Port>,
}

fn station(
    priority_1: u8,
    last: u8,
    peer: u8,
    ipc: Option<Box<dyn IpcSink>>,
) -> Station {
    let scheduler = Arc::new(ManualScheduler::default());
    let mut ds = DefaultDs::new(identity(last));
    ds.priority_1 = priority_1;
    let clock = Clock::new(ds, scheduler.clone(), ipc);

    let driver = Arc::new(RecordingDriver::default());
    let media = WirelessPort::new(
        Arc::new(SinkNetwork::default()),
        Arc::new(JsonCodec),
        driver.clone(),
        mac(peer),
        Timestamper::new(None),
    );
    let port = Port::new(
        clock.clone(),
        1,
        Box::new(media.clone()),
        PortSettings::default(),
    );
    Station {
        scheduler,
        clock,
        media,
        driver,
        port,
    }
}

#[test]
fn wireless_ports_are_capable_without_peer_delay() {
    let s = station(248, 0x31, 0x32, None);
    s.port.handle_event(Event::Powerup).unwrap();

    assert!(s.port.as_capable());
    assert_eq!(s.scheduler.pending(1, Event::PDelayIntervalTimeoutExpires), 0);
    assert_eq!(s.scheduler.pending(1, Event::AnnounceReceiptTimeoutExpires), 1);
    s.port.stop();
}

#[test]
fn dialogs_carry_the_previous_follow_up() {
    let master = station(100, 0x41, 0x42, None);
    master.port.handle_event(Event::Powerup).unwrap();
    assert!(master
        .scheduler
        .fire(1, Event::AnnounceReceiptTimeoutExpires));
    assert_eq!(master.port.state(), PortState::Master);

    // nothing confirmed yet, the first request carries no follow up
    master
        .port
        .handle_event(Event::SyncIntervalTimeoutExpires)
        .unwrap();
    let first = master.driver.requests.lock().unwrap()[0].clone();
    assert_eq!(first.dialog_token, 1);
    assert_eq!(first.follow_up_dialog_token, 0);
    assert!(first.payload.is_empty());
    assert_eq!(master.media.prev_dialog().dialog_token, 1);

    master.media.timing_measurement_confirm(WirelessDialog {
        dialog_token: 1,
        fwup_seq: 0,
        action_devclk: 1_000,
        ack_devclk: 1_100,
    });
    master
        .port
        .handle_event(Event::SyncIntervalTimeoutExpires)
        .unwrap();

    let second = master.driver.requests.lock().unwrap()[1].clone();
    assert_eq!(second.dialog_token, 2);
    assert_eq!(second.follow_up_dialog_token, 1);
    assert_eq!((second.t1, second.t4), (1_000, 1_100));
    match JsonCodec.decode(&second.payload).unwrap() {
        Message::FollowUp(follow_up) => {
            assert_eq!(follow_up.header.sequence_id, 0);
            assert_eq!(follow_up.precise_origin_timestamp.to_nanos(), 10_000);
            assert_eq!(follow_up.rate_ratio(), 1.0);
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(master.port.counters().tx_follow_up, 1);
    assert_eq!(master.port.counters().tx_sync, 2);

    master.port.stop();
}

#[test]
fn indication_synchronizes_the_slave() {
    let master = station(100, 0x51, 0x52, None);
    master.port.handle_event(Event::Powerup).unwrap();
    assert!(master
        .scheduler
        .fire(1, Event::AnnounceReceiptTimeoutExpires));
    master
        .port
        .handle_event(Event::SyncIntervalTimeoutExpires)
        .unwrap();
    master.media.timing_measurement_confirm(WirelessDialog {
        dialog_token: 1,
        fwup_seq: 0,
        action_devclk: 1_000,
        ack_devclk: 1_100,
    });
    master
        .port
        .handle_event(Event::SyncIntervalTimeoutExpires)
        .unwrap();
    let payload = master.driver.requests.lock().unwrap()[1].payload.clone();
    master.port.stop();

    let offsets = Arc::new(Mutex::new(Vec::new()));
    let slave = station(200, 0x52, 0x51, Some(Box::new(Offsets(offsets.clone()))));
    let sender = PortIdentity {
        clock_identity: identity(0x51),
        port_number: 1,
    };
    slave
        .port
        .receive_frame(mac(0x51), &encode(&announce(sender, identity(0x51), 100, 0)));
    assert!(slave.scheduler.fire(1, Event::StateChange));
    assert_eq!(slave.port.state(), PortState::Slave);

    // the peer's first dialog, as seen by the slave
    let local = WirelessDialog {
        dialog_token: 1,
        fwup_seq: 0,
        action_devclk: 1_050,
        ack_devclk: 1_080,
    };
    slave
        .media
        .timing_measurement_indication(&slave.port, local, WirelessDialog::default(), &[]);
    assert_eq!(slave.port.sync_count(), 0);

    let current = WirelessDialog {
        dialog_token: 2,
        fwup_seq: 1,
        action_devclk: 5_000,
        ack_devclk: 5_030,
    };
    let previous = WirelessDialog {
        dialog_token: 1,
        fwup_seq: 0,
        action_devclk: 1_000,
        ack_devclk: 1_100,
    };
    slave
        .media
        .timing_measurement_indication(&slave.port, current, previous, &payload);

    // (1000 - 300) / 2
    assert_eq!(slave.media.link_delay(), 350);
    assert_eq!(slave.port.sync_count(), 1);
    assert_eq!(slave.port.pdelay_count(), 1);
    assert!(slave.clock.lock().last_sync().is_some());

    let offsets = offsets.lock().unwrap();
    assert_eq!(offsets.len(), 1);
    // arrival 10500, master time 10000 plus the link delay
    assert_eq!(offsets[0].master_local_offset, 150);
    assert_eq!(offsets[0].port_state, PortState::Slave);
}

#[test]
fn stale_indication_is_ignored() {
    let s = station(200, 0x61, 0x62, None);
    s.media.timing_measurement_indication(
        &s.port,
        WirelessDialog {
            dialog_token: 9,
            ..Default::default()
        },
        WirelessDialog {
            dialog_token: 4,
            fwup_seq: 3,
            action_devclk: 10,
            ack_devclk: 20,
        },
        b"{}",
    );
    assert_eq!(s.port.sync_count(), 0);
    assert_eq!(s.media.prev_dialog().dialog_token, 9);
}
