mod common;

use std::{sync::Arc, time::Duration};

use common::{clock, ether_port, identity, loopback_pair, mac, wait_for, ManualScheduler};
use gptp::{
    port::{Event, PortSettings},
    PortState,
};

const WAIT: Duration = Duration::from_secs(5);

fn settings() -> PortSettings {
    PortSettings {
        // software timestamps on a loaded machine can be slow
        neighbor_prop_delay_thresh: 1_000_000_000,
        ..Default::default()
    }
}

#[test]
fn two_systems_agree_on_grandmaster() {
    let scheduler_a = Arc::new(ManualScheduler::default());
    let scheduler_b = Arc::new(ManualScheduler::default());
    let clock_a = clock(128, identity(0xa), scheduler_a.clone());
    let clock_b = clock(200, identity(0xb), scheduler_b.clone());

    let (link_a, link_b) = loopback_pair(mac(0xa), mac(0xb));
    let port_a = ether_port(&clock_a, 1, link_a, settings());
    let port_b = ether_port(&clock_b, 1, link_b, settings());

    port_a.handle_event(Event::Powerup).unwrap();
    port_b.handle_event(Event::Powerup).unwrap();
    assert_eq!(scheduler_a.pending(1, Event::PDelayIntervalTimeoutExpires), 1);
    assert_eq!(port_a.state(), PortState::Initializing);

    // peer delay both ways makes both ends as capable
    assert!(scheduler_a.fire(1, Event::PDelayIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || port_a.as_capable()));
    assert!(scheduler_b.fire(1, Event::PDelayIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || port_b.as_capable()));
    assert_eq!(port_a.pdelay_count(), 1);
    assert_eq!(port_a.peer_rate_ratio(), 1.0);
    assert_eq!(port_b.counters().tx_pdelay_resp, 1);

    // nobody announced yet, both assume the grandmaster role
    assert!(scheduler_a.fire(1, Event::AnnounceReceiptTimeoutExpires));
    assert!(scheduler_b.fire(1, Event::AnnounceReceiptTimeoutExpires));
    assert_eq!(port_a.state(), PortState::Master);
    assert_eq!(port_b.state(), PortState::Master);
    assert!(clock_b.lock().is_grandmaster());

    assert!(scheduler_a.fire(1, Event::AnnounceIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || scheduler_b.pending(1, Event::StateChange) == 1));
    assert!(scheduler_b.fire(1, Event::AnnounceIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || scheduler_a.pending(1, Event::StateChange) == 1));

    assert!(scheduler_a.fire(1, Event::StateChange));
    assert!(scheduler_b.fire(1, Event::StateChange));

    assert_eq!(port_a.state(), PortState::Master);
    assert_eq!(port_b.state(), PortState::Slave);
    assert!(clock_a.lock().is_grandmaster());
    assert!(!clock_b.lock().is_grandmaster());
    assert_eq!(clock_b.lock().grandmaster().identity, clock_a.identity());
    assert_eq!(clock_b.lock().grandmaster().priority_1, 128);

    // the slave follows the grandmaster's syncs
    assert!(scheduler_a.fire(1, Event::SyncIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || port_b.sync_count() == 1));
    assert_eq!(port_a.counters().tx_sync, 1);
    assert_eq!(port_a.counters().tx_follow_up, 1);
    assert!(clock_b.lock().last_sync().is_some());
    assert_eq!(scheduler_b.pending(1, Event::SyncReceiptTimeoutExpires), 1);

    port_a.stop();
    port_b.stop();
    assert_eq!(port_a.state(), PortState::Disabled);
    assert_eq!(clock_a.lock().port_count(), 0);
}

#[test]
fn slave_loses_master_and_takes_over() {
    let scheduler_a = Arc::new(ManualScheduler::default());
    let scheduler_b = Arc::new(ManualScheduler::default());
    let clock_a = clock(100, identity(0x1a), scheduler_a.clone());
    let clock_b = clock(110, identity(0x1b), scheduler_b.clone());

    let (link_a, link_b) = loopback_pair(mac(0x1a), mac(0x1b));
    let port_a = ether_port(&clock_a, 1, link_a, settings());
    let port_b = ether_port(&clock_b, 1, link_b, settings());
    port_a.handle_event(Event::Powerup).unwrap();
    port_b.handle_event(Event::Powerup).unwrap();

    assert!(scheduler_b.fire(1, Event::PDelayIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || port_b.as_capable()));
    assert!(scheduler_a.fire(1, Event::PDelayIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || port_a.as_capable()));

    assert!(scheduler_a.fire(1, Event::AnnounceReceiptTimeoutExpires));
    assert!(scheduler_b.fire(1, Event::AnnounceReceiptTimeoutExpires));
    assert!(scheduler_a.fire(1, Event::AnnounceIntervalTimeoutExpires));
    assert!(wait_for(WAIT, || scheduler_b.pending(1, Event::StateChange) == 1));
    assert!(scheduler_b.fire(1, Event::StateChange));
    assert_eq!(port_b.state(), PortState::Slave);

    // the grandmaster goes away, its announces stop
    port_a.stop();
    assert!(scheduler_b.fire(1, Event::AnnounceReceiptTimeoutExpires));
    assert_eq!(port_b.state(), PortState::Master);
    assert!(clock_b.lock().is_grandmaster());
    assert_eq!(clock_b.lock().grandmaster().identity, clock_b.identity());
    assert!(port_b.qualified_announce().is_none());

    port_b.stop();
}
