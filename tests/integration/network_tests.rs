//! Interface managers against scripted link drivers.

use core::net::Ipv4Addr;

use attractap::app::ports::LinkEvent;
use attractap::net::{NetState, NetworkInterfaceManager};

use crate::mock_hw::{MockLink, Rig};

#[test]
fn ethernet_without_address_times_out_and_retries() {
    let rig = Rig::new();
    let link = MockLink {
        link_on_connect: true,
        ..MockLink::configured()
    };
    let mut eth =
        NetworkInterfaceManager::ethernet(link, rig.clock.clone(), rig.bus.clone(), &rig.cfg);

    eth.tick(); // Init -> Connecting
    eth.tick(); // connect()
    assert_eq!(eth.driver().connects, 1);
    eth.tick(); // LinkUp
    assert_eq!(eth.state(), NetState::ConnectedWaitingForAddress);
    assert!(!rig.bus.connectivity().ethernet_connected);

    rig.clock.advance(u64::from(rig.cfg.eth_dhcp_timeout_ms) + 1);
    eth.tick();
    assert_eq!(eth.state(), NetState::Disconnected);

    eth.tick();
    assert_eq!(eth.state(), NetState::Connecting);

    eth.tick();
    assert_eq!(eth.driver().connects, 2);
    assert!(eth.driver().releases >= 2, "every attempt releases first");
}

#[test]
fn ethernet_address_publishes_to_bus() {
    let rig = Rig::new();
    let link = MockLink {
        link_on_connect: true,
        address_on_connect: Some(Ipv4Addr::new(10, 0, 0, 50)),
        ..MockLink::configured()
    };
    let mut eth =
        NetworkInterfaceManager::ethernet(link, rig.clock.clone(), rig.bus.clone(), &rig.cfg);

    for _ in 0..3 {
        eth.tick();
    }
    assert_eq!(eth.state(), NetState::Connected);
    let c = rig.bus.connectivity();
    assert!(c.ethernet_connected);
    assert_eq!(c.ethernet_address, Some(Ipv4Addr::new(10, 0, 0, 50)));
    assert!(c.any_connected());

    eth.driver_mut().events.push_back(LinkEvent::LinkDown { reason: 0 });
    eth.tick();
    assert_eq!(eth.state(), NetState::Disconnected);
    assert!(!rig.bus.connectivity().any_connected());
}

#[test]
fn ethernet_cools_down_after_max_retries() {
    let rig = Rig::new();
    let link = MockLink {
        fail_connects: u32::MAX,
        ..MockLink::configured()
    };
    let mut eth =
        NetworkInterfaceManager::ethernet(link, rig.clock.clone(), rig.bus.clone(), &rig.cfg);

    eth.tick();
    // Long enough for every backoff step, far shorter than the cool-down
    // plus all those steps.
    for _ in 0..200 {
        eth.tick();
        rig.clock.advance(1_000);
        if eth.state() == NetState::ConnectFailed {
            break;
        }
    }
    assert_eq!(eth.state(), NetState::ConnectFailed);
    assert_eq!(eth.driver().connects, u32::from(rig.cfg.eth_max_retries));

    eth.tick();
    assert_eq!(eth.driver().connects, u32::from(rig.cfg.eth_max_retries));

    rig.clock.advance(u64::from(rig.cfg.eth_cooldown_ms()) + 1);
    eth.tick();
    assert_eq!(eth.state(), NetState::Connecting);
    eth.tick();
    assert_eq!(eth.driver().connects, u32::from(rig.cfg.eth_max_retries) + 1);
}

#[test]
fn wifi_retries_on_fixed_interval() {
    let rig = Rig::new();
    let link = MockLink {
        fail_connects: 1,
        link_on_connect: true,
        address_on_connect: Some(Ipv4Addr::new(192, 168, 4, 20)),
        ..MockLink::configured()
    };
    let mut wifi =
        NetworkInterfaceManager::wifi(link, rig.clock.clone(), rig.bus.clone(), &rig.cfg);

    wifi.tick();
    assert_eq!(wifi.state(), NetState::ConnectFailed);
    assert_eq!(wifi.driver().connects, 1);

    rig.clock.advance(1_000);
    wifi.tick();
    assert_eq!(wifi.driver().connects, 1, "retry waits for the interval");

    rig.clock.advance(u64::from(rig.cfg.wifi_retry_interval_ms));
    wifi.tick();
    assert_eq!(wifi.driver().connects, 2);
    assert_eq!(wifi.state(), NetState::Connecting);

    wifi.tick();
    assert_eq!(wifi.state(), NetState::Connected);
    let c = rig.bus.connectivity();
    assert!(c.wifi_connected);
    assert_eq!(c.wifi_ssid.as_str(), "lab");
}

#[test]
fn unconfigured_wifi_stays_idle() {
    let rig = Rig::new();
    let mut wifi = NetworkInterfaceManager::wifi(
        MockLink::default(),
        rig.clock.clone(),
        rig.bus.clone(),
        &rig.cfg,
    );
    for _ in 0..5 {
        wifi.tick();
        rig.clock.advance(20_000);
    }
    assert_eq!(wifi.driver().connects, 0);
    assert_eq!(wifi.state(), NetState::Init);
}
