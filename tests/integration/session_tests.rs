//! Websocket session: reconnects, outbound ordering, certificate rotation.

use attractap::app::ports::WsEvent;
use attractap::bus::state::bounded;
use attractap::certs::{AdaptiveCertManager, CaCertificate};
use attractap::ws::{WebsocketSession, WsState};

use crate::mock_hw::{MockWs, Rig};

static BUNDLE: &[CaCertificate] = &[
    CaCertificate {
        name: "isrg-root-x1",
        pem: "X1\0",
    },
    CaCertificate {
        name: "isrg-root-x2",
        pem: "X2\0",
    },
    CaCertificate {
        name: "digicert-global-g2",
        pem: "G2\0",
    },
];

type Session = WebsocketSession<
    MockWs,
    attractap::adapters::nvs::NvsAdapter,
    std::sync::Arc<attractap::adapters::time::ManualClock>,
>;

fn session(rig: &Rig) -> Session {
    WebsocketSession::new(
        MockWs::default(),
        AdaptiveCertManager::with_candidates(rig.nvs.clone(), BUNDLE),
        rig.settings.clone(),
        rig.clock.clone(),
        rig.bus.clone(),
        &rig.cfg,
    )
}

fn connect(s: &mut Session) {
    s.tick();
    assert_eq!(s.state(), WsState::Connecting);
    s.transport_mut().events.push_back(WsEvent::Connected);
    s.tick();
    assert_eq!(s.state(), WsState::Connected);
}

#[test]
fn frames_queued_while_down_arrive_in_order() {
    let rig = Rig::new().with_backend();
    rig.ethernet_up();
    let mut s = session(&rig);
    connect(&mut s);

    s.transport_mut().events.push_back(WsEvent::Closed);
    s.tick();
    assert_eq!(s.state(), WsState::Init);
    assert!(!rig.bus.session().transport_connected);

    rig.bus.outbound().try_send(bounded("first")).unwrap();
    rig.bus.outbound().try_send(bounded("second")).unwrap();

    s.tick();
    assert_eq!(s.transport().opened.len(), 1, "reconnect waits for the delay");

    rig.clock.advance(u64::from(rig.cfg.ws_reconnect_delay_ms));
    connect(&mut s);
    assert_eq!(s.transport().opened.len(), 2);

    s.tick();
    assert_eq!(s.transport().sent, ["first", "second"]);
    assert!(rig.bus.outbound().is_empty());
}

#[test]
fn inbound_text_reaches_the_bus() {
    let rig = Rig::new().with_backend();
    rig.ethernet_up();
    let mut s = session(&rig);
    connect(&mut s);

    s.transport_mut().push_text(r#"{"data":{"type":"DISPLAY_TEXT","payload":{}}}"#);
    s.transport_mut().events.push_back(WsEvent::Binary { len: 12 });
    s.tick();

    let frame = rig.bus.inbound().try_receive().expect("text forwarded");
    assert!(frame.contains("DISPLAY_TEXT"));
    assert!(rig.bus.inbound().is_empty(), "binary frames are not forwarded");
}

#[test]
fn losing_the_transport_drops_authentication() {
    let rig = Rig::new().with_backend();
    rig.ethernet_up();
    let mut s = session(&rig);
    connect(&mut s);
    rig.bus.set_api_state(true, "Front door");

    s.transport_mut().events.push_back(WsEvent::Disconnected);
    s.tick();
    let session = rig.bus.session();
    assert!(!session.transport_connected);
    assert!(!session.authenticated);
    assert!(session.device_name.is_empty());
}

#[test]
fn tls_failures_rotate_through_the_bundle() {
    let rig = Rig::new();
    rig.settings
        .save_api_config("backend.example", 443, true)
        .unwrap();
    rig.ethernet_up();
    let mut s = session(&rig);

    for expected in ["isrg-root-x1", "isrg-root-x2", "digicert-global-g2", "isrg-root-x1"] {
        s.tick();
        let (url, ca) = s.transport().opened.last().cloned().unwrap();
        assert_eq!(url, "wss://backend.example:443/api/attractap/websocket");
        assert_eq!(ca, Some(expected));

        s.transport_mut().events.push_back(WsEvent::Error);
        s.tick();
        rig.clock.advance(u64::from(rig.cfg.ws_reconnect_delay_ms));
    }

    // The next candidate works and is remembered across restarts.
    connect(&mut s);
    assert_eq!(s.transport().opened.last().unwrap().1, Some("isrg-root-x2"));

    let mut fresh = AdaptiveCertManager::with_candidates(rig.nvs.clone(), BUNDLE);
    assert_eq!(fresh.certificate().map(|c| c.name), Some("isrg-root-x2"));
}

#[test]
fn endpoint_change_reconnects_immediately() {
    let rig = Rig::new().with_backend();
    rig.ethernet_up();
    let mut s = session(&rig);
    connect(&mut s);

    rig.settings.save_api_config("other.local", 8080, false).unwrap();
    s.tick();
    assert_eq!(s.transport().closes, 1);
    assert_eq!(s.state(), WsState::Connecting);
    assert_eq!(
        s.transport().opened.last().unwrap().0,
        "ws://other.local:8080/api/attractap/websocket"
    );
}
