//! Backend protocol through the real handler, and end to end through the
//! websocket session.

use std::sync::Arc;

use serde_json::{Value, json};

use attractap::adapters::nvs::NvsAdapter;
use attractap::adapters::time::ManualClock;
use attractap::api::ApiProtocolHandler;
use attractap::app::ports::WsEvent;
use attractap::bus::state::bounded;
use attractap::bus::{ApiEventKind, InputEvent, InputEventKind};
use attractap::certs::AdaptiveCertManager;
use attractap::ws::{WebsocketSession, WsState};

use crate::mock_hw::{MockWs, Rig};

type Handler = ApiProtocolHandler<NvsAdapter, Arc<ManualClock>>;

fn handler(rig: &Rig) -> Handler {
    ApiProtocolHandler::new(
        rig.bus.clone(),
        rig.settings.clone(),
        rig.clock.clone(),
        &rig.cfg,
    )
}

/// Ethernet up and the websocket transport reported connected.
fn usable(rig: &Rig) {
    rig.ethernet_up();
    rig.bus
        .set_transport_state(true, &rig.settings.api_config().target());
}

fn inject(rig: &Rig, kind: &str, payload: Value) {
    let text = json!({ "data": { "type": kind, "payload": payload } }).to_string();
    rig.bus.inbound().try_send(bounded(&text)).unwrap();
}

fn parsed(frames: &[String]) -> Vec<Value> {
    frames
        .iter()
        .map(|f| serde_json::from_str(f).expect("outbound frames are JSON"))
        .collect()
}

fn of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames
        .iter()
        .filter(|f| f["data"]["type"] == kind)
        .collect()
}

#[test]
fn unauthorized_reader_falls_back_to_registration() {
    let rig = Rig::new().with_backend().with_identity(7, "stale-token");
    rig.ethernet_up();

    let mut session = WebsocketSession::new(
        MockWs::default(),
        AdaptiveCertManager::new(rig.nvs.clone()),
        rig.settings.clone(),
        rig.clock.clone(),
        rig.bus.clone(),
        &rig.cfg,
    );
    let mut api = handler(&rig);

    session.tick();
    session.transport_mut().events.push_back(WsEvent::Connected);
    session.tick();
    assert_eq!(session.state(), WsState::Connected);

    // Usable: heartbeat plus an authentication request with the stored
    // identity go out.
    api.tick();
    for _ in 0..4 {
        session.tick();
    }
    let auth = session.transport().sent_of_type("READER_REQUEST_AUTHENTICATION");
    assert_eq!(auth.len(), 1);
    assert!(auth[0].contains("stale-token"));

    session
        .transport_mut()
        .push_text(r#"{"data":{"type":"READER_UNAUTHORIZED","payload":{"message":"bad token"}}}"#);
    session.tick();
    api.tick();

    assert!(!rig.settings.identity().is_registered());
    assert!(!rig.bus.session().authenticated);

    api.tick();
    for _ in 0..4 {
        session.tick();
    }
    let ws = session.transport();
    assert_eq!(ws.sent_of_type("ACK_READER_UNAUTHORIZED").len(), 1);
    let register = ws.sent_of_type("READER_REGISTER");
    assert_eq!(register.len(), 1);
    let frame: Value = serde_json::from_str(register[0]).unwrap();
    assert_eq!(frame["event"], "EVENT");
    assert_eq!(frame["data"]["payload"], json!({}));
}

#[test]
fn unauthorized_without_identity_is_harmless() {
    let rig = Rig::new().with_backend();
    let mut api = handler(&rig);

    inject(&rig, "READER_UNAUTHORIZED", json!({}));
    api.tick();

    assert!(!rig.settings.identity().is_registered());
    assert!(!rig.bus.session().authenticated);
    let out = parsed(&rig.drain_outbound());
    assert_eq!(out.len(), 1, "only the ACK, nothing periodic while unusable");
    assert_eq!(out[0]["event"], "RESPONSE");
    assert_eq!(out[0]["data"]["type"], "ACK_READER_UNAUTHORIZED");
}

#[test]
fn heartbeat_cadence_is_bounded() {
    let rig = Rig::new().with_backend().with_identity(3, "token");
    usable(&rig);
    rig.bus.set_api_state(true, "Workshop");
    let mut api = handler(&rig);

    let mut heartbeats = 0;
    for _ in 0..(20_000 / rig.cfg.api_tick_ms) {
        api.tick();
        heartbeats += rig
            .drain_outbound()
            .iter()
            .filter(|f| f.as_str() == r#"{"event":"HEARTBEAT"}"#)
            .count();
        rig.clock.advance(u64::from(rig.cfg.api_tick_ms));
    }

    assert!(heartbeats >= 4, "{heartbeats} heartbeats");
    assert!(heartbeats <= 5, "{heartbeats} heartbeats");
}

#[test]
fn registration_then_authentication() {
    let rig = Rig::new().with_backend();
    usable(&rig);
    let mut api = handler(&rig);

    api.tick();
    let out = parsed(&rig.drain_outbound());
    assert_eq!(of_type(&out, "READER_REGISTER").len(), 1);

    // The registration reply is ACKed and the stored identity is used for
    // an authentication request on the same tick.
    inject(&rig, "READER_REGISTER", json!({ "id": 42, "token": "fresh" }));
    api.tick();
    let identity = rig.settings.identity();
    assert_eq!(identity.reader_id, 42);
    assert_eq!(identity.api_key.as_str(), "fresh");

    let out = parsed(&rig.drain_outbound());
    assert_eq!(of_type(&out, "ACK_READER_REGISTER").len(), 1);
    let auth = of_type(&out, "READER_REQUEST_AUTHENTICATION");
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0]["data"]["payload"], json!({ "id": 42, "token": "fresh" }));

    inject(&rig, "READER_AUTHENTICATED", json!({ "name": "Laser cutter" }));
    api.tick();
    let session = rig.bus.session();
    assert!(session.authenticated);
    assert_eq!(session.device_name.as_str(), "Laser cutter");

    rig.clock.advance(u64::from(rig.cfg.handshake_interval_ms));
    api.tick();
    let out = parsed(&rig.drain_outbound());
    assert!(of_type(&out, "READER_REQUEST_AUTHENTICATION").is_empty());
}

#[test]
fn display_events_and_keypad_selection() {
    let rig = Rig::new().with_backend();
    let mut api = handler(&rig);

    inject(
        &rig,
        "SELECT_ITEM",
        json!({ "label": "Machine", "options": [{ "id": "m1", "label": "Lathe" }] }),
    );
    api.tick();
    let pending = rig.bus.pending_event();
    assert_eq!(pending.kind, ApiEventKind::ResourceSelection);
    assert_eq!(pending.payload["options"][0]["id"], "m1");

    rig.bus
        .input_events()
        .try_send(InputEvent::with_payload(InputEventKind::KeypadConfirm, "m1"))
        .unwrap();
    api.tick();

    let out = parsed(&rig.drain_outbound());
    assert_eq!(out[0]["data"]["type"], "ACK_SELECT_ITEM");
    let select = of_type(&out, "SELECT_ITEM");
    assert_eq!(select.len(), 1);
    assert_eq!(select[0]["event"], "RESPONSE");
    assert_eq!(select[0]["data"]["payload"], json!({ "value": "m1" }));
}

#[test]
fn firmware_info_and_unknown_types() {
    let rig = Rig::new();
    let mut api = handler(&rig);

    inject(&rig, "READER_FIRMWARE_INFO", json!({}));
    api.tick();
    inject(&rig, "SOMETHING_NEW", json!({}));
    api.tick();

    let out = parsed(&rig.drain_outbound());
    let info = of_type(&out, "READER_FIRMWARE_INFO");
    assert_eq!(info.len(), 1);
    assert_eq!(info[0]["data"]["payload"]["name"], "attractap");
    assert_eq!(
        info[0]["data"]["payload"]["version"],
        env!("CARGO_PKG_VERSION")
    );
    assert_eq!(of_type(&out, "ACK_SOMETHING_NEW").len(), 1);
    assert_eq!(rig.bus.pending_event().kind, ApiEventKind::None);
}

#[test]
fn malformed_inbound_is_dropped_without_ack() {
    let rig = Rig::new();
    let mut api = handler(&rig);

    rig.bus.inbound().try_send(bounded("{not json")).unwrap();
    api.tick();
    rig.bus
        .inbound()
        .try_send(bounded(r#"{"data":{"payload":{}}}"#))
        .unwrap();
    api.tick();

    assert!(rig.drain_outbound().is_empty());
}
