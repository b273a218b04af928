//! Backend NFC commands through the handler and the controller.

use std::sync::Arc;

use serde_json::{Value, json};

use attractap::adapters::nvs::NvsAdapter;
use attractap::adapters::time::{ManualClock, ManualDelay};
use attractap::api::ApiProtocolHandler;
use attractap::app::ports::{Clock, Key};
use attractap::bus::state::bounded;
use attractap::bus::{ApiEventKind, InputEventKind};
use attractap::nfc::NfcController;

use crate::mock_hw::{MockReader, Rig};

const UID: [u8; 7] = [0x04, 0xa1, 0x22, 0x6b, 0x3c, 0x58, 0x80];
const UID_HEX: &str = "04a1226b3c5880";

const ZERO: Key = [0x00; 16];
const OLD: Key = [0x11; 16];
const NEW: Key = [0xa5; 16];

fn hex(key: &Key) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

fn inject(rig: &Rig, kind: &str, payload: Value) {
    let text = json!({ "data": { "type": kind, "payload": payload } }).to_string();
    rig.bus.inbound().try_send(bounded(&text)).unwrap();
}

fn responses(rig: &Rig, kind: &str) -> Vec<Value> {
    rig.drain_outbound()
        .iter()
        .map(|f| serde_json::from_str::<Value>(f).unwrap())
        .filter(|v| v["data"]["type"] == kind)
        .collect()
}

fn handler(rig: &Rig) -> ApiProtocolHandler<NvsAdapter, Arc<ManualClock>> {
    ApiProtocolHandler::new(
        rig.bus.clone(),
        rig.settings.clone(),
        rig.clock.clone(),
        &rig.cfg,
    )
}

fn controller<'a>(
    rig: &'a Rig,
    reader: MockReader,
) -> NfcController<MockReader, ManualDelay<'a>, Arc<ManualClock>> {
    NfcController::new(
        reader,
        ManualDelay::new(&rig.clock),
        rig.clock.clone(),
        rig.bus.clone(),
        &rig.cfg,
    )
}

#[test]
fn failed_authentication_is_reported_and_tapping_resumes() {
    let rig = Rig::new();
    rig.ethernet_up();
    let mut api = handler(&rig);
    let mut nfc = controller(&rig, MockReader::with_card(&UID));

    inject(
        &rig,
        "NFC_AUTHENTICATE",
        json!({ "keyNumber": 0, "authenticationKey": hex(&ZERO) }),
    );
    api.tick();
    assert_eq!(rig.bus.pending_event().kind, ApiEventKind::WaitForProcessing);
    assert!(rig.bus.nfc_command_outstanding());
    rig.drain_outbound();

    let start = rig.clock.now_ms();
    nfc.tick();
    assert_eq!(nfc.reader().auth_calls, vec![(0, ZERO); 3]);
    assert_eq!(
        rig.clock.now_ms() - start,
        2 * u64::from(rig.cfg.nfc_auth_retry_delay_ms)
    );
    assert!(!rig.bus.nfc_command_outstanding());

    let event = rig.bus.input_events().try_receive().expect("result event");
    assert_eq!(event.kind, InputEventKind::NfcAuthenticateFailed);
    assert!(rig.bus.input_events().is_empty(), "no tap while processing");

    rig.bus.input_events().try_send(event).unwrap();
    api.tick();
    let out = responses(&rig, "NFC_AUTHENTICATE");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["event"], "RESPONSE");
    assert_eq!(out[0]["data"]["payload"], json!({ "successful": false }));

    inject(&rig, "NFC_ENABLE_CARD_CHECKING", json!({}));
    api.tick();
    assert_eq!(rig.bus.pending_event().kind, ApiEventKind::WaitForNfcTap);
    nfc.tick();
    assert!(nfc.detection_enabled());

    api.tick();
    let taps = responses(&rig, "NFC_TAP");
    assert_eq!(taps.len(), 1);
    assert_eq!(taps[0]["event"], "EVENT");
    assert_eq!(taps[0]["data"]["payload"], json!({ "cardUID": UID_HEX }));
}

#[test]
fn successful_authentication_waits_for_removal() {
    let rig = Rig::new();
    let mut api = handler(&rig);
    let mut reader = MockReader::with_card(&UID).accepting(2, NEW);
    reader.linger_polls = 3;
    let mut nfc = controller(&rig, reader);

    inject(
        &rig,
        "NFC_AUTHENTICATE",
        json!({ "keyNumber": 2, "authenticationKey": hex(&NEW).to_uppercase() }),
    );
    api.tick();
    rig.drain_outbound();

    let start = rig.clock.now_ms();
    nfc.tick();
    assert_eq!(nfc.reader().auth_calls.len(), 1);
    assert_eq!(rig.clock.now_ms() - start, 3 * 50);

    api.tick();
    let out = responses(&rig, "NFC_AUTHENTICATE");
    assert_eq!(out[0]["data"]["payload"], json!({ "successful": true }));
}

#[test]
fn removal_wait_is_bounded() {
    let rig = Rig::new();
    let mut reader = MockReader::with_card(&UID).accepting(0, ZERO);
    reader.linger_polls = u32::MAX;
    let mut nfc = controller(&rig, reader);

    rig.bus
        .submit_nfc_command(attractap::bus::NfcCommand::Authenticate {
            key_index: 0,
            auth_key: ZERO,
        })
        .unwrap();
    let start = rig.clock.now_ms();
    nfc.tick();

    let waited = rig.clock.now_ms() - start;
    assert!(waited >= u64::from(rig.cfg.nfc_removal_timeout_ms));
    assert!(waited < u64::from(rig.cfg.nfc_removal_timeout_ms) + 100);
    let event = rig.bus.input_events().try_receive().unwrap();
    assert_eq!(event.kind, InputEventKind::NfcAuthenticateSuccess);
}

#[test]
fn change_key_installs_and_verifies_the_new_key() {
    let rig = Rig::new();
    let mut api = handler(&rig);
    let reader = MockReader::with_card(&UID)
        .accepting(0, ZERO)
        .accepting(1, OLD);
    let mut nfc = controller(&rig, reader);

    inject(
        &rig,
        "NFC_CHANGE_KEY",
        json!({
            "keyNumber": 1,
            "authKey": hex(&ZERO),
            "oldKey": hex(&OLD),
            "newKey": hex(&NEW),
        }),
    );
    api.tick();
    rig.drain_outbound();
    nfc.tick();

    let reader = nfc.reader();
    assert_eq!(reader.change_calls, 1);
    assert_eq!(reader.auth_calls, vec![(0, ZERO), (1, NEW)]);
    assert!(reader.keys.contains(&(1, NEW)));
    assert!(!reader.keys.contains(&(1, OLD)));

    api.tick();
    let out = responses(&rig, "NFC_CHANGE_KEY");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["data"]["payload"], json!({ "successful": true }));
}

#[test]
fn change_key_that_does_not_verify_is_a_failure() {
    let rig = Rig::new();
    let mut reader = MockReader::with_card(&UID).accepting(0, ZERO);
    reader.change_key_applies = false;
    let mut nfc = controller(&rig, reader);

    rig.bus
        .submit_nfc_command(attractap::bus::NfcCommand::ChangeKey {
            key_index: 1,
            auth_key: ZERO,
            old_key: OLD,
            new_key: NEW,
        })
        .unwrap();
    nfc.tick();

    assert_eq!(nfc.reader().change_calls, 1);
    assert_eq!(
        &nfc.reader().auth_calls[1..],
        &[(1, NEW); 3],
        "verification is retried before giving up"
    );
    let event = rig.bus.input_events().try_receive().unwrap();
    assert_eq!(event.kind, InputEventKind::NfcChangeKeyFailed);
}

#[test]
fn rejected_master_key_skips_the_change() {
    let rig = Rig::new();
    let mut nfc = controller(&rig, MockReader::with_card(&UID));

    rig.bus
        .submit_nfc_command(attractap::bus::NfcCommand::ChangeKey {
            key_index: 1,
            auth_key: ZERO,
            old_key: OLD,
            new_key: NEW,
        })
        .unwrap();
    nfc.tick();

    assert_eq!(nfc.reader().change_calls, 0);
    let event = rig.bus.input_events().try_receive().unwrap();
    assert_eq!(event.kind, InputEventKind::NfcChangeKeyFailed);
}

#[test]
fn second_command_is_refused_while_one_is_outstanding() {
    let rig = Rig::new();
    let mut api = handler(&rig);

    let payload = json!({ "keyNumber": 0, "authenticationKey": hex(&ZERO) });
    inject(&rig, "NFC_AUTHENTICATE", payload.clone());
    api.tick();
    inject(&rig, "NFC_AUTHENTICATE", payload);
    api.tick();

    // Both are ACKed, only one reaches the controller.
    assert_eq!(responses(&rig, "ACK_NFC_AUTHENTICATE").len(), 2);
    assert!(rig.bus.next_nfc_command().is_some());
    assert!(rig.bus.next_nfc_command().is_none());
}

#[test]
fn missing_reader_answers_commands_with_failure() {
    let rig = Rig::new();
    let mut api = handler(&rig);
    let mut reader = MockReader::with_card(&UID).accepting(0, ZERO);
    reader.present = false;
    let mut nfc = controller(&rig, reader);

    let payload = json!({ "keyNumber": 0, "authenticationKey": hex(&ZERO) });
    inject(&rig, "NFC_AUTHENTICATE", payload.clone());
    api.tick();
    nfc.tick();
    api.tick();

    assert!(!nfc.is_ready());
    assert!(nfc.reader().auth_calls.is_empty());
    assert!(!rig.bus.nfc_command_outstanding());
    let out = responses(&rig, "NFC_AUTHENTICATE");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["data"]["payload"], json!({ "successful": false }));

    // Later commands are not stuck behind the first one.
    inject(&rig, "NFC_AUTHENTICATE", payload);
    api.tick();
    nfc.tick();
    api.tick();
    assert_eq!(responses(&rig, "NFC_AUTHENTICATE").len(), 1);
    assert!(!rig.bus.nfc_command_outstanding());
}
