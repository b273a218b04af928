//! Reader side of the backend protocol.
//!
//! Per tick, in this order:
//!
//! 1. at most one inbound frame: ACK it (`ACK_<type>`), then dispatch;
//! 2. at most one local input event: translate it into an outbound frame;
//! 3. while the session is usable: heartbeat, registration and
//!    authentication requests, each on its own cadence.
//!
//! ```text
//!  inbound ──▶ decode ──▶ ACK ──▶ dispatch ──▶ settings / bus state / nfc-cmd
//!  input_events ─────────────────▶ translate ──▶ outbound
//!  timers ──(usable)─────────────▶ HEARTBEAT · READER_REGISTER · READER_REQUEST_AUTHENTICATION
//! ```

use std::sync::Arc;

use log::{error, info, warn};
use serde_json::{Value, json};

use super::envelope::{self, Direction};
use crate::app::ports::{Clock, StoragePort};
use crate::bus::{
    ApiEventKind, ChangeWatcher, InputEvent, InputEventKind, NfcCommand, SharedStateBus,
};
use crate::config::{FIRMWARE_NAME, FIRMWARE_VARIANT, FIRMWARE_VERSION, SystemConfig};
use crate::nfc::hex::decode_key;
use crate::settings::Settings;

fn due(last: Option<u64>, now: u64, interval: u64) -> bool {
    last.is_none_or(|t| now.saturating_sub(t) >= interval)
}

fn str_field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("")
}

fn key_number(payload: &Value) -> u8 {
    payload
        .get("keyNumber")
        .and_then(Value::as_u64)
        .and_then(|n| u8::try_from(n).ok())
        .unwrap_or_else(|| {
            warn!("API: missing or invalid keyNumber, using 0");
            0
        })
}

pub struct ApiProtocolHandler<S: StoragePort, C: Clock> {
    bus: Arc<SharedStateBus>,
    settings: Arc<Settings<S>>,
    clock: C,
    heartbeat_interval_ms: u64,
    handshake_interval_ms: u64,
    watcher: ChangeWatcher,
    usable: bool,
    last_heartbeat_ms: Option<u64>,
    last_register_ms: Option<u64>,
    last_auth_ms: Option<u64>,
}

impl<S: StoragePort, C: Clock> ApiProtocolHandler<S, C> {
    pub fn new(
        bus: Arc<SharedStateBus>,
        settings: Arc<Settings<S>>,
        clock: C,
        cfg: &SystemConfig,
    ) -> Self {
        Self {
            bus,
            settings,
            clock,
            heartbeat_interval_ms: u64::from(cfg.heartbeat_interval_ms),
            handshake_interval_ms: u64::from(cfg.handshake_interval_ms),
            watcher: ChangeWatcher::new(),
            usable: false,
            last_heartbeat_ms: None,
            last_register_ms: None,
            last_auth_ms: None,
        }
    }

    pub fn tick(&mut self) {
        self.refresh_usable();
        self.process_inbound();
        self.process_input();
        if self.usable {
            self.run_periodic();
        }
    }

    fn refresh_usable(&mut self) {
        if !self.bus.changed_since(&mut self.watcher) {
            return;
        }
        let usable = self.bus.session_usable();
        if usable == self.usable {
            return;
        }
        if usable {
            info!("API: session usable");
        } else {
            info!("API: session lost, handshake timers reset");
            self.last_heartbeat_ms = None;
            self.last_register_ms = None;
            self.last_auth_ms = None;
        }
        self.usable = usable;
    }

    // ── Outbound ─────────────────────────────────────────────

    fn send(&self, direction: Direction, kind: &str, payload: &Value) {
        match envelope::encode(direction, kind, payload) {
            // A full queue logs the drop itself.
            Ok(frame) => {
                let _ = self.bus.outbound().try_send(frame);
            }
            Err(e) => warn!("API: dropping outbound {}: {}", kind, e),
        }
    }

    fn respond(&self, kind: &str, payload: &Value) {
        self.send(Direction::Response, kind, payload);
    }

    fn run_periodic(&mut self) {
        let now = self.clock.now_ms();

        if due(self.last_heartbeat_ms, now, self.heartbeat_interval_ms) {
            match envelope::heartbeat() {
                Ok(frame) => {
                    let _ = self.bus.outbound().try_send(frame);
                }
                Err(e) => warn!("API: heartbeat not encoded: {}", e),
            }
            self.last_heartbeat_ms = Some(now);
        }

        let identity = self.settings.identity();
        if !identity.is_registered() {
            if due(self.last_register_ms, now, self.handshake_interval_ms) {
                info!("API: requesting registration");
                self.send(Direction::Event, "READER_REGISTER", &json!({}));
                self.last_register_ms = Some(now);
            }
        } else if !self.bus.session().authenticated
            && due(self.last_auth_ms, now, self.handshake_interval_ms)
        {
            info!("API: requesting authentication for reader {}", identity.reader_id);
            self.send(
                Direction::Event,
                "READER_REQUEST_AUTHENTICATION",
                &json!({ "id": identity.reader_id, "token": identity.api_key.as_str() }),
            );
            self.last_auth_ms = Some(now);
        }
    }

    // ── Inbound ──────────────────────────────────────────────

    fn process_inbound(&mut self) {
        let Some(frame) = self.bus.inbound().try_receive() else {
            return;
        };
        let message = match envelope::decode(&frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("API: dropping inbound frame ({} bytes): {}", frame.len(), e);
                return;
            }
        };

        info!("API: received {}", message.kind);
        self.respond(&format!("ACK_{}", message.kind), &json!({}));
        self.dispatch(&message.kind, message.payload);
    }

    fn dispatch(&mut self, kind: &str, payload: Value) {
        match kind {
            "READER_REGISTER" => self.on_registration(&payload),
            "READER_UNAUTHORIZED" => self.on_unauthorized(&payload),
            "READER_AUTHENTICATED" => {
                let name = str_field(&payload, "name");
                info!("API: authenticated as '{}'", name);
                self.bus.set_api_state(true, name);
            }
            "READER_REQUEST_AUTHENTICATION" => self.on_request_authentication(),
            "READER_FIRMWARE_INFO" => self.respond(
                "READER_FIRMWARE_INFO",
                &json!({
                    "name": FIRMWARE_NAME,
                    "variant": FIRMWARE_VARIANT,
                    "version": FIRMWARE_VERSION,
                }),
            ),
            "READER_FIRMWARE_UPDATE_REQUIRED" => {
                self.set_pending(ApiEventKind::FirmwareUpdate, payload);
            }
            "NFC_ENABLE_CARD_CHECKING" => self.set_pending(ApiEventKind::WaitForNfcTap, payload),
            "WAIT_FOR_PROCESSING" => self.set_pending(ApiEventKind::WaitForProcessing, payload),
            "NFC_CHANGE_KEY" => {
                let command = NfcCommand::ChangeKey {
                    key_index: key_number(&payload),
                    auth_key: decode_key(str_field(&payload, "authKey")),
                    old_key: decode_key(str_field(&payload, "oldKey")),
                    new_key: decode_key(str_field(&payload, "newKey")),
                };
                self.set_pending(ApiEventKind::WaitForProcessing, payload);
                self.submit(command);
            }
            "NFC_AUTHENTICATE" => {
                let command = NfcCommand::Authenticate {
                    key_index: key_number(&payload),
                    auth_key: decode_key(str_field(&payload, "authenticationKey")),
                };
                self.set_pending(ApiEventKind::WaitForProcessing, payload);
                self.submit(command);
            }
            "DISPLAY_SUCCESS" => self.set_pending(ApiEventKind::DisplaySuccess, payload),
            "DISPLAY_ERROR" => self.set_pending(ApiEventKind::DisplayError, payload),
            "DISPLAY_TEXT" => self.set_pending(ApiEventKind::DisplayText, payload),
            "SELECT_ITEM" => self.set_pending(ApiEventKind::ResourceSelection, payload),
            "CONFIRM_ACTION" => self.set_pending(ApiEventKind::ConfirmAction, payload),
            other => warn!("API: unknown event type {}", other),
        }
    }

    fn set_pending(&self, kind: ApiEventKind, payload: Value) {
        self.bus.set_pending_event(kind, payload);
    }

    fn submit(&self, command: NfcCommand) {
        let name = command.name();
        if let Err(e) = self.bus.submit_nfc_command(command) {
            warn!("API: NFC {} not queued: {}", name, e);
        }
    }

    fn on_registration(&self, payload: &Value) {
        let id = payload
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());
        let token = payload.get("token").and_then(Value::as_str);

        match (id, token) {
            (Some(id), Some(token)) => match self.settings.save_identity(token, id) {
                Ok(()) => info!("API: registered as reader {}", id),
                Err(e) => error!("API: failed to persist identity: {}", e),
            },
            _ => warn!("API: registration without id/token ignored"),
        }
    }

    fn on_unauthorized(&self, payload: &Value) {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        error!("API: unauthorized: {}", message);
        if let Err(e) = self.settings.clear_identity() {
            error!("API: failed to clear identity: {}", e);
        }
        self.bus.set_api_state(false, "");
    }

    fn on_request_authentication(&self) {
        let identity = self.settings.identity();
        if !identity.is_registered() {
            info!("API: not registered, answering with registration request");
            self.respond("READER_REGISTER", &json!({}));
            return;
        }
        self.respond(
            "READER_REQUEST_AUTHENTICATION",
            &json!({ "id": identity.reader_id, "token": identity.api_key.as_str() }),
        );
    }

    // ── Local input ──────────────────────────────────────────

    fn process_input(&mut self) {
        let Some(event) = self.bus.input_events().try_receive() else {
            return;
        };
        self.translate_input(&event);
    }

    fn translate_input(&self, event: &InputEvent) {
        match event.kind {
            InputEventKind::KeypadConfirm => match self.bus.pending_event().kind {
                ApiEventKind::ResourceSelection => {
                    self.respond("SELECT_ITEM", &json!({ "value": event.payload.as_str() }));
                }
                ApiEventKind::ConfirmAction => self.respond("CONFIRM_ACTION", &json!({})),
                other => warn!("API: keypad confirm ignored in {:?}", other),
            },
            InputEventKind::KeypadCancel => info!("API: keypad cancel ignored"),
            InputEventKind::NfcCardDetected => {
                info!("API: card {} tapped", event.payload);
                self.send(
                    Direction::Event,
                    "NFC_TAP",
                    &json!({ "cardUID": event.payload.as_str() }),
                );
            }
            InputEventKind::NfcChangeKeySuccess | InputEventKind::NfcChangeKeyFailed => {
                let ok = event.kind == InputEventKind::NfcChangeKeySuccess;
                info!("API: change key {}", if ok { "succeeded" } else { "failed" });
                self.respond("NFC_CHANGE_KEY", &json!({ "successful": ok }));
            }
            InputEventKind::NfcAuthenticateSuccess | InputEventKind::NfcAuthenticateFailed => {
                let ok = event.kind == InputEventKind::NfcAuthenticateSuccess;
                info!("API: authenticate {}", if ok { "succeeded" } else { "failed" });
                self.respond("NFC_AUTHENTICATE", &json!({ "successful": ok }));
            }
        }
    }
}
