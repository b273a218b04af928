//! Mock adapters for integration tests.
//!
//! Each mock records what the component asked of it and replays scripted
//! driver events, so tests can drive whole flows tick by tick without
//! touching real radios, sockets or the PN532.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use attractap::adapters::nvs::NvsAdapter;
use attractap::adapters::time::ManualClock;
use attractap::app::ports::{
    CardUid, Key, LinkDriver, LinkError, LinkEvent, NfcError, NfcReader, WsError, WsEvent,
    WsTarget, WsTransport,
};
use attractap::bus::SharedStateBus;
use attractap::certs::CaCertificate;
use attractap::config::SystemConfig;
use attractap::settings::Settings;

// ── Shared rig ────────────────────────────────────────────────

/// Bus, settings, clock and config wired the way `main` wires them.
pub struct Rig {
    pub bus: Arc<SharedStateBus>,
    pub nvs: NvsAdapter,
    pub settings: Arc<Settings<NvsAdapter>>,
    pub clock: Arc<ManualClock>,
    pub cfg: SystemConfig,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        let nvs = NvsAdapter::new().expect("sim NVS");
        Self {
            bus: Arc::new(SharedStateBus::new()),
            settings: Arc::new(Settings::load(nvs.clone())),
            nvs,
            clock: Arc::new(ManualClock::new(1_000)),
            cfg: SystemConfig::default(),
        }
    }

    /// Plain `ws://` backend on `backend.local:3000`.
    pub fn with_backend(self) -> Self {
        self.settings
            .save_api_config("backend.local", 3000, false)
            .expect("save api config");
        self
    }

    pub fn with_identity(self, reader_id: u32, api_key: &str) -> Self {
        self.settings
            .save_identity(api_key, reader_id)
            .expect("save identity");
        self
    }

    pub fn ethernet_up(&self) {
        self.bus
            .set_ethernet_state(true, Some(core::net::Ipv4Addr::new(10, 0, 0, 9)));
    }

    /// Everything currently queued for the backend, oldest first.
    pub fn drain_outbound(&self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = self.bus.outbound().try_receive() {
            out.push(frame.as_str().to_owned());
        }
        out
    }
}

// ── Link driver ───────────────────────────────────────────────

/// Network driver whose behaviour on `connect` is scripted.
#[derive(Default)]
pub struct MockLink {
    pub configured: bool,
    /// Number of upcoming `connect` calls that fail.
    pub fail_connects: u32,
    /// Push `LinkUp` on a successful connect.
    pub link_on_connect: bool,
    /// Push `GotAddress` on a successful connect.
    pub address_on_connect: Option<core::net::Ipv4Addr>,
    pub connects: u32,
    pub releases: u32,
    pub events: VecDeque<LinkEvent>,
}

#[allow(dead_code)]
impl MockLink {
    pub fn configured() -> Self {
        Self {
            configured: true,
            ..Self::default()
        }
    }
}

impl LinkDriver for MockLink {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.connects += 1;
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(LinkError::HardwareInit);
        }
        if self.link_on_connect {
            self.events.push_back(LinkEvent::LinkUp);
        }
        if let Some(ip) = self.address_on_connect {
            self.events.push_back(LinkEvent::GotAddress(ip));
        }
        Ok(())
    }

    fn release(&mut self) {
        self.releases += 1;
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }

    fn network_name(&self) -> heapless::String<32> {
        let mut name = heapless::String::new();
        let _ = name.push_str("lab");
        name
    }
}

// ── Websocket transport ───────────────────────────────────────

/// Websocket client that never connects on its own: tests push
/// [`WsEvent`]s into `events` to play the server side.
#[derive(Default)]
pub struct MockWs {
    pub opened: Vec<(String, Option<&'static str>)>,
    pub closes: u32,
    pub connected: bool,
    pub sent: Vec<String>,
    pub events: VecDeque<WsEvent>,
}

#[allow(dead_code)]
impl MockWs {
    pub fn push_text(&mut self, text: &str) {
        let frame = attractap::bus::Frame::try_from(text).expect("frame fits");
        self.events.push_back(WsEvent::Text(frame));
    }

    /// Sent frames whose `data.type` equals `kind`.
    pub fn sent_of_type(&self, kind: &str) -> Vec<&String> {
        let needle = format!("\"type\":\"{kind}\"");
        self.sent.iter().filter(|s| s.contains(&needle)).collect()
    }
}

impl WsTransport for MockWs {
    fn open(&mut self, target: &WsTarget, ca: Option<&CaCertificate>) -> Result<(), WsError> {
        self.opened
            .push((target.url().as_str().to_owned(), ca.map(|c| c.name)));
        Ok(())
    }

    fn close(&mut self) {
        self.closes += 1;
        self.connected = false;
    }

    fn send_text(&mut self, text: &str, _timeout: Duration) -> Result<(), WsError> {
        if !self.connected {
            return Err(WsError::NotConnected);
        }
        self.sent.push(text.to_owned());
        Ok(())
    }

    fn poll_event(&mut self) -> Option<WsEvent> {
        let event = self.events.pop_front()?;
        match event {
            WsEvent::Connected => self.connected = true,
            WsEvent::Closed | WsEvent::Disconnected | WsEvent::Error => self.connected = false,
            _ => {}
        }
        Some(event)
    }
}

// ── NFC reader ────────────────────────────────────────────────

/// PN532 + NTAG424 stand-in with an explicit key table.
pub struct MockReader {
    pub present: bool,
    pub card: Option<CardUid>,
    pub secure: bool,
    /// `(key_no, key)` pairs the card accepts.
    pub keys: Vec<(u8, Key)>,
    pub change_key_fails: bool,
    /// A successful ChangeKey installs the new key.
    pub change_key_applies: bool,
    /// Polls during which the card stays after it was authenticated.
    pub linger_polls: u32,
    pub auth_calls: Vec<(u8, Key)>,
    pub change_calls: u32,
    authenticated: bool,
}

#[allow(dead_code)]
impl MockReader {
    pub fn with_card(uid: &[u8]) -> Self {
        Self {
            present: true,
            card: Some(CardUid::from_slice(uid).expect("uid fits")),
            secure: true,
            keys: Vec::new(),
            change_key_fails: false,
            change_key_applies: true,
            linger_polls: 0,
            auth_calls: Vec::new(),
            change_calls: 0,
            authenticated: false,
        }
    }

    pub fn accepting(mut self, key_no: u8, key: Key) -> Self {
        self.keys.push((key_no, key));
        self
    }
}

impl NfcReader for MockReader {
    fn firmware_version(&mut self) -> Result<u32, NfcError> {
        if self.present {
            Ok(0x3201_0607)
        } else {
            Err(NfcError::NotDetected)
        }
    }

    fn configure(&mut self) -> Result<(), NfcError> {
        Ok(())
    }

    fn poll_card(&mut self, _timeout_ms: u32) -> Result<Option<CardUid>, NfcError> {
        if self.authenticated {
            // Removal phase: the card lingers for a few polls, then leaves.
            if self.linger_polls == 0 {
                self.authenticated = false;
                return Ok(None);
            }
            self.linger_polls -= 1;
        }
        Ok(self.card.clone())
    }

    fn is_secure_card(&mut self) -> bool {
        self.card.is_some() && self.secure
    }

    fn authenticate(&mut self, key_no: u8, key: &Key) -> Result<(), NfcError> {
        self.auth_calls.push((key_no, *key));
        if self.card.is_none() {
            return Err(NfcError::NoCard);
        }
        if self.keys.contains(&(key_no, *key)) {
            self.authenticated = true;
            Ok(())
        } else {
            Err(NfcError::AuthFailed)
        }
    }

    fn change_key(&mut self, key_no: u8, old_key: &Key, new_key: &Key) -> Result<(), NfcError> {
        self.change_calls += 1;
        if self.change_key_fails {
            return Err(NfcError::ChangeKeyFailed);
        }
        if self.change_key_applies {
            self.keys.retain(|k| *k != (key_no, *old_key));
            self.keys.push((key_no, *new_key));
        }
        Ok(())
    }
}
