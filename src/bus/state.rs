//! Snapshot and message types carried by the [`SharedStateBus`](super::SharedStateBus).
//!
//! Everything here is an owned, bounded-capacity value: snapshots are
//! copied out of the bus, queue items are moved through it.

use core::net::Ipv4Addr;

use serde_json::Value;

use crate::app::ports::Key;

/// Copy `s` into a fixed-capacity string, cutting at a char boundary if
/// it does not fit.
pub fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut end = s.len().min(N);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = heapless::String::new();
    // Cannot fail: `end <= N` and lies on a char boundary.
    let _ = out.push_str(&s[..end]);
    out
}

// ───────────────────────────────────────────────────────────────
// Connectivity / session snapshots
// ───────────────────────────────────────────────────────────────

/// Link state of both interfaces.  Both may be up at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    pub wifi_connected: bool,
    pub wifi_address: Option<Ipv4Addr>,
    pub wifi_ssid: heapless::String<32>,
    pub ethernet_connected: bool,
    pub ethernet_address: Option<Ipv4Addr>,
}

impl ConnectivityState {
    pub const fn new() -> Self {
        Self {
            wifi_connected: false,
            wifi_address: None,
            wifi_ssid: heapless::String::new(),
            ethernet_connected: false,
            ethernet_address: None,
        }
    }

    pub fn any_connected(&self) -> bool {
        self.wifi_connected || self.ethernet_connected
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend session state.  Transport fields belong to the websocket
/// session, auth fields to the API handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub transport_connected: bool,
    pub hostname: heapless::String<64>,
    pub port: u16,
    pub use_tls: bool,
    pub authenticated: bool,
    pub device_name: heapless::String<64>,
}

impl SessionState {
    pub const fn new() -> Self {
        Self {
            transport_connected: false,
            hostname: heapless::String::new(),
            port: 0,
            use_tls: false,
            authenticated: false,
            device_name: heapless::String::new(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Pending backend event
// ───────────────────────────────────────────────────────────────

/// What the backend last asked the reader (and its UI) to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiEventKind {
    None,
    DisplayError,
    DisplaySuccess,
    DisplayText,
    ConfirmAction,
    ResourceSelection,
    WaitForProcessing,
    WaitForNfcTap,
    FirmwareUpdate,
}

/// The single most recent backend-driven event.
///
/// `stamp` is the bus generation at the time of the write; consumers
/// detect a new event by comparing stamps.  `payload` is an owned copy
/// of the frame's payload object.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub kind: ApiEventKind,
    pub payload: Value,
    pub stamp: u32,
}

impl PendingEvent {
    pub const fn new() -> Self {
        Self {
            kind: ApiEventKind::None,
            payload: Value::Null,
            stamp: 0,
        }
    }
}

impl Default for PendingEvent {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Queue payloads
// ───────────────────────────────────────────────────────────────

/// Local inputs that the API handler turns into outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEventKind {
    KeypadConfirm,
    KeypadCancel,
    NfcCardDetected,
    NfcChangeKeySuccess,
    NfcChangeKeyFailed,
    NfcAuthenticateSuccess,
    NfcAuthenticateFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputEventKind,
    pub payload: heapless::String<64>,
}

impl InputEvent {
    pub fn new(kind: InputEventKind) -> Self {
        Self {
            kind,
            payload: heapless::String::new(),
        }
    }

    pub fn with_payload(kind: InputEventKind, payload: &str) -> Self {
        Self {
            kind,
            payload: bounded(payload),
        }
    }
}

/// Work item for the NFC controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcCommand {
    Authenticate {
        key_index: u8,
        auth_key: Key,
    },
    ChangeKey {
        key_index: u8,
        auth_key: Key,
        old_key: Key,
        new_key: Key,
    },
}

impl NfcCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "Authenticate",
            Self::ChangeKey { .. } => "ChangeKey",
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Wi-Fi scan results
// ───────────────────────────────────────────────────────────────

/// Maximum networks kept from one scan.
pub const MAX_SCAN_RESULTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiAuth {
    Open,
    Wep,
    WpaPersonal,
    Wpa2Personal,
    Wpa3Personal,
    Enterprise,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiNetwork {
    pub ssid: heapless::String<32>,
    pub rssi: i8,
    pub auth: WifiAuth,
    pub channel: u8,
}

impl WifiNetwork {
    pub fn is_open(&self) -> bool {
        self.auth == WifiAuth::Open
    }
}

pub type ScanResults = heapless::Vec<WifiNetwork, MAX_SCAN_RESULTS>;
