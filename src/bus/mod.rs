//! Shared state bus: the only channel between components.
//!
//! One [`SharedStateBus`] is constructed at boot and shared through an
//! `Arc` with every component.  It holds two kinds of things:
//!
//! - **Snapshots** (connectivity, session, pending event, keypad value,
//!   scan results), each behind a short `embassy-sync` critical section.
//!   Reads copy out, writes copy in; no lock is ever held across I/O.
//!   Every write bumps the shared [`Generation`].
//! - **Queues** for ownership hand-off between exactly one producer side
//!   and one consumer (see [`BoundedQueue`]).
//!
//! ```text
//!  net ──set_wifi/ethernet_state──┐
//!  ws  ──set_transport_state──────┤             ┌──▶ watchers (ws · api · nfc · UI)
//!  api ──set_api_state────────────┼─▶ snapshots ┘
//!  api ──set_pending_event────────┘
//!
//!  api ──outbound──▶ ws        ws ──inbound──▶ api
//!  nfc/keypad ──input_events──▶ api
//!  api ──nfc_commands──▶ nfc   (one outstanding at a time)
//! ```

mod generation;
mod queue;
pub mod state;

pub use generation::{ChangeWatcher, Generation};
pub use queue::{BoundedQueue, QueueError};
pub use state::{
    ApiEventKind, ConnectivityState, InputEvent, InputEventKind, NfcCommand, PendingEvent,
    ScanResults, SessionState, WifiAuth, WifiNetwork,
};

use core::cell::RefCell;
use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};
use serde_json::Value;

use crate::app::ports::WsTarget;
use state::bounded;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// Depth of the frame, input-event and NFC-command queues.
pub const QUEUE_DEPTH: usize = 15;

/// Maximum serialized protocol frame length (bytes).
pub const MAX_FRAME_LEN: usize = 1024;

/// One serialized protocol frame.
pub type Frame = heapless::String<MAX_FRAME_LEN>;

const FRAME_SEND_TIMEOUT: Duration = Duration::from_millis(2000);
const INPUT_SEND_TIMEOUT: Duration = Duration::from_millis(1000);
const NFC_SEND_TIMEOUT: Duration = Duration::from_millis(1000);

type Guarded<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

// ───────────────────────────────────────────────────────────────
// SharedStateBus
// ───────────────────────────────────────────────────────────────

pub struct SharedStateBus {
    generation: Generation,
    connectivity: Guarded<ConnectivityState>,
    session: Guarded<SessionState>,
    pending: Guarded<PendingEvent>,
    keypad: Guarded<heapless::String<64>>,
    scan: Guarded<ScanResults>,
    nfc_busy: AtomicBool,
    scan_requested: AtomicBool,
    outbound: BoundedQueue<Frame, QUEUE_DEPTH>,
    inbound: BoundedQueue<Frame, QUEUE_DEPTH>,
    input_events: BoundedQueue<InputEvent, QUEUE_DEPTH>,
    nfc_commands: BoundedQueue<NfcCommand, QUEUE_DEPTH>,
}

impl SharedStateBus {
    pub const fn new() -> Self {
        Self {
            generation: Generation::new(),
            connectivity: Mutex::new(RefCell::new(ConnectivityState::new())),
            session: Mutex::new(RefCell::new(SessionState::new())),
            pending: Mutex::new(RefCell::new(PendingEvent::new())),
            keypad: Mutex::new(RefCell::new(heapless::String::new())),
            scan: Mutex::new(RefCell::new(heapless::Vec::new())),
            nfc_busy: AtomicBool::new(false),
            scan_requested: AtomicBool::new(false),
            outbound: BoundedQueue::new("ws-out", FRAME_SEND_TIMEOUT),
            inbound: BoundedQueue::new("ws-in", FRAME_SEND_TIMEOUT),
            input_events: BoundedQueue::new("api-input", INPUT_SEND_TIMEOUT),
            nfc_commands: BoundedQueue::new("nfc-cmd", NFC_SEND_TIMEOUT),
        }
    }

    // ── Change detection ─────────────────────────────────────

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Shorthand for `watcher.changed(bus.generation())`.
    pub fn changed_since(&self, watcher: &mut ChangeWatcher) -> bool {
        watcher.changed(&self.generation)
    }

    fn write<T>(&self, cell: &Guarded<T>, f: impl FnOnce(&mut T)) {
        cell.lock(|c| f(&mut c.borrow_mut()));
        self.generation.bump();
    }

    fn read<T: Clone>(cell: &Guarded<T>) -> T {
        cell.lock(|c| c.borrow().clone())
    }

    // ── Connectivity ─────────────────────────────────────────

    pub fn connectivity(&self) -> ConnectivityState {
        Self::read(&self.connectivity)
    }

    pub fn set_wifi_state(&self, connected: bool, address: Option<Ipv4Addr>, ssid: &str) {
        self.write(&self.connectivity, |c| {
            c.wifi_connected = connected;
            c.wifi_address = address;
            c.wifi_ssid = bounded(ssid);
        });
    }

    pub fn set_ethernet_state(&self, connected: bool, address: Option<Ipv4Addr>) {
        self.write(&self.connectivity, |c| {
            c.ethernet_connected = connected;
            c.ethernet_address = address;
        });
    }

    // ── Session ──────────────────────────────────────────────

    pub fn session(&self) -> SessionState {
        Self::read(&self.session)
    }

    /// Publish the websocket transport state.  Losing the transport also
    /// drops the authenticated flag and display name.
    pub fn set_transport_state(&self, connected: bool, target: &WsTarget) {
        self.write(&self.session, |s| {
            s.transport_connected = connected;
            s.hostname = bounded(&target.host);
            s.port = target.port;
            s.use_tls = target.use_tls;
            if !connected {
                s.authenticated = false;
                s.device_name.clear();
            }
        });
    }

    pub fn set_api_state(&self, authenticated: bool, device_name: &str) {
        self.write(&self.session, |s| {
            s.authenticated = authenticated;
            s.device_name = bounded(device_name);
        });
    }

    /// Transport connected and at least one interface up.
    pub fn session_usable(&self) -> bool {
        self.session().transport_connected && self.connectivity().any_connected()
    }

    // ── Pending event ────────────────────────────────────────

    pub fn pending_event(&self) -> PendingEvent {
        Self::read(&self.pending)
    }

    /// Replace the pending event wholesale.  Returns its stamp.
    pub fn set_pending_event(&self, kind: ApiEventKind, payload: Value) -> u32 {
        self.pending.lock(|p| {
            let stamp = self.generation.bump();
            *p.borrow_mut() = PendingEvent {
                kind,
                payload,
                stamp,
            };
            stamp
        })
    }

    // ── Keypad ───────────────────────────────────────────────

    pub fn keypad_value(&self) -> heapless::String<64> {
        Self::read(&self.keypad)
    }

    /// Store the keypad entry; returns `false` (and leaves the generation
    /// alone) if it did not change.
    pub fn set_keypad_value(&self, value: &str) -> bool {
        let value: heapless::String<64> = bounded(value);
        let changed = self.keypad.lock(|k| {
            let mut k = k.borrow_mut();
            if *k == value {
                return false;
            }
            *k = value;
            true
        });
        if changed {
            self.generation.bump();
        }
        changed
    }

    // ── Wi-Fi scan ───────────────────────────────────────────

    pub fn scan_results(&self) -> ScanResults {
        Self::read(&self.scan)
    }

    /// Ask the Wi-Fi manager to scan on its next tick.
    pub fn request_wifi_scan(&self) {
        self.scan_requested.store(true, Ordering::Release);
    }

    /// Consume a pending scan request.
    pub fn take_scan_request(&self) -> bool {
        self.scan_requested.swap(false, Ordering::AcqRel)
    }

    pub fn set_scan_results(&self, networks: ScanResults) {
        info!("Bus: scan results updated ({} networks)", networks.len());
        self.write(&self.scan, |s| *s = networks);
    }

    // ── Queues ───────────────────────────────────────────────

    /// Frames waiting to go to the backend (consumer: websocket session).
    pub fn outbound(&self) -> &BoundedQueue<Frame, QUEUE_DEPTH> {
        &self.outbound
    }

    /// Frames received from the backend (consumer: API handler).
    pub fn inbound(&self) -> &BoundedQueue<Frame, QUEUE_DEPTH> {
        &self.inbound
    }

    /// Keypad and NFC results (consumer: API handler).
    pub fn input_events(&self) -> &BoundedQueue<InputEvent, QUEUE_DEPTH> {
        &self.input_events
    }

    /// Hand a command to the NFC controller.  Refused with
    /// [`QueueError::Busy`] while a previous command is unfinished.
    pub fn submit_nfc_command(&self, command: NfcCommand) -> Result<(), QueueError> {
        if self.nfc_busy.swap(true, Ordering::AcqRel) {
            warn!("Bus: NFC {} rejected, previous command outstanding", command.name());
            return Err(QueueError::Busy);
        }
        self.nfc_commands.try_send(command).inspect_err(|_| {
            self.nfc_busy.store(false, Ordering::Release);
        })
    }

    /// Next NFC command (consumer: NFC controller).
    pub fn next_nfc_command(&self) -> Option<NfcCommand> {
        self.nfc_commands.try_receive()
    }

    /// Called by the NFC controller once a command's result is reported.
    pub fn finish_nfc_command(&self) {
        self.nfc_busy.store(false, Ordering::Release);
    }

    pub fn nfc_command_outstanding(&self) -> bool {
        self.nfc_busy.load(Ordering::Acquire)
    }
}

impl Default for SharedStateBus {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
