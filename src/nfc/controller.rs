//! NFC card controller.
//!
//! ```text
//!  tick ─▶ bring-up (firmware version, SAM config; retried every tick)
//!          └─ failed: a queued command is answered with its failure
//!       ─▶ refresh gate  (pending == WaitForNfcTap && interface up)
//!       ─▶ one command   (Authenticate | ChangeKey) ─▶ result input event
//!       ─▶ discovery     (gate open only) ─▶ NfcCardDetected{uid}
//! ```
//!
//! Every wait is bounded: discovery by the poll timeout, authentication
//! by the attempt count, card removal by `nfc_removal_timeout_ms`.

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use super::hex::uid_hex;
use crate::app::ports::{CardUid, Clock, Key, NfcReader};
use crate::bus::{
    ApiEventKind, ChangeWatcher, InputEvent, InputEventKind, NfcCommand, SharedStateBus,
};
use crate::config::SystemConfig;

/// Application master key slot, used to authorise key changes.
pub const MASTER_KEY_NO: u8 = 0;

/// Interval between "is the card still there" polls.
pub const REMOVAL_POLL_MS: u32 = 50;

pub struct NfcController<R: NfcReader, D: DelayNs, C: Clock> {
    reader: R,
    delay: D,
    clock: C,
    bus: Arc<SharedStateBus>,
    watcher: ChangeWatcher,
    detected: bool,
    ready: bool,
    missing_logged: bool,
    detection_enabled: bool,
    discovery_timeout_ms: u32,
    auth_attempts: u8,
    auth_retry_delay_ms: u32,
    removal_timeout_ms: u64,
}

impl<R: NfcReader, D: DelayNs, C: Clock> NfcController<R, D, C> {
    pub fn new(reader: R, delay: D, clock: C, bus: Arc<SharedStateBus>, cfg: &SystemConfig) -> Self {
        Self {
            reader,
            delay,
            clock,
            bus,
            watcher: ChangeWatcher::new(),
            detected: false,
            ready: false,
            missing_logged: false,
            detection_enabled: false,
            discovery_timeout_ms: cfg.nfc_discovery_timeout_ms,
            auth_attempts: cfg.nfc_auth_attempts.max(1),
            auth_retry_delay_ms: cfg.nfc_auth_retry_delay_ms,
            removal_timeout_ms: u64::from(cfg.nfc_removal_timeout_ms),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.detected && self.ready
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn tick(&mut self) {
        if !self.bring_up() {
            self.reject_command();
            return;
        }
        self.refresh_gate();
        self.process_command();

        if !self.detection_enabled {
            return;
        }
        if let Some(uid) = self.discover(self.discovery_timeout_ms) {
            let hex = uid_hex(&uid);
            info!("NFC: card detected, UID {}", hex);
            // A full queue logs the drop itself.
            let _ = self
                .bus
                .input_events()
                .try_send(InputEvent::with_payload(InputEventKind::NfcCardDetected, &hex));
        }
    }

    fn bring_up(&mut self) -> bool {
        if !self.detected {
            match self.reader.firmware_version() {
                Ok(v) => {
                    info!(
                        "NFC: found PN5{:x} firmware {}.{}",
                        (v >> 24) & 0xFF,
                        (v >> 16) & 0xFF,
                        (v >> 8) & 0xFF
                    );
                    self.detected = true;
                    self.missing_logged = false;
                }
                Err(e) => {
                    if !self.missing_logged {
                        error!("NFC: {}, check wiring", e);
                        self.missing_logged = true;
                    }
                    return false;
                }
            }
        }

        if !self.ready {
            match self.reader.configure() {
                Ok(()) => {
                    info!("NFC: module configured");
                    self.ready = true;
                }
                Err(e) => {
                    error!("NFC: SAM configuration failed: {}", e);
                    return false;
                }
            }
        }
        true
    }

    fn refresh_gate(&mut self) {
        if !self.bus.changed_since(&mut self.watcher) {
            return;
        }
        let enabled = self.bus.pending_event().kind == ApiEventKind::WaitForNfcTap
            && self.bus.connectivity().any_connected();
        if enabled != self.detection_enabled {
            info!(
                "NFC: card detection {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.detection_enabled = enabled;
    }

    // ── Commands ─────────────────────────────────────────────

    fn process_command(&mut self) {
        let Some(command) = self.bus.next_nfc_command() else {
            return;
        };
        info!("NFC: executing {}", command.name());

        let result = match command {
            NfcCommand::Authenticate {
                key_index,
                auth_key,
            } => {
                if self.run_authenticate(key_index, &auth_key) {
                    InputEventKind::NfcAuthenticateSuccess
                } else {
                    InputEventKind::NfcAuthenticateFailed
                }
            }
            NfcCommand::ChangeKey {
                key_index,
                auth_key,
                old_key,
                new_key,
            } => {
                if self.run_change_key(key_index, &auth_key, &old_key, &new_key) {
                    InputEventKind::NfcChangeKeySuccess
                } else {
                    InputEventKind::NfcChangeKeyFailed
                }
            }
        };

        let _ = self.bus.input_events().try_send(InputEvent::new(result));
        self.bus.finish_nfc_command();
    }

    /// A command queued while the reader is down fails at once.
    fn reject_command(&mut self) {
        let Some(command) = self.bus.next_nfc_command() else {
            return;
        };
        error!("NFC: {} failed, reader not ready", command.name());
        let result = match command {
            NfcCommand::Authenticate { .. } => InputEventKind::NfcAuthenticateFailed,
            NfcCommand::ChangeKey { .. } => InputEventKind::NfcChangeKeyFailed,
        };
        let _ = self.bus.input_events().try_send(InputEvent::new(result));
        self.bus.finish_nfc_command();
    }

    fn run_authenticate(&mut self, key_no: u8, key: &Key) -> bool {
        if self.discover(self.discovery_timeout_ms).is_none() {
            error!("NFC: authenticate: no card found");
            return false;
        }
        self.authenticate(key_no, key, true)
    }

    /// Master-key auth, key change, then proof that the new key works.
    /// The card keeps whatever step 2 did even if step 3 fails.
    fn run_change_key(&mut self, key_no: u8, auth_key: &Key, old_key: &Key, new_key: &Key) -> bool {
        if !self.authenticate(MASTER_KEY_NO, auth_key, false) {
            error!("NFC: change key: master key authentication failed");
            return false;
        }
        if let Err(e) = self.reader.change_key(key_no, old_key, new_key) {
            error!("NFC: change key {} failed: {}", key_no, e);
            return false;
        }
        debug!("NFC: validating new key {}", key_no);
        if !self.authenticate(key_no, new_key, true) {
            error!("NFC: change key: new key {} does not authenticate", key_no);
            return false;
        }
        info!("NFC: key {} changed", key_no);
        true
    }

    fn authenticate(&mut self, key_no: u8, key: &Key, wait_for_removal: bool) -> bool {
        let attempts = self.auth_attempts;
        let mut ok = false;
        for attempt in 1..=attempts {
            match self.reader.authenticate(key_no, key) {
                Ok(()) => {
                    ok = true;
                    break;
                }
                Err(e) => {
                    debug!("NFC: authenticate attempt {}/{}: {}", attempt, attempts, e);
                    if attempt < attempts {
                        self.delay.delay_ms(self.auth_retry_delay_ms);
                    }
                }
            }
        }

        if !ok {
            error!("NFC: authentication with key {} failed", key_no);
            return false;
        }
        if wait_for_removal {
            self.wait_for_removal();
        }
        true
    }

    // ── Card presence ────────────────────────────────────────

    fn discover(&mut self, timeout_ms: u32) -> Option<CardUid> {
        match self.reader.poll_card(timeout_ms) {
            Ok(Some(uid)) => {
                if self.reader.is_secure_card() {
                    Some(uid)
                } else {
                    debug!("NFC: ignoring non-NTAG424 tag");
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!("NFC: poll failed: {}", e);
                None
            }
        }
    }

    /// Returns once the card has left the field or the removal timeout
    /// expired; either way the caller goes on to report its result.
    fn wait_for_removal(&mut self) {
        info!("NFC: waiting for card removal");
        let start = self.clock.now_ms();
        loop {
            match self.reader.poll_card(REMOVAL_POLL_MS) {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    info!("NFC: card removed");
                    return;
                }
            }
            if self.clock.now_ms().saturating_sub(start) >= self.removal_timeout_ms {
                warn!(
                    "NFC: card still present after {} ms, continuing",
                    self.removal_timeout_ms
                );
                return;
            }
            self.delay.delay_ms(REMOVAL_POLL_MS);
        }
    }
}
