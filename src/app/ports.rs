//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ component (net · ws · api · nfc)
//! ```
//!
//! Platform adapters (ESP-IDF Wi-Fi, W5500 Ethernet, websocket client,
//! PN532 reader, NVS) implement these traits.  Components consume them
//! via generics, so the orchestration logic never touches hardware
//! directly and runs unchanged against the mocks in `tests/`.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** holds the reader API key; on ESP32 the NVS partition
//!   SHOULD be encrypted.
//! - All port errors are typed; callers must handle every variant explicitly.

use core::fmt;
use core::net::Ipv4Addr;
use core::time::Duration;

use crate::bus::{Frame, ScanResults};
use crate::certs::CaCertificate;
use crate::config::SystemConfig;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock shared by every polling loop.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

// ───────────────────────────────────────────────────────────────
// Link driver port (driven adapter: net manager ↔ network hardware)
// ───────────────────────────────────────────────────────────────

/// Asynchronous notifications from a network interface driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Association (Wi-Fi) or carrier (Ethernet) established.
    LinkUp,
    /// Link lost; Wi-Fi carries the driver's disconnect reason code.
    LinkDown { reason: u16 },
    /// DHCP lease obtained.
    GotAddress(Ipv4Addr),
    /// A scan started with [`LinkDriver::start_scan`] finished.
    ScanDone,
}

/// Hardware half of a network interface.
///
/// `connect` acquires everything the interface needs (bus handles,
/// interrupt registrations, netif) and starts link bring-up.  `release`
/// MUST undo every acquisition, even after a partial `connect`, so that
/// repeated retries never leak resources.
pub trait LinkDriver {
    /// Whether there is anything to connect with (stored credentials,
    /// hardware present).  Checked before every attempt.
    fn is_configured(&self) -> bool;
    fn connect(&mut self) -> Result<(), LinkError>;
    fn release(&mut self);
    fn poll_event(&mut self) -> Option<LinkEvent>;

    /// Name of the network being joined (the SSID for Wi-Fi).
    fn network_name(&self) -> heapless::String<32> {
        heapless::String::new()
    }

    fn start_scan(&mut self) -> Result<(), LinkError> {
        Err(LinkError::Unsupported)
    }

    /// Results of the last finished scan, strongest first.
    fn take_scan_results(&mut self) -> Option<ScanResults> {
        None
    }
}

// ───────────────────────────────────────────────────────────────
// Websocket transport port (driven adapter: session ↔ ws client)
// ───────────────────────────────────────────────────────────────

/// Where the websocket session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsTarget {
    pub host: heapless::String<64>,
    pub port: u16,
    pub use_tls: bool,
}

/// Path of the reader endpoint on the backend.
pub const WS_PATH: &str = "/api/attractap/websocket";

impl WsTarget {
    /// `ws[s]://host:port/api/attractap/websocket`
    pub fn url(&self) -> heapless::String<128> {
        use core::fmt::Write;
        let mut url = heapless::String::new();
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let _ = write!(url, "{}://{}:{}{}", scheme, self.host, self.port, WS_PATH);
        url
    }
}

/// Events surfaced by the websocket client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Connected,
    Disconnected,
    Closed,
    Error,
    Text(Frame),
    Binary { len: usize },
}

/// Client half of the websocket session.
pub trait WsTransport {
    /// Start connecting; completion is reported as [`WsEvent::Connected`].
    fn open(&mut self, target: &WsTarget, ca: Option<&CaCertificate>) -> Result<(), WsError>;
    fn close(&mut self);
    fn send_text(&mut self, text: &str, timeout: Duration) -> Result<(), WsError>;
    fn poll_event(&mut self) -> Option<WsEvent>;
}

// ───────────────────────────────────────────────────────────────
// NFC reader port (driven adapter: controller ↔ PN532 + NTAG424)
// ───────────────────────────────────────────────────────────────

/// AES-128 application key of an NTAG424 card.
pub type Key = [u8; 16];

/// ISO14443A UID (4 or 7 bytes).
pub type CardUid = heapless::Vec<u8, 7>;

/// Reader plus secure-card operations.
///
/// `poll_card` must return within `timeout_ms`.  `authenticate` and
/// `change_key` act on the card selected by the most recent successful
/// `poll_card`.
pub trait NfcReader {
    fn firmware_version(&mut self) -> Result<u32, NfcError>;
    fn configure(&mut self) -> Result<(), NfcError>;
    fn poll_card(&mut self, timeout_ms: u32) -> Result<Option<CardUid>, NfcError>;
    fn is_secure_card(&mut self) -> bool;
    fn authenticate(&mut self, key_no: u8, key: &Key) -> Result<(), NfcError>;
    fn change_key(&mut self, key_no: u8, old_key: &Key, new_key: &Key) -> Result<(), NfcError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the timing tunables.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped, so a zero tick interval can never be stored.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for settings, identity and the
/// certificate cursor.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic, no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`LinkDriver`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Interface has nothing to connect with (no SSID, no hardware).
    NotConfigured,
    /// Bus or peripheral setup failed.
    HardwareInit,
    /// Hardware answered but is not the expected chip.
    WrongChip,
    /// Driver refused to start association / link.
    StartFailed,
    /// The driver does not implement the operation.
    Unsupported,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "interface not configured"),
            Self::HardwareInit => write!(f, "hardware initialisation failed"),
            Self::WrongChip => write!(f, "unexpected chip version"),
            Self::StartFailed => write!(f, "driver start failed"),
            Self::Unsupported => write!(f, "operation not supported"),
        }
    }
}

/// Errors from [`WsTransport`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsError {
    InvalidTarget,
    ConnectFailed,
    NotConnected,
    SendTimeout,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget => write!(f, "invalid websocket target"),
            Self::ConnectFailed => write!(f, "websocket client could not start"),
            Self::NotConnected => write!(f, "websocket not connected"),
            Self::SendTimeout => write!(f, "websocket send timed out"),
        }
    }
}

/// Errors from [`NfcReader`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcError {
    /// No PN532 answered on the bus.
    NotDetected,
    /// Bus transfer failed or the reader answered with a malformed frame.
    Bus,
    /// Reader did not answer in time.
    Timeout,
    /// No card (or no card of the secure type) in the field.
    NoCard,
    /// Card rejected the authentication handshake.
    AuthFailed,
    /// Card rejected the key change.
    ChangeKeyFailed,
    /// Reader does not support secure-card operations on this build.
    Unsupported,
}

impl fmt::Display for NfcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDetected => write!(f, "NFC module not detected"),
            Self::Bus => write!(f, "NFC bus error"),
            Self::Timeout => write!(f, "NFC reader timeout"),
            Self::NoCard => write!(f, "no compatible card in field"),
            Self::AuthFailed => write!(f, "card authentication failed"),
            Self::ChangeKeyFailed => write!(f, "card key change failed"),
            Self::Unsupported => write!(f, "operation unsupported by reader"),
        }
    }
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored value has the wrong size or encoding.
    Corrupted,
    /// Value does not fit the field it would be stored in.
    TooLong,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored value corrupted"),
            Self::TooLong => write!(f, "value too long"),
        }
    }
}
