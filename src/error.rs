//! Unified error types for the Attractap firmware.
//!
//! Every subsystem keeps its own small error enum next to the port it
//! belongs to; this module funnels them into a single [`Error`] so that
//! bootstrap code and the component loops handle failures uniformly.
//! No error in this crate is fatal at runtime: the worst outcome is a
//! stalled feature that stays visible through the bus state.

use core::fmt;

use crate::api::ProtocolError;
use crate::app::ports::{ConfigError, LinkError, NfcError, StorageError, WsError};
use crate::bus::QueueError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// A bus queue rejected an item (full after its send timeout, or busy).
    Queue(QueueError),
    /// A network interface could not be brought up.
    Link(LinkError),
    /// The websocket transport failed.
    Transport(WsError),
    /// An NFC reader or card operation failed.
    Nfc(NfcError),
    /// An inbound or outbound protocol frame was invalid.
    Protocol(ProtocolError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Peripheral or task initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(e) => write!(f, "queue: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Transport(e) => write!(f, "websocket: {e}"),
            Self::Nfc(e) => write!(f, "nfc: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Self::Transport(e)
    }
}

impl From<NfcError> for Error {
    fn from(e: NfcError) -> Self {
        Self::Nfc(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
