//! System configuration parameters
//!
//! Timing and retry tunables for the connectivity core. Defaults mirror
//! the values the reader has shipped with; an override blob can be stored
//! in NVS (see [`ConfigPort`](crate::app::ports::ConfigPort)).

use serde::{Deserialize, Serialize};

/// Human-readable firmware name reported to the backend.
pub const FIRMWARE_NAME: &str = "attractap";

/// Board variant reported to the backend and used for hostnames.
pub const FIRMWARE_VARIANT: &str = "esp32";

/// Firmware version reported to the backend.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Task cadence ---
    /// Network manager tick (milliseconds)
    pub network_tick_ms: u32,
    /// Websocket session tick (milliseconds)
    pub websocket_tick_ms: u32,
    /// API protocol handler tick (milliseconds)
    pub api_tick_ms: u32,
    /// NFC controller tick (milliseconds)
    pub nfc_tick_ms: u32,

    // --- Wi-Fi ---
    /// Fixed interval between association attempts
    pub wifi_retry_interval_ms: u32,
    /// Association + DHCP must complete within this window
    pub wifi_connect_timeout_ms: u32,

    // --- Ethernet ---
    /// Base delay of the exponential retry backoff
    pub eth_base_retry_delay_ms: u32,
    /// Initialisation attempts before entering the cool-down
    pub eth_max_retries: u8,
    /// Link-up without a DHCP lease is abandoned after this long
    pub eth_dhcp_timeout_ms: u32,

    // --- Websocket ---
    /// Delay before a new connect attempt after close / failure
    pub ws_reconnect_delay_ms: u32,
    /// Per-frame send timeout
    pub ws_send_timeout_ms: u32,

    // --- API ---
    /// Heartbeat cadence while the session is usable
    pub heartbeat_interval_ms: u32,
    /// Minimum spacing of registration / authentication requests
    pub handshake_interval_ms: u32,

    // --- NFC ---
    /// Passive-target discovery timeout
    pub nfc_discovery_timeout_ms: u32,
    /// Authentication attempts per command
    pub nfc_auth_attempts: u8,
    /// Delay between authentication attempts
    pub nfc_auth_retry_delay_ms: u32,
    /// Upper bound on waiting for the card to leave the field
    pub nfc_removal_timeout_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Task cadence
            network_tick_ms: 100,
            websocket_tick_ms: 20,
            api_tick_ms: 20,
            nfc_tick_ms: 40,

            // Wi-Fi
            wifi_retry_interval_ms: 10_000,
            wifi_connect_timeout_ms: 15_000,

            // Ethernet
            eth_base_retry_delay_ms: 1_000,
            eth_max_retries: 5,
            eth_dhcp_timeout_ms: 30_000,

            // Websocket
            ws_reconnect_delay_ms: 10_000,
            ws_send_timeout_ms: 5_000,

            // API
            heartbeat_interval_ms: 5_000,
            handshake_interval_ms: 10_000,

            // NFC
            nfc_discovery_timeout_ms: 1_000,
            nfc_auth_attempts: 3,
            nfc_auth_retry_delay_ms: 500,
            nfc_removal_timeout_ms: 10_000,
        }
    }
}

impl SystemConfig {
    /// Ethernet cool-down after the retry cap is reached.
    pub fn eth_cooldown_ms(&self) -> u32 {
        self.eth_base_retry_delay_ms.saturating_mul(10)
    }
}
